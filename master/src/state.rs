// master/src/state.rs

use chrono::{DateTime, Utc};
use common::counters::{
    self, JOB_COUNTERS, NUM_FAILED_MAPS, NUM_FAILED_REDUCES, NUM_KILLED_MAPS, NUM_KILLED_REDUCES,
    TOTAL_LAUNCHED_MAPS, TOTAL_LAUNCHED_REDUCES,
};
use common::{
    AttemptId, CoordinatorState, Counters, InputSplit, JobDescriptor, JobId, JobPriority,
    JobProfile, JobState, JobStatus, TaskCompletionEvent, TaskCompletionStatus, TaskId, TaskKind,
    TaskReport, TipState, TrackerId,
};
use locality::LocalityFileSystem;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::SystemTime,
};

use crate::config::MasterConfig;

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Mutex<JobTracker>>,
    pub fs: Arc<LocalityFileSystem>,
    pub config: Arc<MasterConfig>,
}

impl AppState {
    pub fn new(config: MasterConfig, fs: LocalityFileSystem) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(JobTracker::new())),
            fs: Arc::new(fs),
            config: Arc::new(config),
        }
    }

    /// Un panic con el lock tomado no debe dejar al coordinador inutilizable.
    pub fn lock(&self) -> MutexGuard<'_, JobTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Todo el estado mutable del coordinador. Sólo se toca con el lock de `AppState`.
pub struct JobTracker {
    pub state: CoordinatorState,
    /// Marca de arranque usada en los ids (yyyyMMddHHmm)
    pub(crate) stamp: String,
    pub(crate) next_job_seq: u32,
    /// Ids entregados por `new_job_id` que todavía no se enviaron, con la
    /// hora de la reserva
    pub(crate) reserved: HashMap<JobId, SystemTime>,
    pub(crate) jobs: HashMap<JobId, JobInProgress>,
    /// Orden de envío
    pub(crate) job_order: Vec<JobId>,
    pub(crate) attempts: HashMap<AttemptId, AttemptRef>,
    pub(crate) trackers: HashMap<TrackerId, TrackerMeta>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            state: CoordinatorState::Initializing,
            stamp: Utc::now().format("%Y%m%d%H%M").to_string(),
            next_job_seq: 0,
            reserved: HashMap::new(),
            jobs: HashMap::new(),
            job_order: Vec::new(),
            attempts: HashMap::new(),
            trackers: HashMap::new(),
        }
    }

    pub fn mark_running(&mut self) {
        self.state = CoordinatorState::Running;
    }
}

/// Dónde vive un intento: job, tipo de tarea e índice de la tarea.
#[derive(Debug, Clone)]
pub struct AttemptRef {
    pub job_id: JobId,
    pub kind: TaskKind,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct TrackerMeta {
    pub hostname: String,
    pub last_heartbeat: SystemTime,
    pub dead: bool,
    pub map_slots: u32,
    pub reduce_slots: u32,

    // Métricas
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_task_time_ms: u64,

    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,

    // intentos que el tracker tiene que abortar en el próximo heartbeat
    pub pending_kills: Vec<AttemptId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Running,
    Succeeded,
    Failed,
    Killed,
}

#[derive(Debug, Clone)]
pub struct AttemptInfo {
    pub id: AttemptId,
    pub tracker_id: TrackerId,
    pub tracker_host: String,
    pub state: AttemptState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TaskInProgress {
    pub id: TaskId,
    pub kind: TaskKind,
    pub index: u32,
    pub split: Option<InputSplit>,
    pub state: TipState,
    pub attempts: Vec<AttemptInfo>,
    /// Intentos fallidos (los matados no cuentan)
    pub failures: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    /// Contadores del intento exitoso
    pub counters: Counters,
}

impl TaskInProgress {
    pub fn new(job_id: &str, kind: TaskKind, index: u32, split: Option<InputSplit>) -> Self {
        let suffix = job_id.strip_prefix("job_").unwrap_or(job_id);
        Self {
            id: format!("task_{}_{}_{:06}", suffix, kind.tag(), index),
            kind,
            index,
            split,
            state: TipState::Pending,
            attempts: Vec::new(),
            failures: 0,
            start_time: None,
            finish_time: None,
            counters: Counters::new(),
        }
    }

    pub fn next_attempt_id(&self) -> AttemptId {
        let suffix = self.id.strip_prefix("task_").unwrap_or(&self.id);
        format!("attempt_{}_{}", suffix, self.attempts.len())
    }

    pub fn report(&self) -> TaskReport {
        TaskReport {
            task_id: self.id.clone(),
            state: self.state,
            progress: if self.state == TipState::Complete { 1.0 } else { 0.0 },
            start_time: self.start_time,
            finish_time: self.finish_time,
            split_hosts: self
                .split
                .as_ref()
                .map(|s| s.hosts.clone())
                .unwrap_or_default(),
            diagnostics: self
                .attempts
                .iter()
                .flat_map(|a| a.diagnostics.iter().cloned())
                .collect(),
            counters: self.counters.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobInProgress {
    pub profile: JobProfile,
    pub priority: JobPriority,
    pub state: JobState,
    /// true cuando ya se calcularon los splits y se crearon las tareas
    pub initialized: bool,
    pub maps: Vec<TaskInProgress>,
    pub reduces: Vec<TaskInProgress>,
    pub events: Vec<TaskCompletionEvent>,
    /// Contadores propios del coordinador (lanzados, fallidos, localidad...)
    pub counters: Counters,
    pub launch_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub failed_tasks: u32,
    pub killed_tasks: u32,
}

impl JobInProgress {
    pub fn new(job_id: JobId, desc: JobDescriptor) -> Self {
        Self {
            profile: JobProfile {
                job_id,
                name: desc.name,
                user: desc.user,
                input_paths: desc.input_paths,
                num_reduces: desc.num_reduces,
                submitted_at: Utc::now(),
            },
            priority: desc.priority,
            state: JobState::Prep,
            initialized: false,
            maps: Vec::new(),
            reduces: Vec::new(),
            events: Vec::new(),
            counters: Counters::new(),
            launch_time: None,
            finish_time: None,
            failed_tasks: 0,
            killed_tasks: 0,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.profile.job_id
    }

    pub fn tasks(&self, kind: TaskKind) -> &[TaskInProgress] {
        match kind {
            TaskKind::Map => &self.maps,
            TaskKind::Reduce => &self.reduces,
        }
    }

    pub fn tasks_mut(&mut self, kind: TaskKind) -> &mut Vec<TaskInProgress> {
        match kind {
            TaskKind::Map => &mut self.maps,
            TaskKind::Reduce => &mut self.reduces,
        }
    }

    pub fn maps_done(&self) -> bool {
        self.maps.iter().all(|t| t.state == TipState::Complete)
    }

    /// Primer map pendiente con el split en `host`; si no hay, el primer map
    /// pendiente. El bool indica si es local al host.
    pub fn pick_map(&self, host: &str) -> Option<(usize, bool)> {
        let mut fallback = None;
        for (i, tip) in self.maps.iter().enumerate() {
            if tip.state != TipState::Pending {
                continue;
            }
            let local = tip
                .split
                .as_ref()
                .map(|s| s.hosts.iter().any(|h| h == host))
                .unwrap_or(false);
            if local {
                return Some((i, true));
            }
            fallback.get_or_insert((i, false));
        }
        fallback
    }

    pub fn all_done(&self) -> bool {
        self.initialized
            && self.maps_done()
            && self.reduces.iter().all(|t| t.state == TipState::Complete)
    }

    fn progress(&self, kind: TaskKind) -> f32 {
        let tasks = self.tasks(kind);
        if tasks.is_empty() {
            return if self.state == JobState::Succeeded { 1.0 } else { 0.0 };
        }
        let done = tasks
            .iter()
            .filter(|t| t.state == TipState::Complete)
            .count();
        done as f32 / tasks.len() as f32
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.profile.job_id.clone(),
            state: self.state,
            map_progress: self.progress(TaskKind::Map),
            reduce_progress: self.progress(TaskKind::Reduce),
            start_time: self.profile.submitted_at,
            finish_time: self.finish_time,
            priority: self.priority,
            user: self.profile.user.clone(),
            failed_tasks: self.failed_tasks,
            killed_tasks: self.killed_tasks,
        }
    }

    /// Contadores del coordinador más los de todas las tareas completas.
    pub fn total_counters(&self) -> Counters {
        let mut total = self.counters.clone();
        for tip in self.maps.iter().chain(self.reduces.iter()) {
            if tip.state == TipState::Complete {
                total.merge(&tip.counters);
            }
        }
        total
    }

    /// Termina el job: las tareas pendientes quedan en `tip_state` y los
    /// intentos en curso se matan. Devuelve (intento, tracker) para avisar.
    pub fn abort_tasks(&mut self, tip_state: TipState, reason: &str) -> Vec<(AttemptId, TrackerId)> {
        let now = Utc::now();
        let mut to_kill = Vec::new();

        for tip in self.maps.iter_mut().chain(self.reduces.iter_mut()) {
            if !matches!(tip.state, TipState::Pending | TipState::Running) {
                continue;
            }
            for attempt in tip.attempts.iter_mut() {
                if attempt.state != AttemptState::Running {
                    continue;
                }
                attempt.state = AttemptState::Killed;
                attempt.finished_at = Some(now);
                attempt.diagnostics.push(reason.to_string());
                to_kill.push((attempt.id.clone(), attempt.tracker_id.clone()));

                self.killed_tasks += 1;
                self.counters.increment(JOB_COUNTERS, killed_counter(tip.kind), 1);
                push_event(
                    &mut self.events,
                    attempt,
                    tip.kind,
                    tip.index,
                    TaskCompletionStatus::Killed,
                    now,
                );
            }
            tip.state = tip_state;
            tip.finish_time = Some(now);
        }
        to_kill
    }
}

pub fn launched_counter(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Map => TOTAL_LAUNCHED_MAPS,
        TaskKind::Reduce => TOTAL_LAUNCHED_REDUCES,
    }
}

pub fn failed_counter(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Map => NUM_FAILED_MAPS,
        TaskKind::Reduce => NUM_FAILED_REDUCES,
    }
}

pub fn killed_counter(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Map => NUM_KILLED_MAPS,
        TaskKind::Reduce => NUM_KILLED_REDUCES,
    }
}

pub fn locality_counter(data_local: bool) -> &'static str {
    if data_local {
        counters::DATA_LOCAL_MAPS
    } else {
        counters::OTHER_LOCAL_MAPS
    }
}

/// Agrega un evento al log del job con el siguiente id.
pub fn push_event(
    events: &mut Vec<TaskCompletionEvent>,
    attempt: &AttemptInfo,
    kind: TaskKind,
    task_index: u32,
    status: TaskCompletionStatus,
    now: DateTime<Utc>,
) {
    let finished = attempt.finished_at.unwrap_or(now);
    let run_time_ms = (finished - attempt.started_at).num_milliseconds().max(0) as u64;
    events.push(TaskCompletionEvent {
        event_id: events.len() as u32,
        attempt_id: attempt.id.clone(),
        task_index,
        is_map: kind == TaskKind::Map,
        status,
        tracker_host: attempt.tracker_host.clone(),
        run_time_ms,
    });
}
