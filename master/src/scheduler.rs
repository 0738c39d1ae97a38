// master/src/scheduler.rs
//
// Trackers, asignación de tareas con preferencia por localidad y cierre
// de intentos.

use chrono::Utc;
use common::counters::JOB_COUNTERS;
use common::{
    AttemptId, Counters, JobId, JobState, TaskAssignment, TaskCompleteRequest,
    TaskCompletionStatus, TaskKind, TipState, TrackerHeartbeatRequest, TrackerId, TrackerMetrics,
    TrackerRegisterRequest,
};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::state::{
    failed_counter, killed_counter, launched_counter, locality_counter, push_event, AttemptInfo,
    AttemptRef, AttemptState, JobTracker, TrackerMeta,
};
use crate::MAX_TASK_ATTEMPTS;

/// Cómo terminó un intento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// Cuenta para el límite de intentos de la tarea
    Failed,
    /// No cuenta: la tarea vuelve a la cola sin penalización
    Killed,
}

impl JobTracker {
    /* ---------------- trackers ---------------- */

    pub fn register_tracker(&mut self, req: TrackerRegisterRequest) -> TrackerId {
        let tracker_id = uuid::Uuid::new_v4().to_string();
        info!(
            "tracker registrado: {} en {} (maps={}, reduces={})",
            tracker_id, req.hostname, req.map_slots, req.reduce_slots
        );
        self.trackers.insert(
            tracker_id.clone(),
            TrackerMeta {
                hostname: req.hostname,
                last_heartbeat: SystemTime::now(),
                dead: false,
                map_slots: req.map_slots,
                reduce_slots: req.reduce_slots,

                tasks_started: 0,
                tasks_succeeded: 0,
                tasks_failed: 0,
                total_task_time_ms: 0,

                last_cpu_percent: None,
                last_mem_bytes: None,

                pending_kills: Vec::new(),
            },
        );
        tracker_id
    }

    /// Devuelve los intentos que el tracker tiene que abortar, o `None` si
    /// el tracker no está registrado.
    pub fn heartbeat(&mut self, req: &TrackerHeartbeatRequest) -> Option<Vec<AttemptId>> {
        let meta = self.trackers.get_mut(&req.tracker_id)?;
        if meta.dead {
            info!("tracker {} volvió a dar señales de vida", req.tracker_id);
            meta.dead = false;
        }
        meta.last_heartbeat = SystemTime::now();
        meta.last_cpu_percent = Some(req.cpu_percent);
        meta.last_mem_bytes = Some(req.mem_bytes);
        Some(std::mem::take(&mut meta.pending_kills))
    }

    /// Intentos en curso de un tracker: (maps, reduces).
    fn running_on(&self, tracker_id: &str) -> (u32, u32) {
        let mut maps = 0;
        let mut reduces = 0;
        for job in self.jobs.values() {
            for tip in job.maps.iter().chain(job.reduces.iter()) {
                for a in &tip.attempts {
                    if a.state == AttemptState::Running && a.tracker_id == tracker_id {
                        match tip.kind {
                            TaskKind::Map => maps += 1,
                            TaskKind::Reduce => reduces += 1,
                        }
                    }
                }
            }
        }
        (maps, reduces)
    }

    /* ---------------- asignación ---------------- */

    /// Siguiente tarea para el tracker. Los jobs se recorren por prioridad y
    /// orden de envío; dentro de un job se prefiere un map cuyo split esté
    /// en el host del tracker, y los reduces sólo salen con todos los maps
    /// terminados.
    pub fn assign(&mut self, tracker_id: &TrackerId) -> Option<TaskAssignment> {
        let meta = self.trackers.get(tracker_id)?;
        if meta.dead {
            return None;
        }
        let host = meta.hostname.clone();
        let (map_slots, reduce_slots) = (meta.map_slots, meta.reduce_slots);
        let (running_maps, running_reduces) = self.running_on(tracker_id);

        let mut candidates: Vec<_> = self
            .ordered_jobs()
            .filter(|j| j.state == JobState::Running && j.initialized)
            .map(|j| (j.priority, j.id().clone()))
            .collect();
        // sort estable: a igual prioridad queda el orden de envío
        candidates.sort_by_key(|(priority, _)| *priority);

        for (_, job_id) in candidates {
            let Some(job) = self.jobs.get(&job_id) else {
                continue;
            };

            if running_maps < map_slots {
                if let Some((index, data_local)) = job.pick_map(&host) {
                    return self.launch(&job_id, TaskKind::Map, index, tracker_id, Some(data_local));
                }
            }

            if running_reduces < reduce_slots && job.maps_done() {
                if let Some(index) = job
                    .reduces
                    .iter()
                    .position(|t| t.state == TipState::Pending)
                {
                    return self.launch(&job_id, TaskKind::Reduce, index, tracker_id, None);
                }
            }
        }

        debug!(
            "tracker {} pidió tarea y no hay nada para él ({}/{} maps, {}/{} reduces)",
            tracker_id, running_maps, map_slots, running_reduces, reduce_slots
        );
        None
    }

    fn launch(
        &mut self,
        job_id: &JobId,
        kind: TaskKind,
        index: usize,
        tracker_id: &TrackerId,
        data_local: Option<bool>,
    ) -> Option<TaskAssignment> {
        let now = Utc::now();
        let host = self
            .trackers
            .get(tracker_id)
            .map(|m| m.hostname.clone())
            .unwrap_or_default();

        let job = self.jobs.get_mut(job_id)?;
        let tip = job.tasks_mut(kind).get_mut(index)?;

        let attempt_id = tip.next_attempt_id();
        tip.attempts.push(AttemptInfo {
            id: attempt_id.clone(),
            tracker_id: tracker_id.clone(),
            tracker_host: host,
            state: AttemptState::Running,
            started_at: now,
            finished_at: None,
            diagnostics: Vec::new(),
        });
        tip.state = TipState::Running;
        tip.start_time.get_or_insert(now);

        let assignment = TaskAssignment {
            attempt_id: attempt_id.clone(),
            task_id: tip.id.clone(),
            job_id: job_id.clone(),
            kind,
            split: tip.split.clone(),
        };

        job.counters.increment(JOB_COUNTERS, launched_counter(kind), 1);
        if let Some(local) = data_local {
            job.counters.increment(JOB_COUNTERS, locality_counter(local), 1);
        }

        self.attempts.insert(
            attempt_id.clone(),
            AttemptRef {
                job_id: job_id.clone(),
                kind,
                index,
            },
        );
        if let Some(meta) = self.trackers.get_mut(tracker_id) {
            meta.tasks_started += 1;
        }

        info!(
            "asignando {} ({}) al tracker {}{}",
            attempt_id,
            job_id,
            tracker_id,
            match data_local {
                Some(true) => " [data-local]",
                _ => "",
            }
        );
        Some(assignment)
    }

    /* ---------------- fin de intentos ---------------- */

    /// Reporte de un tracker. `false` si el intento no existe.
    pub fn complete_attempt(&mut self, req: TaskCompleteRequest) -> bool {
        let Some(aref) = self.attempts.get(&req.attempt_id).cloned() else {
            return false;
        };
        let outcome = if req.success {
            AttemptOutcome::Succeeded
        } else {
            AttemptOutcome::Failed
        };
        self.finish_attempt(
            &aref,
            &req.attempt_id,
            outcome,
            req.counters,
            req.diagnostics,
        );
        true
    }

    /// Cierra un intento en curso y propaga el resultado a la tarea y al job.
    /// Devuelve el tracker que lo corría, o `None` si el intento ya había
    /// terminado.
    pub(crate) fn finish_attempt(
        &mut self,
        aref: &AttemptRef,
        attempt_id: &AttemptId,
        outcome: AttemptOutcome,
        counters: Counters,
        diagnostics: Vec<String>,
    ) -> Option<TrackerId> {
        let now = Utc::now();
        let job = self.jobs.get_mut(&aref.job_id)?;
        let tips = match aref.kind {
            TaskKind::Map => &mut job.maps,
            TaskKind::Reduce => &mut job.reduces,
        };
        let tip = tips.get_mut(aref.index)?;
        let (kind, task_index) = (tip.kind, tip.index);

        let attempt = tip.attempts.iter_mut().find(|a| &a.id == attempt_id)?;
        if attempt.state != AttemptState::Running {
            debug!("{} ya había terminado, se ignora el reporte", attempt_id);
            return None;
        }
        attempt.state = match outcome {
            AttemptOutcome::Succeeded => AttemptState::Succeeded,
            AttemptOutcome::Failed => AttemptState::Failed,
            AttemptOutcome::Killed => AttemptState::Killed,
        };
        attempt.finished_at = Some(now);
        attempt.diagnostics.extend(diagnostics);
        let tracker_id = attempt.tracker_id.clone();
        let elapsed_ms = (now - attempt.started_at).num_milliseconds().max(0) as u64;

        let mut job_failed = false;
        match outcome {
            AttemptOutcome::Succeeded => {
                push_event(&mut job.events, attempt, kind, task_index, TaskCompletionStatus::Succeeded, now);
                tip.state = TipState::Complete;
                tip.finish_time = Some(now);
                tip.counters = counters;
            }
            AttemptOutcome::Failed => {
                job.failed_tasks += 1;
                job.counters.increment(JOB_COUNTERS, failed_counter(kind), 1);
                tip.failures += 1;
                if tip.failures >= MAX_TASK_ATTEMPTS {
                    push_event(&mut job.events, attempt, kind, task_index, TaskCompletionStatus::TipFailed, now);
                    tip.state = TipState::Failed;
                    tip.finish_time = Some(now);
                    job_failed = true;
                } else {
                    push_event(&mut job.events, attempt, kind, task_index, TaskCompletionStatus::Failed, now);
                    tip.state = TipState::Pending;
                }
            }
            AttemptOutcome::Killed => {
                push_event(&mut job.events, attempt, kind, task_index, TaskCompletionStatus::Killed, now);
                job.killed_tasks += 1;
                job.counters.increment(JOB_COUNTERS, killed_counter(kind), 1);
                tip.state = TipState::Pending;
            }
        }

        let mut to_kill = Vec::new();
        if job_failed {
            let reason = format!("la tarea {} falló {} veces", tip.id, MAX_TASK_ATTEMPTS);
            warn!("job {} falló: {}", aref.job_id, reason);
            to_kill = job.abort_tasks(TipState::Killed, &reason);
            job.state = JobState::Failed;
            job.finish_time = Some(now);
        } else if job.all_done() {
            let took = job
                .launch_time
                .map(|t| (now - t).num_milliseconds())
                .unwrap_or(0);
            info!("job {} terminó con éxito en {} ms", aref.job_id, took);
            job.state = JobState::Succeeded;
            job.finish_time = Some(now);
        }

        if let Some(meta) = self.trackers.get_mut(&tracker_id) {
            meta.total_task_time_ms += elapsed_ms;
            match outcome {
                AttemptOutcome::Succeeded => meta.tasks_succeeded += 1,
                AttemptOutcome::Failed => meta.tasks_failed += 1,
                AttemptOutcome::Killed => {}
            }
        }
        self.notify_kills(to_kill);

        Some(tracker_id)
    }

    /* ---------------- monitor ---------------- */

    /// Marca como muertos los trackers sin heartbeat reciente y devuelve sus
    /// intentos en curso a la cola (sin contarlos como fallos).
    pub fn sweep_dead_trackers(&mut self, now: SystemTime, timeout: Duration) -> Vec<TrackerId> {
        let mut dead = Vec::new();
        for (id, meta) in self.trackers.iter_mut() {
            if meta.dead {
                continue;
            }
            if let Ok(elapsed) = now.duration_since(meta.last_heartbeat) {
                if elapsed > timeout {
                    meta.dead = true;
                    meta.pending_kills.clear();
                    info!("marcando tracker {} como muerto", id);
                    dead.push(id.clone());
                }
            }
        }
        if dead.is_empty() {
            return dead;
        }

        let lost: Vec<(AttemptId, AttemptRef)> = self
            .attempts
            .iter()
            .filter(|(id, aref)| {
                self.jobs
                    .get(&aref.job_id)
                    .and_then(|j| j.tasks(aref.kind).get(aref.index))
                    .and_then(|tip| tip.attempts.iter().find(|a| &a.id == *id))
                    .map(|a| a.state == AttemptState::Running && dead.contains(&a.tracker_id))
                    .unwrap_or(false)
            })
            .map(|(id, aref)| (id.clone(), aref.clone()))
            .collect();

        for (attempt_id, aref) in lost {
            info!(
                "re-encolando {} del job {} por tracker perdido",
                attempt_id, aref.job_id
            );
            self.finish_attempt(
                &aref,
                &attempt_id,
                AttemptOutcome::Killed,
                Counters::new(),
                vec!["tracker perdido".to_string()],
            );
        }
        dead
    }

    /// Cierra los jobs RUNNING que ya no tienen nada pendiente (por ejemplo,
    /// jobs sin tareas).
    pub fn finish_idle_jobs(&mut self) -> Vec<JobId> {
        let now = Utc::now();
        let mut done = Vec::new();
        for (id, job) in self.jobs.iter_mut() {
            if job.state == JobState::Running && job.all_done() {
                job.state = JobState::Succeeded;
                job.finish_time = Some(now);
                info!("job {} terminó con éxito", id);
                done.push(id.clone());
            }
        }
        done
    }

    pub fn tracker_metrics(&self, now: SystemTime) -> Vec<TrackerMetrics> {
        let mut running: HashMap<&str, u32> = HashMap::new();
        for job in self.jobs.values() {
            for tip in job.maps.iter().chain(job.reduces.iter()) {
                for a in tip.attempts.iter().filter(|a| a.state == AttemptState::Running) {
                    *running.entry(a.tracker_id.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut out: Vec<TrackerMetrics> = self
            .trackers
            .iter()
            .map(|(tid, meta)| {
                let age_secs = now
                    .duration_since(meta.last_heartbeat)
                    .unwrap_or_default()
                    .as_secs();
                let finished = meta.tasks_succeeded + meta.tasks_failed;
                let avg_ms = if finished > 0 {
                    Some(meta.total_task_time_ms as f64 / finished as f64)
                } else {
                    None
                };

                TrackerMetrics {
                    tracker_id: tid.clone(),
                    hostname: meta.hostname.clone(),
                    dead: meta.dead,
                    map_slots: meta.map_slots,
                    reduce_slots: meta.reduce_slots,
                    last_heartbeat_secs_ago: age_secs,
                    running_attempts: running.get(tid.as_str()).copied().unwrap_or(0),
                    tasks_started: meta.tasks_started,
                    tasks_succeeded: meta.tasks_succeeded,
                    tasks_failed: meta.tasks_failed,
                    avg_task_ms: avg_ms,
                    cpu_percent: meta.last_cpu_percent,
                    mem_bytes: meta.last_mem_bytes,
                }
            })
            .collect();
        out.sort_by(|a, b| a.hostname.cmp(&b.hostname).then(a.tracker_id.cmp(&b.tracker_id)));
        out
    }
}
