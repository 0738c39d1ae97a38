// master/src/jobs.rs
//
// Ciclo de vida de los jobs dentro del coordinador: ids, envío,
// inicialización, kill y todas las consultas del protocolo.

use chrono::Utc;
use common::{
    AttemptId, ClusterStatus, Counters, InputSplit, JobDescriptor, JobId, JobProfile, JobState,
    JobStatus, ProtocolError, TaskCompletionEvent, TaskId, TaskKind, TaskReport, TipState,
};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::scheduler::AttemptOutcome;
use crate::state::{AttemptState, JobInProgress, JobTracker, TaskInProgress};

/// Lo que hace falta para calcular los splits de un job fuera del lock.
#[derive(Debug, Clone)]
pub struct InitRequest {
    pub job_id: JobId,
    pub input_paths: Vec<String>,
    pub split_size: u64,
}

pub struct Submission {
    pub status: JobStatus,
    /// `None` si el job ya estaba enviado
    pub init: Option<InitRequest>,
}

impl JobTracker {
    /* ---------------- envío ---------------- */

    pub fn new_job_id(&mut self) -> JobId {
        self.next_job_seq += 1;
        let id = format!("job_{}_{:04}", self.stamp, self.next_job_seq);
        self.reserved.insert(id.clone(), SystemTime::now());
        id
    }

    /// Registra el job en PREP. Reenviar un id ya enviado devuelve el
    /// estado actual sin tocar nada.
    pub fn submit(
        &mut self,
        job_id: &JobId,
        desc: JobDescriptor,
        default_split_size: u64,
        max_jobs: usize,
    ) -> Result<Submission, ProtocolError> {
        if let Some(job) = self.jobs.get(job_id) {
            return Ok(Submission {
                status: job.status(),
                init: None,
            });
        }
        if !self.reserved.contains_key(job_id) {
            return Err(ProtocolError::InvalidJob(format!(
                "{job_id} no fue reservado con get_new_job_id"
            )));
        }
        if desc.name.trim().is_empty() {
            return Err(ProtocolError::InvalidJob("el job no tiene nombre".into()));
        }
        if desc.user.trim().is_empty() {
            return Err(ProtocolError::InvalidJob("el job no tiene usuario".into()));
        }
        if desc.split_size == Some(0) {
            return Err(ProtocolError::InvalidJob("split_size debe ser > 0".into()));
        }

        let incomplete = self
            .jobs
            .values()
            .filter(|j| !j.state.is_terminal())
            .count();
        if incomplete >= max_jobs {
            warn!(
                "rechazando job {}: ya hay {} jobs sin terminar",
                job_id, incomplete
            );
            return Err(ProtocolError::OverCapacity { limit: max_jobs });
        }

        let split_size = desc.split_size.unwrap_or(default_split_size);
        let job = JobInProgress::new(job_id.clone(), desc);
        let init = InitRequest {
            job_id: job_id.clone(),
            input_paths: job.profile.input_paths.clone(),
            split_size,
        };
        let status = job.status();

        self.reserved.remove(job_id);
        self.jobs.insert(job_id.clone(), job);
        self.job_order.push(job_id.clone());

        info!(
            "job {} enviado ({} inputs, split_size={})",
            job_id,
            init.input_paths.len(),
            split_size
        );
        Ok(Submission {
            status,
            init: Some(init),
        })
    }

    /// Descarta las reservas más viejas que `ttl` que nunca se enviaron.
    /// Devuelve cuántas se tiraron.
    pub fn expire_reservations(&mut self, now: SystemTime, ttl: Duration) -> usize {
        let before = self.reserved.len();
        self.reserved.retain(|_, reserved_at| {
            now.duration_since(*reserved_at)
                .map(|age| age <= ttl)
                .unwrap_or(true)
        });
        before - self.reserved.len()
    }

    /// Crea las tareas del job y lo pasa a RUNNING. No hace nada si el job
    /// dejó de estar en PREP mientras se calculaban los splits.
    pub fn install_tasks(&mut self, job_id: &JobId, splits: Vec<InputSplit>) -> bool {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return false;
        };
        if job.state != JobState::Prep {
            info!("job {} ya no está en PREP, se descartan sus splits", job_id);
            return false;
        }

        job.maps = splits
            .into_iter()
            .enumerate()
            .map(|(i, split)| TaskInProgress::new(job_id, TaskKind::Map, i as u32, Some(split)))
            .collect();
        job.reduces = (0..job.profile.num_reduces)
            .map(|i| TaskInProgress::new(job_id, TaskKind::Reduce, i, None))
            .collect();
        job.initialized = true;
        job.state = JobState::Running;
        job.launch_time = Some(Utc::now());

        info!(
            "job {} inicializado: {} maps, {} reduces",
            job_id,
            job.maps.len(),
            job.reduces.len()
        );
        true
    }

    pub fn fail_init(&mut self, job_id: &JobId, reason: &str) {
        if let Some(job) = self.jobs.get_mut(job_id) {
            if job.state.is_terminal() {
                return;
            }
            warn!("falló la inicialización del job {}: {}", job_id, reason);
            job.state = JobState::Failed;
            job.finish_time = Some(Utc::now());
        }
    }

    /* ---------------- kills ---------------- */

    /// Idempotente: un job desconocido o ya terminado no cambia.
    pub fn kill_job(&mut self, job_id: &JobId) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        if job.state.is_terminal() {
            return;
        }

        let to_kill = job.abort_tasks(TipState::Killed, "job matado por el usuario");
        job.state = JobState::Killed;
        job.finish_time = Some(Utc::now());
        info!(
            "job {} matado ({} intentos en curso)",
            job_id,
            to_kill.len()
        );
        self.notify_kills(to_kill);
    }

    /// `false` si el intento no existe. Un intento que ya terminó no cambia.
    pub fn kill_attempt(&mut self, attempt_id: &AttemptId, should_fail: bool) -> bool {
        let Some(aref) = self.attempts.get(attempt_id).cloned() else {
            return false;
        };

        let (outcome, reason) = if should_fail {
            (AttemptOutcome::Failed, "intento marcado como fallido por el usuario")
        } else {
            (AttemptOutcome::Killed, "intento matado por el usuario")
        };

        if let Some(tracker_id) = self.finish_attempt(
            &aref,
            attempt_id,
            outcome,
            Counters::new(),
            vec![reason.to_string()],
        ) {
            if let Some(meta) = self.trackers.get_mut(&tracker_id) {
                meta.pending_kills.push(attempt_id.clone());
            }
        }
        true
    }

    pub(crate) fn notify_kills(&mut self, to_kill: Vec<(AttemptId, String)>) {
        for (attempt_id, tracker_id) in to_kill {
            if let Some(meta) = self.trackers.get_mut(&tracker_id) {
                meta.pending_kills.push(attempt_id);
            }
        }
    }

    /* ---------------- consultas ---------------- */

    pub fn job_status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|j| j.status())
    }

    pub fn job_profile(&self, job_id: &JobId) -> Option<JobProfile> {
        self.jobs.get(job_id).map(|j| j.profile.clone())
    }

    pub fn job_counters(&self, job_id: &JobId) -> Option<Counters> {
        self.jobs.get(job_id).map(|j| j.total_counters())
    }

    pub fn task_reports(&self, job_id: &JobId, kind: TaskKind) -> Vec<TaskReport> {
        self.jobs
            .get(job_id)
            .map(|j| j.tasks(kind).iter().map(|t| t.report()).collect())
            .unwrap_or_default()
    }

    pub fn completion_events(
        &self,
        job_id: &JobId,
        from: u32,
        max: u32,
    ) -> Vec<TaskCompletionEvent> {
        self.jobs
            .get(job_id)
            .map(|j| {
                j.events
                    .iter()
                    .skip(from as usize)
                    .take(max as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn task_diagnostics(
        &self,
        job_id: &JobId,
        task_id: &TaskId,
        attempt_id: &AttemptId,
    ) -> Vec<String> {
        let Some(job) = self.jobs.get(job_id) else {
            return Vec::new();
        };
        job.maps
            .iter()
            .chain(job.reduces.iter())
            .find(|t| &t.id == task_id)
            .and_then(|t| t.attempts.iter().find(|a| &a.id == attempt_id))
            .map(|a| a.diagnostics.clone())
            .unwrap_or_default()
    }

    /// PREP y RUNNING, en orden de envío.
    pub fn jobs_to_complete(&self) -> Vec<JobStatus> {
        self.ordered_jobs()
            .filter(|j| !j.state.is_terminal())
            .map(|j| j.status())
            .collect()
    }

    pub fn all_jobs(&self) -> Vec<JobStatus> {
        self.ordered_jobs().map(|j| j.status()).collect()
    }

    pub(crate) fn ordered_jobs(&self) -> impl Iterator<Item = &JobInProgress> {
        self.job_order.iter().filter_map(|id| self.jobs.get(id))
    }

    pub fn cluster_status(&self) -> ClusterStatus {
        let live = self.trackers.values().filter(|t| !t.dead);

        let (mut max_map_tasks, mut max_reduce_tasks) = (0u32, 0u32);
        let mut task_trackers = 0u32;
        for meta in live {
            task_trackers += 1;
            max_map_tasks += meta.map_slots;
            max_reduce_tasks += meta.reduce_slots;
        }

        let (mut map_tasks, mut reduce_tasks) = (0u32, 0u32);
        for job in self.jobs.values() {
            for tip in job.maps.iter().chain(job.reduces.iter()) {
                let running = tip
                    .attempts
                    .iter()
                    .filter(|a| a.state == AttemptState::Running)
                    .count() as u32;
                match tip.kind {
                    TaskKind::Map => map_tasks += running,
                    TaskKind::Reduce => reduce_tasks += running,
                }
            }
        }

        ClusterStatus {
            task_trackers,
            dead_trackers: self.trackers.values().filter(|t| t.dead).count() as u32,
            map_tasks,
            reduce_tasks,
            max_map_tasks,
            max_reduce_tasks,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{descriptor, split};
    use common::counters::{JOB_COUNTERS, NUM_FAILED_MAPS, NUM_KILLED_MAPS};
    use common::{CoordinatorState, TaskCompletionStatus, TrackerRegisterRequest};

    const SPLIT: u64 = 1024;

    fn submitted(t: &mut JobTracker, name: &str) -> JobId {
        let id = t.new_job_id();
        t.submit(&id, descriptor(name, &["/datos"], 1), SPLIT, 10)
            .unwrap();
        id
    }

    fn register(t: &mut JobTracker, host: &str) -> String {
        t.register_tracker(TrackerRegisterRequest {
            hostname: host.to_string(),
            map_slots: 2,
            reduce_slots: 1,
        })
    }

    /* ============ ids y envío ============ */

    #[test]
    fn reservas_viejas_se_descartan() {
        let mut t = JobTracker::new();
        let viejo = t.new_job_id();
        let ttl = Duration::from_secs(600);

        assert_eq!(t.expire_reservations(SystemTime::now(), ttl), 0);
        let despues = SystemTime::now() + ttl + Duration::from_secs(1);
        let nuevo = t.new_job_id();
        t.reserved.insert(nuevo.clone(), despues);
        assert_eq!(t.expire_reservations(despues, ttl), 1);

        assert!(matches!(
            t.submit(&viejo, descriptor("wc", &["/datos"], 1), SPLIT, 10),
            Err(ProtocolError::InvalidJob(_))
        ));
        assert!(t
            .submit(&nuevo, descriptor("wc", &["/datos"], 1), SPLIT, 10)
            .is_ok());
    }

    #[test]
    fn new_job_id_no_repite_ids() {
        let mut t = JobTracker::new();
        let a = t.new_job_id();
        let b = t.new_job_id();
        assert_ne!(a, b);
        assert!(a.starts_with("job_"));
        assert!(a.ends_with("_0001"));
        assert!(b.ends_with("_0002"));
    }

    #[test]
    fn submit_deja_el_job_en_prep() {
        let mut t = JobTracker::new();
        let id = t.new_job_id();
        let sub = t
            .submit(&id, descriptor("wc", &["/datos"], 2), SPLIT, 10)
            .unwrap();

        assert_eq!(sub.status.state, JobState::Prep);
        assert_eq!(sub.status.user, "ana");
        let init = sub.init.unwrap();
        assert_eq!(init.split_size, SPLIT);
        assert_eq!(init.input_paths, vec!["/datos".to_string()]);
        assert_eq!(t.jobs_to_complete().len(), 1);
    }

    #[test]
    fn submit_con_id_no_reservado_es_invalid_job() {
        let mut t = JobTracker::new();
        let err = t
            .submit(&"job_x_0001".to_string(), descriptor("wc", &[], 0), SPLIT, 10)
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::InvalidJob(_)));
        assert!(t.all_jobs().is_empty());
    }

    #[test]
    fn submit_rechaza_descriptor_invalido() {
        let mut t = JobTracker::new();
        let id = t.new_job_id();

        let sin_nombre = descriptor("  ", &[], 0);
        assert!(matches!(
            t.submit(&id, sin_nombre, SPLIT, 10),
            Err(ProtocolError::InvalidJob(_))
        ));

        let mut split_cero = descriptor("wc", &[], 0);
        split_cero.split_size = Some(0);
        assert!(matches!(
            t.submit(&id, split_cero, SPLIT, 10),
            Err(ProtocolError::InvalidJob(_))
        ));

        // el id sigue reservado y se puede usar
        assert!(t.submit(&id, descriptor("wc", &[], 0), SPLIT, 10).is_ok());
    }

    #[test]
    fn submit_repetido_devuelve_el_estado_actual() {
        let mut t = JobTracker::new();
        let id = submitted(&mut t, "wc");
        t.install_tasks(&id, vec![split("/datos/a", &[])]);

        let again = t
            .submit(&id, descriptor("otro", &[], 0), SPLIT, 10)
            .unwrap();
        assert!(again.init.is_none());
        assert_eq!(again.status.state, JobState::Running);
        assert_eq!(t.all_jobs().len(), 1);
    }

    #[test]
    fn submit_sobre_el_limite_es_over_capacity() {
        let mut t = JobTracker::new();
        for i in 0..2 {
            let id = t.new_job_id();
            t.submit(&id, descriptor(&format!("j{i}"), &[], 0), SPLIT, 2)
                .unwrap();
        }
        let id = t.new_job_id();
        let err = t
            .submit(&id, descriptor("j2", &[], 0), SPLIT, 2)
            .err()
            .unwrap();
        assert_eq!(err, ProtocolError::OverCapacity { limit: 2 });
    }

    /* ============ inicialización ============ */

    #[test]
    fn install_tasks_crea_maps_y_reduces() {
        let mut t = JobTracker::new();
        let id = submitted(&mut t, "wc");

        assert!(t.install_tasks(&id, vec![split("/datos/a", &["h1"]), split("/datos/b", &[])]));

        let status = t.job_status(&id).unwrap();
        assert_eq!(status.state, JobState::Running);
        let maps = t.task_reports(&id, TaskKind::Map);
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[0].split_hosts, vec!["h1".to_string()]);
        assert!(maps.iter().all(|r| r.state == TipState::Pending));
        assert_eq!(t.task_reports(&id, TaskKind::Reduce).len(), 1);
        assert!(t.jobs[&id].launch_time.is_some());
    }

    #[test]
    fn install_tasks_ignora_jobs_matados_durante_la_inicializacion() {
        let mut t = JobTracker::new();
        let id = submitted(&mut t, "wc");
        t.kill_job(&id);

        assert!(!t.install_tasks(&id, vec![split("/datos/a", &[])]));
        assert_eq!(t.job_status(&id).unwrap().state, JobState::Killed);
        assert!(t.task_reports(&id, TaskKind::Map).is_empty());
    }

    #[test]
    fn fail_init_marca_el_job_como_fallido() {
        let mut t = JobTracker::new();
        let id = submitted(&mut t, "wc");
        t.fail_init(&id, "input inexistente");

        let status = t.job_status(&id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.finish_time.is_some());
        assert!(t.jobs_to_complete().is_empty());
    }

    /* ============ kills ============ */

    #[test]
    fn kill_job_es_idempotente_y_termina_el_job() {
        let mut t = JobTracker::new();
        let id = submitted(&mut t, "wc");
        t.install_tasks(&id, vec![split("/datos/a", &[])]);

        t.kill_job(&id);
        let first = t.job_status(&id).unwrap();
        t.kill_job(&id);
        let second = t.job_status(&id).unwrap();

        assert_eq!(first.state, JobState::Killed);
        assert_eq!(first.finish_time, second.finish_time);
        assert!(t
            .task_reports(&id, TaskKind::Map)
            .iter()
            .all(|r| r.state == TipState::Killed));

        // un id desconocido no es error
        t.kill_job(&"job_no_existe".to_string());
    }

    #[test]
    fn kill_job_avisa_a_los_trackers_con_intentos_en_curso() {
        let mut t = JobTracker::new();
        let tracker = register(&mut t, "h1");
        let id = submitted(&mut t, "wc");
        t.install_tasks(&id, vec![split("/datos/a", &[])]);
        let task = t.assign(&tracker).unwrap();

        t.kill_job(&id);

        assert_eq!(t.trackers[&tracker].pending_kills, vec![task.attempt_id.clone()]);
        let events = t.completion_events(&id, 0, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, TaskCompletionStatus::Killed);
        assert_eq!(t.job_status(&id).unwrap().killed_tasks, 1);
    }

    #[test]
    fn kill_attempt_desconocido_devuelve_false() {
        let mut t = JobTracker::new();
        assert!(!t.kill_attempt(&"attempt_x".to_string(), false));
    }

    #[test]
    fn kill_attempt_sin_fallar_reprograma_la_tarea() {
        let mut t = JobTracker::new();
        let tracker = register(&mut t, "h1");
        let id = submitted(&mut t, "wc");
        t.install_tasks(&id, vec![split("/datos/a", &[])]);
        let task = t.assign(&tracker).unwrap();

        assert!(t.kill_attempt(&task.attempt_id, false));

        let maps = t.task_reports(&id, TaskKind::Map);
        assert_eq!(maps[0].state, TipState::Pending);
        let counters = t.job_counters(&id).unwrap();
        assert_eq!(counters.value(JOB_COUNTERS, NUM_KILLED_MAPS), 1);
        assert_eq!(counters.value(JOB_COUNTERS, NUM_FAILED_MAPS), 0);
        assert_eq!(t.trackers[&tracker].pending_kills, vec![task.attempt_id.clone()]);

        // terminado: no cambia nada pero sigue siendo conocido
        assert!(t.kill_attempt(&task.attempt_id, true));
        let counters = t.job_counters(&id).unwrap();
        assert_eq!(counters.value(JOB_COUNTERS, NUM_FAILED_MAPS), 0);
    }

    #[test]
    fn kill_attempt_con_should_fail_cuenta_como_fallo() {
        let mut t = JobTracker::new();
        let tracker = register(&mut t, "h1");
        let id = submitted(&mut t, "wc");
        t.install_tasks(&id, vec![split("/datos/a", &[])]);
        let task = t.assign(&tracker).unwrap();

        assert!(t.kill_attempt(&task.attempt_id, true));

        let status = t.job_status(&id).unwrap();
        assert_eq!(status.failed_tasks, 1);
        assert_eq!(status.state, JobState::Running);
        let events = t.completion_events(&id, 0, 10);
        assert_eq!(events[0].status, TaskCompletionStatus::Failed);
        let diags = t.task_diagnostics(&id, &task.task_id, &task.attempt_id);
        assert_eq!(diags, vec!["intento marcado como fallido por el usuario".to_string()]);
    }

    /* ============ consultas ============ */

    #[test]
    fn consultas_de_un_job_desconocido_no_son_error() {
        let t = JobTracker::new();
        let id = "job_no_existe".to_string();
        assert!(t.job_status(&id).is_none());
        assert!(t.job_profile(&id).is_none());
        assert!(t.job_counters(&id).is_none());
        assert!(t.task_reports(&id, TaskKind::Map).is_empty());
        assert!(t.completion_events(&id, 0, 10).is_empty());
        assert!(t
            .task_diagnostics(&id, &"task_x".to_string(), &"attempt_x".to_string())
            .is_empty());
    }

    #[test]
    fn completion_events_respeta_from_y_max() {
        let mut t = JobTracker::new();
        let tracker = register(&mut t, "h1");
        let id = submitted(&mut t, "wc");
        t.install_tasks(&id, vec![split("/datos/a", &[])]);

        for _ in 0..3 {
            let task = t.assign(&tracker).unwrap();
            t.kill_attempt(&task.attempt_id, false);
        }

        let all = t.completion_events(&id, 0, 100);
        assert_eq!(all.len(), 3);
        assert_eq!(
            all.iter().map(|e| e.event_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let page = t.completion_events(&id, 1, 1);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].event_id, 1);
        assert!(t.completion_events(&id, 3, 10).is_empty());
        assert!(t.completion_events(&id, 0, 0).is_empty());
    }

    #[test]
    fn jobs_to_complete_excluye_terminados_y_all_jobs_no() {
        let mut t = JobTracker::new();
        let a = submitted(&mut t, "a");
        let b = submitted(&mut t, "b");
        t.kill_job(&a);

        let pending: Vec<_> = t.jobs_to_complete().into_iter().map(|s| s.job_id).collect();
        assert_eq!(pending, vec![b.clone()]);
        let all: Vec<_> = t.all_jobs().into_iter().map(|s| s.job_id).collect();
        assert_eq!(all, vec![a, b]);
    }

    #[test]
    fn cluster_status_cuenta_trackers_y_slots() {
        let mut t = JobTracker::new();
        assert_eq!(t.cluster_status().state, CoordinatorState::Initializing);
        t.mark_running();

        let tracker = register(&mut t, "h1");
        register(&mut t, "h2");
        let id = submitted(&mut t, "wc");
        t.install_tasks(&id, vec![split("/datos/a", &[])]);
        t.assign(&tracker).unwrap();

        let cs = t.cluster_status();
        assert_eq!(cs.state, CoordinatorState::Running);
        assert_eq!(cs.task_trackers, 2);
        assert_eq!(cs.dead_trackers, 0);
        assert_eq!(cs.max_map_tasks, 4);
        assert_eq!(cs.max_reduce_tasks, 2);
        assert_eq!(cs.map_tasks, 1);
        assert_eq!(cs.reduce_tasks, 0);
    }
}
