// master/src/protocol.rs

use async_trait::async_trait;
use common::{
    AttemptId, ClusterStatus, Counters, JobDescriptor, JobId, JobProfile, JobStatus,
    JobSubmissionProtocol, ProtocolError, TaskCompletionEvent, TaskId, TaskKind, TaskReport,
};
use tracing::{error, info};

use crate::jobs::InitRequest;
use crate::splits::compute_splits;
use crate::state::AppState;

/// El coordinador es la implementación real del protocolo; los handlers
/// HTTP sólo traducen.
#[async_trait]
impl JobSubmissionProtocol for AppState {
    async fn get_new_job_id(&self) -> Result<JobId, ProtocolError> {
        Ok(self.lock().new_job_id())
    }

    async fn submit_job(
        &self,
        job_id: &JobId,
        descriptor: JobDescriptor,
    ) -> Result<JobStatus, ProtocolError> {
        let submission = self.lock().submit(
            job_id,
            descriptor,
            self.config.split_size,
            self.config.max_jobs,
        )?;

        if let Some(init) = submission.init {
            // los splits tocan el filesystem: fuera del runtime async
            let state = self.clone();
            tokio::task::spawn_blocking(move || initialize_job(&state, init));
        }
        Ok(submission.status)
    }

    async fn get_cluster_status(&self) -> Result<ClusterStatus, ProtocolError> {
        Ok(self.lock().cluster_status())
    }

    async fn kill_job(&self, job_id: &JobId) -> Result<(), ProtocolError> {
        self.lock().kill_job(job_id);
        Ok(())
    }

    async fn kill_task(
        &self,
        attempt_id: &AttemptId,
        should_fail: bool,
    ) -> Result<bool, ProtocolError> {
        Ok(self.lock().kill_attempt(attempt_id, should_fail))
    }

    async fn get_job_profile(&self, job_id: &JobId) -> Result<Option<JobProfile>, ProtocolError> {
        Ok(self.lock().job_profile(job_id))
    }

    async fn get_job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>, ProtocolError> {
        Ok(self.lock().job_status(job_id))
    }

    async fn get_job_counters(&self, job_id: &JobId) -> Result<Option<Counters>, ProtocolError> {
        Ok(self.lock().job_counters(job_id))
    }

    async fn get_map_task_reports(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<TaskReport>, ProtocolError> {
        Ok(self.lock().task_reports(job_id, TaskKind::Map))
    }

    async fn get_reduce_task_reports(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<TaskReport>, ProtocolError> {
        Ok(self.lock().task_reports(job_id, TaskKind::Reduce))
    }

    async fn get_filesystem_name(&self) -> Result<String, ProtocolError> {
        Ok(self
            .fs
            .connection_uri()
            .unwrap_or_else(|| self.fs.uri())
            .to_string())
    }

    async fn jobs_to_complete(&self) -> Result<Vec<JobStatus>, ProtocolError> {
        Ok(self.lock().jobs_to_complete())
    }

    async fn get_all_jobs(&self) -> Result<Vec<JobStatus>, ProtocolError> {
        Ok(self.lock().all_jobs())
    }

    async fn get_task_completion_events(
        &self,
        job_id: &JobId,
        from_event_id: u32,
        max_events: u32,
    ) -> Result<Vec<TaskCompletionEvent>, ProtocolError> {
        Ok(self
            .lock()
            .completion_events(job_id, from_event_id, max_events))
    }

    async fn get_task_diagnostics(
        &self,
        job_id: &JobId,
        task_id: &TaskId,
        attempt_id: &AttemptId,
    ) -> Result<Vec<String>, ProtocolError> {
        Ok(self.lock().task_diagnostics(job_id, task_id, attempt_id))
    }
}

/// Calcula los splits sin el lock tomado y después instala las tareas.
pub fn initialize_job(state: &AppState, init: InitRequest) {
    match compute_splits(&state.fs, &init.input_paths, init.split_size) {
        Ok(splits) => {
            let n = splits.len();
            if state.lock().install_tasks(&init.job_id, splits) {
                info!("job {} listo con {} splits", init.job_id, n);
            }
        }
        Err(e) => {
            error!("no se pudieron calcular los splits de {}: {:#}", init.job_id, e);
            state.lock().fail_init(&init.job_id, &format!("{e:#}"));
        }
    }
}
