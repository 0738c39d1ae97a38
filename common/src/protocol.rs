//! Contrato entre el cliente de jobs y el coordinador.
//!
//! Historial de versiones:
//! - 2: cambia `get_task_completion_events`
//! - 3: `kill_task` recibe `should_fail`
//! - 4: el estado del coordinador se agrega a `ClusterStatus`
//! - 5: `max_tasks` se separa en `max_map_tasks` y `max_reduce_tasks`
//! - 6: cambia la representación de los contadores
//! - 7: se agrega `get_all_jobs`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::counters::Counters;
use crate::error::ProtocolError;
use crate::job::{ClusterStatus, JobDescriptor, JobId, JobProfile, JobStatus};
use crate::task::{AttemptId, TaskCompletionEvent, TaskId, TaskReport};

pub const PROTOCOL_NAME: &str = "JobSubmissionProtocol";
pub const PROTOCOL_VERSION: u64 = 7;
/// Header que viaja en cada request y cada response de `/api`.
pub const PROTOCOL_VERSION_HEADER: &str = "x-protocol-version";

/// Compara la versión anunciada por la otra punta con la nuestra.
/// Un header ausente o ilegible cuenta como versión 0.
pub fn ensure_version(announced: Option<&str>) -> Result<(), ProtocolError> {
    let server = announced
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if server == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ProtocolError::VersionMismatch {
            client: PROTOCOL_VERSION,
            server,
        })
    }
}

/// Operaciones del protocolo de envío de jobs.
///
/// Todas son request/response bloqueantes contra el coordinador. Las
/// consultas por id devuelven `None` o vacío cuando el id no existe, y
/// `kill_job` / `kill_task` son idempotentes.
#[async_trait]
pub trait JobSubmissionProtocol: Send + Sync {
    /// Reserva un id único para un job que se enviará después.
    async fn get_new_job_id(&self) -> Result<JobId, ProtocolError>;

    /// Envía el job con un id previamente reservado. Devuelve el estado inicial.
    async fn submit_job(
        &self,
        job_id: &JobId,
        descriptor: JobDescriptor,
    ) -> Result<JobStatus, ProtocolError>;

    async fn get_cluster_status(&self) -> Result<ClusterStatus, ProtocolError>;

    async fn kill_job(&self, job_id: &JobId) -> Result<(), ProtocolError>;

    /// Mata un intento. Con `should_fail` el intento cuenta como fallido
    /// (y puede hacer fallar al job); sin él sólo se reprograma.
    /// `false` si el intento no existe.
    async fn kill_task(&self, attempt_id: &AttemptId, should_fail: bool)
        -> Result<bool, ProtocolError>;

    async fn get_job_profile(&self, job_id: &JobId) -> Result<Option<JobProfile>, ProtocolError>;

    async fn get_job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>, ProtocolError>;

    async fn get_job_counters(&self, job_id: &JobId) -> Result<Option<Counters>, ProtocolError>;

    async fn get_map_task_reports(&self, job_id: &JobId)
        -> Result<Vec<TaskReport>, ProtocolError>;

    async fn get_reduce_task_reports(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<TaskReport>, ProtocolError>;

    /// Nombre del filesystem por defecto del cluster.
    async fn get_filesystem_name(&self) -> Result<String, ProtocolError>;

    /// Jobs que todavía no terminaron (PREP o RUNNING).
    async fn jobs_to_complete(&self) -> Result<Vec<JobStatus>, ProtocolError>;

    async fn get_all_jobs(&self) -> Result<Vec<JobStatus>, ProtocolError>;

    /// Hasta `max_events` eventos con id >= `from_event_id`, en orden.
    /// Una lista vacía significa "volver a preguntar más tarde".
    async fn get_task_completion_events(
        &self,
        job_id: &JobId,
        from_event_id: u32,
        max_events: u32,
    ) -> Result<Vec<TaskCompletionEvent>, ProtocolError>;

    async fn get_task_diagnostics(
        &self,
        job_id: &JobId,
        task_id: &TaskId,
        attempt_id: &AttemptId,
    ) -> Result<Vec<String>, ProtocolError>;
}

/* --------- Mensajes HTTP --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub name: String,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdResponse {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub job_id: JobId,
    pub descriptor: JobDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillTaskRequest {
    pub should_fail: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillTaskResponse {
    pub killed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemNameResponse {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub from: u32,
    #[serde(default = "default_max_events")]
    pub max: u32,
}

fn default_max_events() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    /// Sólo en respuestas de capacidad agotada
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Versión que el coordinador recibió, sólo en un 409
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<u64>,
}
