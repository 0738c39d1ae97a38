use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::counters::Counters;
use crate::job::JobId;

/// Id de la tarea lógica (task-in-progress), ej: `task_202610170930_0001_m_000003`
pub type TaskId = String;
/// Id de un intento concreto, ej: `attempt_202610170930_0001_m_000003_0`
pub type AttemptId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Map,
    Reduce,
}

impl TaskKind {
    /// Letra usada dentro de los ids ("m" / "r").
    pub fn tag(self) -> &'static str {
        match self {
            TaskKind::Map => "m",
            TaskKind::Reduce => "r",
        }
    }
}

/// Rango de bytes de un archivo que procesa una tarea map,
/// junto con los hosts que guardan esos bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSplit {
    pub path: String,
    pub offset: u64,
    pub length: u64,
    /// Puede estar vacío si no hay información de localidad
    pub hosts: Vec<String>,
}

/// Lo que recibe un tracker cuando pide trabajo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub attempt_id: AttemptId,
    pub task_id: TaskId,
    pub job_id: JobId,
    pub kind: TaskKind,
    pub split: Option<InputSplit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TipState {
    Pending,
    Running,
    Complete,
    Failed,
    Killed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub state: TipState,
    pub progress: f32,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    /// Hosts preferidos del split (sólo maps)
    pub split_hosts: Vec<String>,
    pub diagnostics: Vec<String>,
    pub counters: Counters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskCompletionStatus {
    Succeeded,
    Failed,
    Killed,
    Obsolete,
    /// El intento falló y la tarea agotó sus reintentos
    TipFailed,
}

/// Entrada del log de finalizaciones de un job. Los ids crecen de uno en uno
/// desde 0 y nunca se reutilizan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletionEvent {
    pub event_id: u32,
    pub attempt_id: AttemptId,
    pub task_index: u32,
    pub is_map: bool,
    pub status: TaskCompletionStatus,
    pub tracker_host: String,
    pub run_time_ms: u64,
}
