use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = String;

/// Estado de un job dentro del coordinador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Aceptado, todavía sin tareas lanzadas
    Prep,
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Killed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    VeryHigh,
    High,
    #[default]
    Normal,
    Low,
    VeryLow,
}

/// Lo que el cliente envía junto con el id reservado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub user: String,

    /// Archivos, directorios o patrones glob de entrada.
    /// Un job sin entradas es válido (no genera tareas map).
    #[serde(default)]
    pub input_paths: Vec<String>,

    #[serde(default)]
    pub num_reduces: u32,

    #[serde(default)]
    pub priority: JobPriority,

    /// Tamaño de split en bytes; si no viene se usa el del coordinador.
    #[serde(default)]
    pub split_size: Option<u64>,
}

/// Foto del estado de un job en un instante dado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    /// Fracción en [0, 1]
    pub map_progress: f32,
    pub reduce_progress: f32,
    pub start_time: DateTime<Utc>,
    pub finish_time: Option<DateTime<Utc>>,
    pub priority: JobPriority,
    pub user: String,
    pub failed_tasks: u32,
    pub killed_tasks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProfile {
    pub job_id: JobId,
    pub name: String,
    pub user: String,
    pub input_paths: Vec<String>,
    pub num_reduces: u32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    Initializing,
    Running,
}

/// Resumen del cluster (trackers y slots).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub task_trackers: u32,
    pub dead_trackers: u32,
    /// Intentos map / reduce en ejecución ahora mismo
    pub map_tasks: u32,
    pub reduce_tasks: u32,
    pub max_map_tasks: u32,
    pub max_reduce_tasks: u32,
    pub state: CoordinatorState,
}
