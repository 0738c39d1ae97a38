use serde::{Deserialize, Serialize};

use crate::counters::Counters;
use crate::task::{AttemptId, TaskAssignment};

pub type TrackerId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerRegisterRequest {
    /// Debe coincidir con los hosts que reporta la capa de localidad
    pub hostname: String,
    pub map_slots: u32,
    pub reduce_slots: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerRegisterResponse {
    pub tracker_id: TrackerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerHeartbeatRequest {
    pub tracker_id: TrackerId,
    pub cpu_percent: f32,
    pub mem_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerHeartbeatResponse {
    pub ok: bool,
    /// Intentos que el tracker debe abortar
    pub kill_attempts: Vec<AttemptId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerAssignmentRequest {
    pub tracker_id: TrackerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerAssignmentResponse {
    pub task: Option<TaskAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteRequest {
    pub attempt_id: AttemptId,
    pub success: bool,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteResponse {
    pub ok: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackerMetrics {
    pub tracker_id: TrackerId,
    pub hostname: String,
    pub dead: bool,
    pub map_slots: u32,
    pub reduce_slots: u32,
    pub last_heartbeat_secs_ago: u64,
    pub running_attempts: u32,
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub avg_task_ms: Option<f64>,
    pub cpu_percent: Option<f32>,
    pub mem_bytes: Option<u64>,
}
