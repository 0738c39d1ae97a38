pub mod counters;
pub mod error;
pub mod job;
pub mod protocol;
pub mod task;
pub mod worker;

pub use counters::Counters;
pub use error::ProtocolError;
pub use job::{
    ClusterStatus, CoordinatorState, JobDescriptor, JobId, JobPriority, JobProfile, JobState,
    JobStatus,
};
pub use protocol::{
    ensure_version, ErrorBody, EventsQuery, FilesystemNameResponse, JobIdResponse,
    JobSubmissionProtocol, KillTaskRequest, KillTaskResponse, ProtocolInfo, SubmitJobRequest,
    PROTOCOL_NAME, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER,
};
pub use task::{
    AttemptId, InputSplit, TaskAssignment, TaskCompletionEvent, TaskCompletionStatus, TaskId,
    TaskKind, TaskReport, TipState,
};
pub use worker::{
    TaskCompleteRequest, TaskCompleteResponse, TrackerAssignmentRequest,
    TrackerAssignmentResponse, TrackerHeartbeatRequest, TrackerHeartbeatResponse, TrackerId,
    TrackerMetrics, TrackerRegisterRequest, TrackerRegisterResponse,
};
