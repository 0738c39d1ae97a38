use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    ensure_version, ClusterStatus, Counters, ErrorBody, EventsQuery, FilesystemNameResponse,
    JobIdResponse, JobProfile, JobStatus, JobSubmissionProtocol, KillTaskRequest,
    KillTaskResponse, ProtocolError, ProtocolInfo, SubmitJobRequest, TaskCompleteRequest,
    TaskCompleteResponse, TaskCompletionEvent, TaskReport, TrackerAssignmentRequest,
    TrackerAssignmentResponse, TrackerHeartbeatRequest, TrackerHeartbeatResponse, TrackerMetrics,
    TrackerRegisterRequest, TrackerRegisterResponse, PROTOCOL_NAME, PROTOCOL_VERSION,
    PROTOCOL_VERSION_HEADER,
};
use std::time::SystemTime;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/job-ids", post(new_job_id))
        .route("/api/v1/jobs", post(submit_job))
        .route("/api/v1/jobs/:id", get(job_status))
        .route("/api/v1/jobs/:id/profile", get(job_profile))
        .route("/api/v1/jobs/:id/counters", get(job_counters))
        .route("/api/v1/jobs/:id/kill", post(kill_job))
        .route("/api/v1/jobs/:id/tasks/map", get(map_task_reports))
        .route("/api/v1/jobs/:id/tasks/reduce", get(reduce_task_reports))
        .route("/api/v1/jobs/:id/events", get(completion_events))
        .route(
            "/api/v1/jobs/:id/tasks/:tip/attempts/:attempt/diagnostics",
            get(task_diagnostics),
        )
        .route("/api/v1/attempts/:attempt/kill", post(kill_attempt))
        .route("/api/v1/cluster/status", get(cluster_status))
        .route("/api/v1/cluster/jobs/incomplete", get(jobs_to_complete))
        .route("/api/v1/cluster/jobs/all", get(all_jobs))
        .route("/api/v1/cluster/filesystem", get(filesystem_name))
        .route("/api/v1/trackers", get(list_trackers))
        .route("/api/v1/trackers/register", post(register_tracker))
        .route("/api/v1/trackers/heartbeat", post(tracker_heartbeat))
        .route("/api/v1/trackers/tasks/next", post(assign_task))
        .route("/api/v1/trackers/tasks/complete", post(complete_task))
        .route_layer(middleware::from_fn(check_version));

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/protocol", get(protocol_info))
        .merge(api)
        .fallback(unknown_route)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- errores ---------------- */

pub enum ApiError {
    NotFound(String),
    Protocol(ProtocolError),
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        ApiError::Protocol(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut client_version = None;
        let (status, error, limit, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", None, what),
            ApiError::Protocol(e) => {
                let message = e.to_string();
                match e {
                    ProtocolError::InvalidJob(_) => {
                        (StatusCode::BAD_REQUEST, "invalid_job", None, message)
                    }
                    ProtocolError::OverCapacity { limit } => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "over_capacity",
                        Some(limit),
                        message,
                    ),
                    ProtocolError::VersionMismatch { client, .. } => {
                        client_version = Some(client);
                        (StatusCode::CONFLICT, "version_mismatch", None, message)
                    }
                    ProtocolError::Transport(_) | ProtocolError::Remote { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal", None, message)
                    }
                }
            }
        };
        let body = ErrorBody {
            error: error.to_string(),
            message,
            limit,
            client_version,
        };
        (status, Json(body)).into_response()
    }
}

/* ---------------- versión ---------------- */

fn version_value() -> HeaderValue {
    HeaderValue::from(PROTOCOL_VERSION)
}

/// Rechaza con 409 cualquier request que no anuncie nuestra versión, antes
/// de tocar el estado.
async fn check_version(req: Request, next: Next) -> Response {
    let announced = req
        .headers()
        .get(PROTOCOL_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut resp = match ensure_version(announced.as_deref()) {
        Ok(()) => next.run(req).await,
        Err(_) => {
            let client = announced
                .as_deref()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0);
            warn!(
                "rechazando {} {}: el cliente habla la versión {}",
                req.method(),
                req.uri().path(),
                client
            );
            ApiError::Protocol(ProtocolError::VersionMismatch {
                client,
                server: PROTOCOL_VERSION,
            })
            .into_response()
        }
    };
    resp.headers_mut()
        .insert(PROTOCOL_VERSION_HEADER, version_value());
    resp
}

/// Un 404 fuera de las rutas conocidas también anuncia la versión, para
/// que el cliente lo lea como "no existe" y no como otra versión.
async fn unknown_route(uri: Uri) -> Response {
    let mut resp = ApiError::NotFound(format!("ruta {}", uri.path())).into_response();
    resp.headers_mut()
        .insert(PROTOCOL_VERSION_HEADER, version_value());
    resp
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn protocol_info() -> impl IntoResponse {
    (
        [(PROTOCOL_VERSION_HEADER, version_value())],
        Json(ProtocolInfo {
            name: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }),
    )
}

async fn new_job_id(State(state): State<AppState>) -> Result<Json<JobIdResponse>, ApiError> {
    let job_id = state.get_new_job_id().await?;
    Ok(Json(JobIdResponse { job_id }))
}

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<JobStatus>, ApiError> {
    let status = state.submit_job(&req.job_id, req.descriptor).await?;
    Ok(Json(status))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    state
        .get_job_status(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {id}")))
}

async fn job_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobProfile>, ApiError> {
    state
        .get_job_profile(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {id}")))
}

async fn job_counters(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Counters>, ApiError> {
    state
        .get_job_counters(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {id}")))
}

async fn kill_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.kill_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn kill_attempt(
    State(state): State<AppState>,
    Path(attempt): Path<String>,
    Json(req): Json<KillTaskRequest>,
) -> Result<Json<KillTaskResponse>, ApiError> {
    let killed = state.kill_task(&attempt, req.should_fail).await?;
    Ok(Json(KillTaskResponse { killed }))
}

async fn map_task_reports(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TaskReport>>, ApiError> {
    Ok(Json(state.get_map_task_reports(&id).await?))
}

async fn reduce_task_reports(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TaskReport>>, ApiError> {
    Ok(Json(state.get_reduce_task_reports(&id).await?))
}

async fn completion_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Vec<TaskCompletionEvent>>, ApiError> {
    Ok(Json(
        state
            .get_task_completion_events(&id, q.from, q.max)
            .await?,
    ))
}

async fn task_diagnostics(
    State(state): State<AppState>,
    Path((id, tip, attempt)): Path<(String, String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.get_task_diagnostics(&id, &tip, &attempt).await?))
}

async fn cluster_status(State(state): State<AppState>) -> Result<Json<ClusterStatus>, ApiError> {
    Ok(Json(state.get_cluster_status().await?))
}

async fn jobs_to_complete(State(state): State<AppState>) -> Result<Json<Vec<JobStatus>>, ApiError> {
    Ok(Json(state.jobs_to_complete().await?))
}

async fn all_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobStatus>>, ApiError> {
    Ok(Json(state.get_all_jobs().await?))
}

async fn filesystem_name(
    State(state): State<AppState>,
) -> Result<Json<FilesystemNameResponse>, ApiError> {
    let name = state.get_filesystem_name().await?;
    Ok(Json(FilesystemNameResponse { name }))
}

/* ---------------- trackers ---------------- */

async fn register_tracker(
    State(state): State<AppState>,
    Json(req): Json<TrackerRegisterRequest>,
) -> Json<TrackerRegisterResponse> {
    let tracker_id = state.lock().register_tracker(req);
    Json(TrackerRegisterResponse { tracker_id })
}

async fn tracker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<TrackerHeartbeatRequest>,
) -> Result<Json<TrackerHeartbeatResponse>, ApiError> {
    let kills = state
        .lock()
        .heartbeat(&req)
        .ok_or_else(|| ApiError::NotFound(format!("tracker {}", req.tracker_id)))?;
    if !kills.is_empty() {
        info!("tracker {} debe abortar {:?}", req.tracker_id, kills);
    }
    Ok(Json(TrackerHeartbeatResponse {
        ok: true,
        kill_attempts: kills,
    }))
}

async fn assign_task(
    State(state): State<AppState>,
    Json(req): Json<TrackerAssignmentRequest>,
) -> Json<TrackerAssignmentResponse> {
    let task = state.lock().assign(&req.tracker_id);
    Json(TrackerAssignmentResponse { task })
}

async fn complete_task(
    State(state): State<AppState>,
    Json(req): Json<TaskCompleteRequest>,
) -> Result<Json<TaskCompleteResponse>, ApiError> {
    let attempt_id = req.attempt_id.clone();
    if state.lock().complete_attempt(req) {
        Ok(Json(TaskCompleteResponse { ok: true }))
    } else {
        Err(ApiError::NotFound(format!("intento {attempt_id}")))
    }
}

async fn list_trackers(State(state): State<AppState>) -> Json<Vec<TrackerMetrics>> {
    Json(state.lock().tracker_metrics(SystemTime::now()))
}
