//! Cliente HTTP del protocolo de envío de jobs.
//!
//! Cada request lleva el header de versión y cada respuesta se verifica
//! contra él: si el coordinador habla otra versión la llamada falla con
//! `VersionMismatch` sin mirar el cuerpo.

use async_trait::async_trait;
use common::{
    ensure_version, AttemptId, ClusterStatus, Counters, ErrorBody, FilesystemNameResponse,
    JobDescriptor, JobId, JobIdResponse, JobProfile, JobStatus, JobSubmissionProtocol,
    KillTaskRequest, KillTaskResponse, ProtocolError, ProtocolInfo, SubmitJobRequest,
    TaskCompletionEvent, TaskId, TaskReport, TrackerMetrics, PROTOCOL_NAME, PROTOCOL_VERSION,
    PROTOCOL_VERSION_HEADER,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

pub struct JobClient {
    http: Client,
    base_url: String,
}

impl JobClient {
    /// Construye el cliente sin hablar con el coordinador.
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Construye el cliente y verifica nombre y versión del protocolo.
    pub async fn connect(base_url: &str) -> Result<Self, ProtocolError> {
        let client = Self::new(base_url);
        let info: ProtocolInfo = client
            .required(client.http.get(client.url(&["protocol"])?))
            .await?;
        if info.name != PROTOCOL_NAME || info.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                client: PROTOCOL_VERSION,
                server: info.version,
            });
        }
        Ok(client)
    }

    /// Arma `<base>/api/v1/<segmentos>`. Cada segmento va codificado entero,
    /// así un id con `/`, `?` o `%` no cambia la ruta.
    fn url(&self, segments: &[&str]) -> Result<Url, ProtocolError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProtocolError::Transport(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| ProtocolError::Transport(format!("{} no admite rutas", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    /// Manda el request. `None` para un 404; cualquier otro estado no
    /// exitoso se traduce a `ProtocolError`.
    async fn execute(&self, req: RequestBuilder) -> Result<Option<Response>, ProtocolError> {
        let resp = req
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION.to_string())
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let announced = resp
            .headers()
            .get(PROTOCOL_VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        ensure_version(announced.as_deref())?;

        let status = resp.status();
        if status.is_success() {
            return Ok(Some(resp));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: Option<ErrorBody> = resp.json().await.ok();
        let message = body
            .as_ref()
            .map(|b| b.message.clone())
            .unwrap_or_else(|| status.to_string());
        Err(match status {
            StatusCode::BAD_REQUEST => ProtocolError::InvalidJob(message),
            StatusCode::SERVICE_UNAVAILABLE => ProtocolError::OverCapacity {
                limit: body.and_then(|b| b.limit).unwrap_or(0),
            },
            // el coordinador devuelve la versión que recibió
            StatusCode::CONFLICT => ProtocolError::VersionMismatch {
                client: body.and_then(|b| b.client_version).unwrap_or(0),
                server: announced
                    .as_deref()
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
            },
            other => ProtocolError::Remote {
                status: other.as_u16(),
                message,
            },
        })
    }

    async fn optional<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Option<T>, ProtocolError> {
        match self.execute(req).await? {
            Some(resp) => resp
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| ProtocolError::Transport(e.to_string())),
            None => Ok(None),
        }
    }

    async fn required<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ProtocolError> {
        self.optional(req).await?.ok_or_else(|| ProtocolError::Remote {
            status: StatusCode::NOT_FOUND.as_u16(),
            message: "recurso inexistente".to_string(),
        })
    }

    /// Listas: un 404 es una lista vacía.
    async fn list<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Vec<T>, ProtocolError> {
        Ok(self.optional(req).await?.unwrap_or_default())
    }

    /// Trackers registrados (fuera del contrato del protocolo).
    pub async fn list_trackers(&self) -> Result<Vec<TrackerMetrics>, ProtocolError> {
        self.list(self.http.get(self.url(&["trackers"])?)).await
    }
}

#[async_trait]
impl JobSubmissionProtocol for JobClient {
    async fn get_new_job_id(&self) -> Result<JobId, ProtocolError> {
        let JobIdResponse { job_id } = self
            .required(self.http.post(self.url(&["job-ids"])?))
            .await?;
        Ok(job_id)
    }

    async fn submit_job(
        &self,
        job_id: &JobId,
        descriptor: JobDescriptor,
    ) -> Result<JobStatus, ProtocolError> {
        let body = SubmitJobRequest {
            job_id: job_id.clone(),
            descriptor,
        };
        self.required(self.http.post(self.url(&["jobs"])?).json(&body))
            .await
    }

    async fn get_cluster_status(&self) -> Result<ClusterStatus, ProtocolError> {
        self.required(self.http.get(self.url(&["cluster", "status"])?))
            .await
    }

    async fn kill_job(&self, job_id: &JobId) -> Result<(), ProtocolError> {
        self.execute(self.http.post(self.url(&["jobs", job_id.as_str(), "kill"])?))
            .await?;
        Ok(())
    }

    async fn kill_task(
        &self,
        attempt_id: &AttemptId,
        should_fail: bool,
    ) -> Result<bool, ProtocolError> {
        let resp: Option<KillTaskResponse> = self
            .optional(
                self.http
                    .post(self.url(&["attempts", attempt_id.as_str(), "kill"])?)
                    .json(&KillTaskRequest { should_fail }),
            )
            .await?;
        Ok(resp.map(|r| r.killed).unwrap_or(false))
    }

    async fn get_job_profile(&self, job_id: &JobId) -> Result<Option<JobProfile>, ProtocolError> {
        self.optional(self.http.get(self.url(&["jobs", job_id.as_str(), "profile"])?))
            .await
    }

    async fn get_job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>, ProtocolError> {
        self.optional(self.http.get(self.url(&["jobs", job_id.as_str()])?))
            .await
    }

    async fn get_job_counters(&self, job_id: &JobId) -> Result<Option<Counters>, ProtocolError> {
        self.optional(self.http.get(self.url(&["jobs", job_id.as_str(), "counters"])?))
            .await
    }

    async fn get_map_task_reports(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<TaskReport>, ProtocolError> {
        self.list(self.http.get(self.url(&["jobs", job_id.as_str(), "tasks", "map"])?))
            .await
    }

    async fn get_reduce_task_reports(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<TaskReport>, ProtocolError> {
        self.list(self.http.get(self.url(&["jobs", job_id.as_str(), "tasks", "reduce"])?))
            .await
    }

    async fn get_filesystem_name(&self) -> Result<String, ProtocolError> {
        let FilesystemNameResponse { name } = self
            .required(self.http.get(self.url(&["cluster", "filesystem"])?))
            .await?;
        Ok(name)
    }

    async fn jobs_to_complete(&self) -> Result<Vec<JobStatus>, ProtocolError> {
        self.list(self.http.get(self.url(&["cluster", "jobs", "incomplete"])?))
            .await
    }

    async fn get_all_jobs(&self) -> Result<Vec<JobStatus>, ProtocolError> {
        self.list(self.http.get(self.url(&["cluster", "jobs", "all"])?))
            .await
    }

    async fn get_task_completion_events(
        &self,
        job_id: &JobId,
        from_event_id: u32,
        max_events: u32,
    ) -> Result<Vec<TaskCompletionEvent>, ProtocolError> {
        self.list(
            self.http
                .get(self.url(&["jobs", job_id.as_str(), "events"])?)
                .query(&[("from", from_event_id), ("max", max_events)]),
        )
        .await
    }

    async fn get_task_diagnostics(
        &self,
        job_id: &JobId,
        task_id: &TaskId,
        attempt_id: &AttemptId,
    ) -> Result<Vec<String>, ProtocolError> {
        let url = self.url(&[
            "jobs",
            job_id.as_str(),
            "tasks",
            task_id.as_str(),
            "attempts",
            attempt_id.as_str(),
            "diagnostics",
        ])?;
        self.list(self.http.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{JobPriority, JobState};
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn status_json(id: &str, state: &str) -> String {
        json!({
            "job_id": id,
            "state": state,
            "map_progress": 0.0,
            "reduce_progress": 0.0,
            "start_time": "2024-01-01T00:00:00Z",
            "finish_time": null,
            "priority": "NORMAL",
            "user": "ana",
            "failed_tasks": 0,
            "killed_tasks": 0
        })
        .to_string()
    }

    /* ============ versión ============ */

    #[tokio::test]
    async fn connect_acepta_la_misma_version() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/v1/protocol")
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(r#"{"name":"JobSubmissionProtocol","version":7}"#)
            .create_async()
            .await;

        assert!(JobClient::connect(&server.url()).await.is_ok());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn connect_rechaza_otra_version() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/protocol")
            .with_header(PROTOCOL_VERSION_HEADER, "6")
            .with_body(r#"{"name":"JobSubmissionProtocol","version":6}"#)
            .create_async()
            .await;

        let err = JobClient::connect(&server.url()).await.err().unwrap();
        assert_eq!(
            err,
            ProtocolError::VersionMismatch {
                client: 7,
                server: 6
            }
        );
    }

    #[tokio::test]
    async fn respuesta_sin_header_de_version_es_mismatch() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/cluster/jobs/all")
            .with_body("[]")
            .create_async()
            .await;

        let client = JobClient::new(&server.url());
        assert!(matches!(
            client.get_all_jobs().await,
            Err(ProtocolError::VersionMismatch { server: 0, .. })
        ));
    }

    /* ============ operaciones ============ */

    #[tokio::test]
    async fn submit_manda_el_descriptor_con_el_header_de_version() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/v1/jobs")
            .match_header(PROTOCOL_VERSION_HEADER, "7")
            .match_body(Matcher::PartialJson(json!({
                "job_id": "job_1_0001",
                "descriptor": { "name": "wc", "user": "ana", "num_reduces": 1 }
            })))
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(status_json("job_1_0001", "PREP"))
            .create_async()
            .await;

        let client = JobClient::new(&server.url());
        let status = client
            .submit_job(
                &"job_1_0001".to_string(),
                JobDescriptor {
                    name: "wc".into(),
                    user: "ana".into(),
                    input_paths: vec!["/datos".into()],
                    num_reduces: 1,
                    priority: JobPriority::Normal,
                    split_size: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(status.state, JobState::Prep);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn job_desconocido_es_none() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/jobs/job_x")
            .with_status(404)
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(r#"{"error":"not_found","message":"job job_x"}"#)
            .create_async()
            .await;

        let client = JobClient::new(&server.url());
        assert!(client
            .get_job_status(&"job_x".to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn id_con_caracteres_de_ruta_viaja_como_un_solo_segmento() {
        let mut server = Server::new_async().await;
        let barra = server
            .mock("GET", "/api/v1/jobs/job%2Fx")
            .with_status(404)
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(r#"{"error":"not_found","message":"job job/x"}"#)
            .create_async()
            .await;
        let pregunta = server
            .mock("GET", "/api/v1/jobs/job%3Fx/counters")
            .with_status(404)
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .create_async()
            .await;

        let client = JobClient::new(&server.url());
        assert!(matches!(
            client.get_job_status(&"job/x".into()).await,
            Ok(None)
        ));
        assert!(matches!(
            client.get_job_counters(&"job?x".into()).await,
            Ok(None)
        ));
        barra.assert_async().await;
        pregunta.assert_async().await;
    }

    #[tokio::test]
    async fn conflicto_de_version_trae_las_dos_versiones_reales() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/cluster/status")
            .with_status(409)
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(
                r#"{"error":"version_mismatch","message":"versión 0 contra 7","client_version":0}"#,
            )
            .create_async()
            .await;

        let client = JobClient::new(&server.url());
        assert_eq!(
            client.get_cluster_status().await.err(),
            Some(ProtocolError::VersionMismatch {
                client: 0,
                server: 7
            })
        );
    }

    #[tokio::test]
    async fn errores_http_se_traducen_a_protocol_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/jobs")
            .with_status(503)
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(r#"{"error":"over_capacity","message":"lleno","limit":4}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/api/v1/job-ids")
            .with_status(400)
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(r#"{"error":"invalid_job","message":"malo"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/cluster/status")
            .with_status(500)
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body("boom")
            .create_async()
            .await;

        let client = JobClient::new(&server.url());
        let desc = JobDescriptor {
            name: "wc".into(),
            user: "ana".into(),
            input_paths: vec![],
            num_reduces: 0,
            priority: JobPriority::Normal,
            split_size: None,
        };
        assert_eq!(
            client.submit_job(&"job_1".to_string(), desc).await.err(),
            Some(ProtocolError::OverCapacity { limit: 4 })
        );
        assert_eq!(
            client.get_new_job_id().await.err(),
            Some(ProtocolError::InvalidJob("malo".into()))
        );
        assert!(matches!(
            client.get_cluster_status().await,
            Err(ProtocolError::Remote { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn coordinador_caido_es_transport() {
        // puerto reservado y cerrado
        let client = JobClient::new("http://127.0.0.1:9");
        assert!(matches!(
            client.jobs_to_complete().await,
            Err(ProtocolError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn eventos_viajan_con_from_y_max() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/v1/jobs/job_1/events")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("from".into(), "3".into()),
                Matcher::UrlEncoded("max".into(), "2".into()),
            ]))
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(
                json!([{
                    "event_id": 3,
                    "attempt_id": "attempt_1_m_000000_0",
                    "task_index": 0,
                    "is_map": true,
                    "status": "SUCCEEDED",
                    "tracker_host": "h1",
                    "run_time_ms": 12
                }])
                .to_string(),
            )
            .create_async()
            .await;

        let client = JobClient::new(&server.url());
        let events = client
            .get_task_completion_events(&"job_1".to_string(), 3, 2)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, 3);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn kill_task_desconocido_es_false() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/attempts/attempt_x/kill")
            .match_body(Matcher::Json(json!({ "should_fail": true })))
            .with_header(PROTOCOL_VERSION_HEADER, "7")
            .with_body(r#"{"killed":false}"#)
            .create_async()
            .await;

        let client = JobClient::new(&server.url());
        assert!(!client
            .kill_task(&"attempt_x".to_string(), true)
            .await
            .unwrap());
    }
}
