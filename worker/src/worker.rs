use anyhow::{bail, Context, Result};
use common::counters::{BYTES_READ, FILESYSTEM_COUNTERS, MAP_INPUT_RECORDS, TASK_COUNTERS};
use common::{
    ensure_version, AttemptId, Counters, InputSplit, TaskAssignment, TaskCompleteRequest, TaskKind,
    TrackerAssignmentRequest, TrackerAssignmentResponse, TrackerHeartbeatRequest,
    TrackerHeartbeatResponse, TrackerId, TrackerRegisterRequest, TrackerRegisterResponse,
    PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER,
};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    env,
    fs::File,
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    sync::{Arc, Mutex},
    time::Duration,
};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const DEFAULT_MAP_SLOTS: u32 = 2;
const DEFAULT_REDUCE_SLOTS: u32 = 1;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Configuración del tracker (variables de entorno).
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub master_url: String,
    /// Nombre con el que se anuncia; tiene que coincidir con los hosts de
    /// localidad para que le toquen maps locales.
    pub hostname: String,
    pub map_slots: u32,
    pub reduce_slots: u32,
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        let hostname = env::var("TRACKER_HOST").unwrap_or_else(|_| {
            hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string()
        });
        Self {
            master_url: env::var("MASTER_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            hostname,
            map_slots: slots_from_env("TRACKER_MAP_SLOTS", DEFAULT_MAP_SLOTS),
            reduce_slots: slots_from_env("TRACKER_REDUCE_SLOTS", DEFAULT_REDUCE_SLOTS),
        }
    }
}

fn slots_from_env(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

/* ---------------- HTTP contra el master ---------------- */

#[derive(Clone)]
struct Master {
    client: Client,
    base_url: String,
}

impl Master {
    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION.to_string())
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        ensure_version(
            resp.headers()
                .get(PROTOCOL_VERSION_HEADER)
                .and_then(|v| v.to_str().ok()),
        )
        .with_context(|| format!("POST {url}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("POST {} devolvió {}: {}", url, status, text);
        }
        Ok(resp.json().await?)
    }
}

/// Intentos en curso, para poder abortarlos cuando el master lo pide.
type Running = Arc<Mutex<HashMap<AttemptId, AbortHandle>>>;

/// Loop principal del tracker.
/// - Se registra en el master.
/// - Manda heartbeats periódicos (y aborta lo que el master pida).
/// - Pide tareas mientras tenga slots libres.
/// - Corre cada intento en paralelo.
pub async fn run(config: TrackerConfig) -> Result<()> {
    let master = Master {
        client: Client::new(),
        base_url: config.master_url.trim_end_matches('/').to_string(),
    };

    let TrackerRegisterResponse { tracker_id } = master
        .post(
            "/api/v1/trackers/register",
            &TrackerRegisterRequest {
                hostname: config.hostname.clone(),
                map_slots: config.map_slots,
                reduce_slots: config.reduce_slots,
            },
        )
        .await?;
    info!(
        "tracker {} registrado como {} (maps={}, reduces={}) contra {}",
        tracker_id, config.hostname, config.map_slots, config.reduce_slots, master.base_url
    );

    let running: Running = Arc::new(Mutex::new(HashMap::new()));
    tokio::spawn(heartbeat_loop(master.clone(), tracker_id.clone(), running.clone()));

    // el master respeta los slots por tipo; acá sólo se limita el total
    let slots = (config.map_slots + config.reduce_slots).max(1) as usize;
    let sem = Arc::new(Semaphore::new(slots));

    loop {
        let permit = match sem.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        let assignment: TrackerAssignmentResponse = match master
            .post(
                "/api/v1/trackers/tasks/next",
                &TrackerAssignmentRequest {
                    tracker_id: tracker_id.clone(),
                },
            )
            .await
        {
            Ok(a) => a,
            Err(e) => {
                warn!("no se pudo pedir tarea: {:#}", e);
                drop(permit);
                sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        let Some(task) = assignment.task else {
            drop(permit);
            debug!("no hay tareas para {}", tracker_id);
            sleep(Duration::from_secs(1)).await;
            continue;
        };

        info!(
            "tengo {} ({:?}) del job {}",
            task.attempt_id, task.kind, task.job_id
        );

        let attempt_id = task.attempt_id.clone();
        let master_cloned = master.clone();
        let running_cloned = running.clone();

        // el lock cubre el spawn para que el intento no termine antes de
        // quedar registrado
        let mut guard = running.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            let report = run_attempt(task).await;
            running_cloned
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&report.attempt_id);

            if let Err(e) = master_cloned
                .post::<_, common::TaskCompleteResponse>("/api/v1/trackers/tasks/complete", &report)
                .await
            {
                warn!("no se pudo reportar {}: {:#}", report.attempt_id, e);
            }
            drop(permit);
        });
        guard.insert(attempt_id, handle.abort_handle());
        drop(guard);
    }
}

async fn heartbeat_loop(master: Master, tracker_id: TrackerId, running: Running) {
    let mut sys = System::new_all();
    loop {
        sys.refresh_cpu();
        sys.refresh_memory();

        let req = TrackerHeartbeatRequest {
            tracker_id: tracker_id.clone(),
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            mem_bytes: sys.used_memory(),
        };
        match master
            .post::<_, TrackerHeartbeatResponse>("/api/v1/trackers/heartbeat", &req)
            .await
        {
            Ok(resp) => abort_attempts(&running, &resp.kill_attempts),
            Err(e) => warn!("heartbeat fallido: {:#}", e),
        }

        sleep(HEARTBEAT_INTERVAL).await;
    }
}

/// Aborta los intentos pedidos. Los que ya terminaron se ignoran.
fn abort_attempts(running: &Running, attempts: &[AttemptId]) {
    let mut map = running.lock().unwrap_or_else(|e| e.into_inner());
    for id in attempts {
        if let Some(handle) = map.remove(id) {
            info!("abortando {} por pedido del master", id);
            handle.abort();
        }
    }
}

/* ---------------- ejecución de intentos ---------------- */

async fn run_attempt(task: TaskAssignment) -> TaskCompleteRequest {
    let attempt_id = task.attempt_id.clone();

    let result: Result<Counters> = match (task.kind, task.split) {
        (TaskKind::Map, Some(split)) => {
            match tokio::task::spawn_blocking(move || read_split(&split)).await {
                Ok(r) => r.with_context(|| format!("leyendo el split de {attempt_id}")),
                Err(e) => Err(anyhow::anyhow!("join error: {e}")),
            }
        }
        (TaskKind::Map, None) => Err(anyhow::anyhow!("map sin split")),
        // los reduces no tienen input propio
        (TaskKind::Reduce, _) => Ok(Counters::new()),
    };

    match result {
        Ok(counters) => {
            info!("terminé {} correctamente", task.attempt_id);
            TaskCompleteRequest {
                attempt_id: task.attempt_id,
                success: true,
                counters,
                diagnostics: Vec::new(),
            }
        }
        Err(e) => {
            warn!("falló {}: {:#}", task.attempt_id, e);
            TaskCompleteRequest {
                attempt_id: task.attempt_id,
                success: false,
                counters: Counters::new(),
                diagnostics: vec![format!("{e:#}")],
            }
        }
    }
}

/// Lee `[offset, offset+length)` del archivo y cuenta bytes y líneas.
/// Una línea final sin `\n` también cuenta.
pub fn read_split(split: &InputSplit) -> io::Result<Counters> {
    let mut file = File::open(&split.path)?;
    file.seek(SeekFrom::Start(split.offset))?;
    let mut reader = BufReader::new(file.take(split.length));

    let mut bytes = 0u64;
    let mut records = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        bytes += n as u64;
        records += 1;
    }

    let mut counters = Counters::new();
    counters.increment(FILESYSTEM_COUNTERS, BYTES_READ, bytes);
    counters.increment(TASK_COUNTERS, MAP_INPUT_RECORDS, records);
    Ok(counters)
}
