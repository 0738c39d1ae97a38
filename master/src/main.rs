mod config;
mod handlers;
mod jobs;
mod monitor;
mod protocol;
mod scheduler;
mod splits;
mod state;

use crate::config::MasterConfig;
use crate::state::AppState;
use anyhow::Context;
use locality::LocalityFileSystem;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const TRACKER_DEAD_TIMEOUT: Duration = Duration::from_secs(20);
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_TASK_ATTEMPTS: u32 = 3;
/// Un id reservado y nunca enviado se olvida pasado este tiempo
pub const RESERVATION_TTL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,locality=info,tower_http=info")),
        )
        .init();

    let config = MasterConfig::from_env();

    // filesystem con localidad (si no hay Ceph, sigue sin localidad)
    let mut fs = LocalityFileSystem::new();
    fs.initialize(&config.fs_uri, &config.fs);
    info!(
        "filesystem {} (localidad {})",
        fs.uri(),
        if fs.locality_available() { "disponible" } else { "no disponible" }
    );

    let listen = config.listen.clone();
    let state = AppState::new(config, fs);

    // router HTTP
    let app = handlers::build_router(state.clone());

    // monitor de heartbeats en segundo plano
    let monitor_state = state.clone();
    tokio::spawn(async move {
        monitor::monitor_trackers(monitor_state).await;
    });

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("no se pudo escuchar en {listen}"))?;
    state.lock().mark_running();
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
