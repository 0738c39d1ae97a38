use std::env;

use locality::FsConfig;

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_FS_URI: &str = "ceph:///";
const DEFAULT_SPLIT_SIZE: u64 = 64 * 1024 * 1024;
const DEFAULT_MAX_JOBS: usize = 100;

/// Configuración del coordinador (todo por variables de entorno).
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub listen: String,
    /// URI con la que se inicializa el filesystem con localidad
    pub fs_uri: String,
    pub fs: FsConfig,
    /// Tamaño de split por defecto para jobs que no indican uno
    pub split_size: u64,
    /// Máximo de jobs sin terminar antes de rechazar envíos
    pub max_jobs: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            fs_uri: DEFAULT_FS_URI.to_string(),
            fs: FsConfig::default(),
            split_size: DEFAULT_SPLIT_SIZE,
            max_jobs: DEFAULT_MAX_JOBS,
        }
    }
}

impl MasterConfig {
    pub fn from_env() -> Self {
        Self {
            listen: env::var("MASTER_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_string()),
            fs_uri: env::var("FS_URI").unwrap_or_else(|_| DEFAULT_FS_URI.to_string()),
            fs: FsConfig::from_env(),
            split_size: env::var("SPLIT_SIZE")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_SPLIT_SIZE),
            max_jobs: env::var("MAX_JOBS")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_JOBS),
        }
    }
}
