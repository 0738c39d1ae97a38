use std::env;
use std::path::PathBuf;

const DEFAULT_CEPH_MOUNT: &str = "/mnt/ceph";

/// Configuración del filesystem con localidad.
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Punto de montaje CephFS que se verifica al cargar el soporte nativo
    pub ceph_mount: PathBuf,
    /// Directorio contra el que se resuelven rutas relativas.
    /// Si no viene, se usa el cwd del proceso.
    pub working_dir: Option<PathBuf>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            ceph_mount: PathBuf::from(DEFAULT_CEPH_MOUNT),
            working_dir: None,
        }
    }
}

impl FsConfig {
    /// Lee `CEPH_MOUNT` y `FS_WORKING_DIR`.
    pub fn from_env() -> Self {
        let ceph_mount = env::var("CEPH_MOUNT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CEPH_MOUNT));
        let working_dir = env::var("FS_WORKING_DIR").ok().map(PathBuf::from);
        Self {
            ceph_mount,
            working_dir,
        }
    }
}
