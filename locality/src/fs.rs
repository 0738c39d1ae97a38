use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::block::{BlockLocation, FileStatus};
use crate::ceph::CephIoctlProvider;
use crate::config::FsConfig;
use crate::native::{NativeLocalityProvider, NativeSupport};

/// Identidad fija que reporta este filesystem.
pub const NAME: &str = "ceph:///";
const SCHEME_PREFIX: &str = "ceph://";

/// Filesystem local con una sola operación especial: la consulta de
/// localidad de bloques, que se delega al proveedor nativo.
pub struct LocalityFileSystem {
    native: Arc<NativeSupport>,
    connection_uri: Option<String>,
    working_dir: PathBuf,
    initialized: bool,
}

impl Default for LocalityFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalityFileSystem {
    /// Usa el soporte nativo compartido por el proceso.
    pub fn new() -> Self {
        Self::with_native(NativeSupport::global())
    }

    pub fn with_native(native: Arc<NativeSupport>) -> Self {
        let working_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            native,
            connection_uri: None,
            working_dir,
            initialized: false,
        }
    }

    /// Configura el filesystem y carga el soporte nativo.
    /// Sólo la primera llamada tiene efecto.
    pub fn initialize(&mut self, uri: &str, conf: &FsConfig) {
        if self.initialized {
            return;
        }

        if let Some(dir) = &conf.working_dir {
            self.working_dir = self.qualify(dir);
        }
        self.connection_uri = Some(uri.to_string());

        let mount = conf.ceph_mount.clone();
        self.native.load(move || {
            let provider = CephIoctlProvider::load(&mount)?;
            Ok(Arc::new(provider) as Arc<dyn NativeLocalityProvider>)
        });

        self.initialized = true;
        debug!(
            "filesystem {} inicializado (uri={}, cwd={})",
            NAME,
            uri,
            self.working_dir.display()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn uri(&self) -> &'static str {
        NAME
    }

    /// URI con la que se llamó a `initialize`, si ya se llamó.
    pub fn connection_uri(&self) -> Option<&str> {
        self.connection_uri.as_deref()
    }

    pub fn locality_available(&self) -> bool {
        self.native.is_available()
    }

    /* ---------------- localidad ---------------- */

    /// Hosts que guardan cada tramo de `[start, start+len)` del archivo.
    ///
    /// - `None` si no hay archivo, no existe, es un directorio o no hay
    ///   soporte nativo: "no hay información de localidad".
    /// - `Some(vec![])` si el rango es vacío o empieza después del final.
    /// - Un error del proveedor se propaga tal cual.
    pub fn get_file_block_locations(
        &self,
        file: Option<&FileStatus>,
        start: u64,
        len: u64,
    ) -> io::Result<Option<Vec<BlockLocation>>> {
        let Some(file) = file else {
            return Ok(None);
        };
        if !file.exists || file.is_dir {
            return Ok(None);
        }
        let Some(provider) = self.native.provider() else {
            return Ok(None);
        };

        if len == 0 || start >= file.len {
            return Ok(Some(Vec::new()));
        }
        let len = len.min(file.len - start);
        let end = start + len;

        let path = self.qualify(&file.path);
        let blocks = provider.block_locations(&path, start, len)?;

        Ok(Some(
            blocks
                .into_iter()
                .filter_map(|b| b.clip(start, end))
                .collect(),
        ))
    }

    /* ---------------- rutas ---------------- */

    pub fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    pub fn set_working_directory(&mut self, dir: &Path) {
        self.working_dir = self.qualify(dir);
    }

    /// Ruta absoluta y normalizada (sin `.` ni `..`).
    pub fn qualify(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        };
        normalize(&joined)
    }

    /// Acepta tanto `ceph:///datos/a.txt` como rutas simples.
    pub fn path_of(&self, raw: &str) -> PathBuf {
        let stripped = raw.strip_prefix(SCHEME_PREFIX).unwrap_or(raw);
        self.qualify(Path::new(stripped))
    }

    /* ---------------- operaciones de archivo ---------------- */

    /// Un archivo inexistente no es error: vuelve con `exists = false`.
    pub fn file_status(&self, path: &Path) -> io::Result<FileStatus> {
        let path = self.qualify(path);
        match fs::metadata(&path) {
            Ok(meta) => Ok(FileStatus {
                path,
                exists: true,
                len: meta.len(),
                is_dir: meta.is_dir(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileStatus::missing(path)),
            Err(e) => Err(e),
        }
    }

    /// Entradas de un directorio ordenadas por ruta. Para un archivo
    /// devuelve sólo ese archivo.
    pub fn list_status(&self, path: &Path) -> io::Result<Vec<FileStatus>> {
        let status = self.file_status(path)?;
        if !status.exists {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} no existe", status.path.display()),
            ));
        }
        if !status.is_dir {
            return Ok(vec![status]);
        }

        let mut out = Vec::new();
        for entry in fs::read_dir(&status.path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            out.push(FileStatus {
                path: entry.path(),
                exists: true,
                len: meta.len(),
                is_dir: meta.is_dir(),
            });
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    pub fn open(&self, path: &Path) -> io::Result<File> {
        File::open(self.qualify(path))
    }

    /// Crea el archivo (y sus directorios padre).
    pub fn create(&self, path: &Path, overwrite: bool) -> io::Result<File> {
        let path = self.qualify(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut opts = OpenOptions::new();
        opts.write(true);
        if overwrite {
            opts.create(true).truncate(true);
        } else {
            opts.create_new(true);
        }
        opts.open(path)
    }

    pub fn mkdirs(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.qualify(path))
    }

    /// `false` si no había nada que borrar.
    pub fn delete(&self, path: &Path, recursive: bool) -> io::Result<bool> {
        let status = self.file_status(path)?;
        if !status.exists {
            return Ok(false);
        }
        if status.is_dir {
            if recursive {
                fs::remove_dir_all(&status.path)?;
            } else {
                fs::remove_dir(&status.path)?;
            }
        } else {
            fs::remove_file(&status.path)?;
        }
        Ok(true)
    }

    pub fn rename(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::rename(self.qualify(src), self.qualify(dst))
    }

    #[cfg(unix)]
    pub fn set_permission(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(self.qualify(path), fs::Permissions::from_mode(mode))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
