use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use crate::block::BlockLocation;

/// Quien sabe de verdad dónde están los bytes de un archivo.
///
/// Recibe la ruta absoluta y offsets en bytes; la traducción a bloques u
/// objetos del almacenamiento es cosa suya.
pub trait NativeLocalityProvider: Send + Sync {
    fn block_locations(&self, path: &Path, start: u64, len: u64) -> io::Result<Vec<BlockLocation>>;
}

/// Estado de carga del soporte nativo. Se inicializa una sola vez; si la
/// carga falla se avisa una vez y todas las consultas devuelven "sin datos".
#[derive(Default)]
pub struct NativeSupport {
    provider: OnceLock<Option<Arc<dyn NativeLocalityProvider>>>,
}

impl NativeSupport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instancia compartida por todo el proceso.
    pub fn global() -> Arc<NativeSupport> {
        static GLOBAL: OnceLock<Arc<NativeSupport>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(NativeSupport::new())).clone()
    }

    /// Ejecuta `loader` sólo la primera vez. Las llamadas siguientes no hacen
    /// nada y devuelven el resultado de la primera.
    pub fn load<F>(&self, loader: F) -> bool
    where
        F: FnOnce() -> io::Result<Arc<dyn NativeLocalityProvider>>,
    {
        self.provider
            .get_or_init(|| match loader() {
                Ok(provider) => {
                    info!("soporte nativo de localidad cargado");
                    Some(provider)
                }
                Err(e) => {
                    warn!(
                        "no se pudo cargar el soporte nativo de localidad ({}); se sigue sin localidad",
                        e
                    );
                    None
                }
            })
            .is_some()
    }

    pub fn is_available(&self) -> bool {
        self.provider().is_some()
    }

    pub fn provider(&self) -> Option<&Arc<dyn NativeLocalityProvider>> {
        self.provider.get().and_then(|p| p.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoHosts;

    impl NativeLocalityProvider for NoHosts {
        fn block_locations(&self, _: &Path, start: u64, len: u64) -> io::Result<Vec<BlockLocation>> {
            Ok(vec![BlockLocation {
                names: vec![],
                hosts: vec![],
                offset: start,
                length: len,
            }])
        }
    }

    #[test]
    fn sin_cargar_no_hay_soporte() {
        let native = NativeSupport::new();
        assert!(!native.is_available());
        assert!(native.provider().is_none());
    }

    #[test]
    fn load_ejecuta_el_loader_una_sola_vez() {
        let native = NativeSupport::new();
        let calls = AtomicUsize::new(0);

        let first = native.load(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NoHosts) as Arc<dyn NativeLocalityProvider>)
        });
        let second = native.load(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "no debería llamarse"))
        });

        assert!(first);
        assert!(second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(native.is_available());
    }

    #[test]
    fn carga_fallida_queda_degradada_para_siempre() {
        let native = NativeSupport::new();
        let ok = native.load(|| Err(io::Error::new(io::ErrorKind::NotFound, "sin ceph")));
        assert!(!ok);

        // un segundo intento no reintenta la carga
        let again = native.load(|| Ok(Arc::new(NoHosts) as Arc<dyn NativeLocalityProvider>));
        assert!(!again);
        assert!(!native.is_available());
    }

    #[test]
    fn global_devuelve_siempre_la_misma_instancia() {
        let a = NativeSupport::global();
        let b = NativeSupport::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
