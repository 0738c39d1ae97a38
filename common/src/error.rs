use thiserror::Error;

/// Errores que puede devolver cualquier operación del protocolo.
///
/// "No encontrado" nunca es un error: las consultas por id devuelven
/// `None` o una lista vacía.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// El coordinador no respondió o la conexión falló.
    #[error("transport error: {0}")]
    Transport(String),

    /// Cliente y coordinador no hablan la misma versión. Fatal para la llamada.
    #[error("protocol version mismatch: client={client} server={server}")]
    VersionMismatch { client: u64, server: u64 },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("coordinator over capacity ({limit} incomplete jobs)")]
    OverCapacity { limit: usize },

    /// Cualquier otra respuesta no exitosa del coordinador.
    #[error("coordinator answered {status}: {message}")]
    Remote { status: u16, message: String },
}
