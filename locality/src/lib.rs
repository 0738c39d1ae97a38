//! Capa de filesystem que sabe en qué nodos vive cada rango de bytes de un archivo.

pub mod block;
pub mod ceph;
pub mod config;
pub mod fs;
pub mod native;

pub use block::{split_range, BlockLocation, FileStatus};
pub use ceph::CephIoctlProvider;
pub use config::FsConfig;
pub use fs::{LocalityFileSystem, NAME};
pub use native::{NativeLocalityProvider, NativeSupport};
