//! Proveedor de localidad para un montaje CephFS del kernel.
//!
//! Usa los ioctl `CEPH_IOC_GET_LAYOUT` (tamaño de objeto del archivo) y
//! `CEPH_IOC_GET_DATALOC` (OSD que guarda un offset dado).

use std::io;
use std::path::{Path, PathBuf};

use crate::block::BlockLocation;
use crate::native::NativeLocalityProvider;

pub struct CephIoctlProvider {
    mount: PathBuf,
}

impl CephIoctlProvider {
    /// Verifica que `mount` sea un montaje CephFS antes de aceptar consultas.
    pub fn load(mount: &Path) -> io::Result<Self> {
        sys::check_mount(mount)?;
        Ok(Self {
            mount: mount.to_path_buf(),
        })
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }
}

impl NativeLocalityProvider for CephIoctlProvider {
    fn block_locations(&self, path: &Path, start: u64, len: u64) -> io::Result<Vec<BlockLocation>> {
        sys::block_locations(path, start, len)
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::ffi::CString;
    use std::fs::File;
    use std::io;
    use std::mem;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    use tracing::debug;

    use crate::block::{split_range, BlockLocation};

    const CEPH_SUPER_MAGIC: i64 = 0x00c3_6400;
    const CEPH_IOCTL_MAGIC: u64 = 0x97;

    #[repr(C)]
    #[derive(Default)]
    #[allow(dead_code)]
    struct CephIoctlLayout {
        stripe_unit: u64,
        stripe_count: u64,
        object_size: u64,
        data_pool: u64,
        unused: i64,
    }

    #[repr(C)]
    #[allow(dead_code)]
    struct CephIoctlDataloc {
        file_offset: u64,
        object_offset: u64,
        object_no: u64,
        object_size: u64,
        object_name: [libc::c_char; 64],
        block_offset: u64,
        block_size: u64,
        osd: i64,
        osd_addr: libc::sockaddr_storage,
    }

    // codificación asm-generic de _IOR / _IOWR
    const IOC_WRITE: u64 = 1;
    const IOC_READ: u64 = 2;

    const fn ioc(dir: u64, nr: u64, size: usize) -> u64 {
        (dir << 30) | ((size as u64) << 16) | (CEPH_IOCTL_MAGIC << 8) | nr
    }

    const CEPH_IOC_GET_LAYOUT: u64 = ioc(IOC_READ, 1, mem::size_of::<CephIoctlLayout>());
    const CEPH_IOC_GET_DATALOC: u64 =
        ioc(IOC_READ | IOC_WRITE, 3, mem::size_of::<CephIoctlDataloc>());

    fn c_path(path: &Path) -> io::Result<CString> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    pub fn check_mount(mount: &Path) -> io::Result<()> {
        let cpath = c_path(mount)?;
        // SAFETY: statfs sólo escribe en `buf`, que es del tamaño correcto.
        let mut buf: libc::statfs = unsafe { mem::zeroed() };
        let rc = unsafe { libc::statfs(cpath.as_ptr(), &mut buf) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        if buf.f_type as i64 != CEPH_SUPER_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} no es un montaje CephFS", mount.display()),
            ));
        }
        Ok(())
    }

    pub fn block_locations(path: &Path, start: u64, len: u64) -> io::Result<Vec<BlockLocation>> {
        // Sólo lectura: consultar la localidad no debe crear ni tocar el archivo.
        let file = File::open(path)?;
        let fd = file.as_raw_fd();

        let mut layout = CephIoctlLayout::default();
        // SAFETY: el kernel escribe un ceph_ioctl_layout en `layout`.
        let rc = unsafe {
            libc::ioctl(fd, CEPH_IOC_GET_LAYOUT as _, &mut layout as *mut CephIoctlLayout)
        };
        if rc != 0 {
            let e = io::Error::last_os_error();
            return Err(io::Error::new(e.kind(), format!("ioctl layout falló: {e}")));
        }
        if layout.object_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "layout con object_size 0",
            ));
        }
        debug!(
            "layout de {}: object_size={} stripe_unit={} stripe_count={}",
            path.display(),
            layout.object_size,
            layout.stripe_unit,
            layout.stripe_count
        );

        let mut out = Vec::new();
        for (offset, length) in split_range(start, len, layout.object_size) {
            // SAFETY: struct POD; ceros es un valor válido.
            let mut dl: CephIoctlDataloc = unsafe { mem::zeroed() };
            dl.file_offset = offset;

            // SAFETY: el kernel lee file_offset y completa el resto de `dl`.
            let rc = unsafe {
                libc::ioctl(fd, CEPH_IOC_GET_DATALOC as _, &mut dl as *mut CephIoctlDataloc)
            };
            if rc != 0 {
                let e = io::Error::last_os_error();
                return Err(io::Error::new(
                    e.kind(),
                    format!("ioctl dataloc falló en offset {offset}: {e}"),
                ));
            }

            let (names, hosts) = match osd_endpoint(&dl.osd_addr) {
                Some((ip, port)) => (vec![format!("{ip}:{port}")], vec![ip.to_string()]),
                None => (Vec::new(), Vec::new()),
            };
            out.push(BlockLocation {
                names,
                hosts,
                offset,
                length,
            });
        }
        Ok(out)
    }

    fn osd_endpoint(addr: &libc::sockaddr_storage) -> Option<(IpAddr, u16)> {
        match addr.ss_family as libc::c_int {
            libc::AF_INET => {
                // SAFETY: ss_family dice que el contenido es un sockaddr_in.
                let sin = unsafe { &*(addr as *const _ as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                Some((IpAddr::V4(ip), u16::from_be(sin.sin_port)))
            }
            libc::AF_INET6 => {
                // SAFETY: ss_family dice que el contenido es un sockaddr_in6.
                let sin6 = unsafe { &*(addr as *const _ as *const libc::sockaddr_in6) };
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                Some((IpAddr::V6(ip), u16::from_be(sin6.sin6_port)))
            }
            _ => None,
        }
    }

}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::path::Path;

    use crate::block::BlockLocation;

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "los ioctl de CephFS sólo existen en Linux",
        )
    }

    pub fn check_mount(_mount: &Path) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn block_locations(_path: &Path, _start: u64, _len: u64) -> io::Result<Vec<BlockLocation>> {
        Err(unsupported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_falla_si_el_montaje_no_existe() {
        let res = CephIoctlProvider::load(Path::new("/no/existe/montaje-ceph"));
        assert!(res.is_err());
    }
}
