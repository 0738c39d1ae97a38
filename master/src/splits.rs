// master/src/splits.rs

use anyhow::{bail, Context, Result};
use common::InputSplit;
use glob::glob;
use locality::{split_range, FileStatus, LocalityFileSystem};
use tracing::{debug, warn};

/// Parte los inputs del job en splits de `split_size` bytes, cada uno con
/// los hosts que guardan sus bytes.
///
/// Cada input puede ser un archivo, un directorio (se toman sus archivos,
/// sin entrar en subdirectorios) o un patrón glob.
pub fn compute_splits(
    fs: &LocalityFileSystem,
    inputs: &[String],
    split_size: u64,
) -> Result<Vec<InputSplit>> {
    let mut files = Vec::new();
    for raw in inputs {
        files.extend(expand_input(fs, raw)?);
    }

    let mut splits = Vec::new();
    for file in &files {
        let path = file.path.to_string_lossy().to_string();
        if file.len == 0 {
            // archivo vacío: un split vacío, igual tiene que correr un map
            splits.push(InputSplit {
                path,
                offset: 0,
                length: 0,
                hosts: Vec::new(),
            });
            continue;
        }
        for (offset, length) in split_range(0, file.len, split_size) {
            splits.push(InputSplit {
                path: path.clone(),
                offset,
                length,
                hosts: split_hosts(fs, file, offset, length),
            });
        }
    }

    debug!("{} archivos -> {} splits", files.len(), splits.len());
    Ok(splits)
}

fn expand_input(fs: &LocalityFileSystem, raw: &str) -> Result<Vec<FileStatus>> {
    let path = fs.path_of(raw);
    let pattern = path.to_string_lossy().to_string();

    if pattern.contains(['*', '?', '[']) {
        let mut out = Vec::new();
        for entry in glob(&pattern).with_context(|| format!("patrón inválido: {raw}"))? {
            let entry = entry?;
            let status = fs.file_status(&entry)?;
            if status.exists && !status.is_dir && !is_hidden(&status) {
                out.push(status);
            }
        }
        return Ok(out);
    }

    let status = fs.file_status(&path)?;
    if !status.exists {
        bail!("el input {} no existe", raw);
    }
    if !status.is_dir {
        return Ok(vec![status]);
    }
    Ok(fs
        .list_status(&path)?
        .into_iter()
        .filter(|s| !s.is_dir && !is_hidden(s))
        .collect())
}

/// `_SUCCESS`, `.crc` y compañía no son datos.
fn is_hidden(status: &FileStatus) -> bool {
    status
        .path
        .file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.starts_with('.') || n.starts_with('_')
        })
        .unwrap_or(false)
}

/// Hosts que guardan el rango, sin repetir y en el orden en que aparecen.
/// Sin información de localidad el split queda sin hosts.
fn split_hosts(fs: &LocalityFileSystem, file: &FileStatus, offset: u64, length: u64) -> Vec<String> {
    let blocks = match fs.get_file_block_locations(Some(file), offset, length) {
        Ok(Some(blocks)) => blocks,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(
                "no se pudo obtener la localidad de {} [{}, +{}): {}",
                file.path.display(),
                offset,
                length,
                e
            );
            return Vec::new();
        }
    };

    let mut hosts: Vec<String> = Vec::new();
    for host in blocks.into_iter().flat_map(|b| b.hosts) {
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{fs_with, RoundRobinHosts};
    use locality::NativeLocalityProvider;
    use std::{env, fs as stdfs, path::PathBuf, sync::Arc};

    fn temp_dir(sub: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("master_splits_{}_{}", sub, std::process::id()));
        let _ = stdfs::remove_dir_all(&dir);
        stdfs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(dir: &PathBuf, name: &str, bytes: usize) -> String {
        let path = dir.join(name);
        stdfs::write(&path, vec![b'x'; bytes]).unwrap();
        path.to_string_lossy().to_string()
    }

    fn hosts_provider() -> Option<Arc<dyn NativeLocalityProvider>> {
        Some(Arc::new(RoundRobinHosts {
            block_size: 10,
            hosts: vec!["h1".into(), "h2".into()],
        }) as Arc<dyn NativeLocalityProvider>)
    }

    #[test]
    fn compute_splits_parte_por_tamano_y_asigna_hosts() {
        let dir = temp_dir("tamano");
        let file = write(&dir, "a.txt", 25);
        let fs = fs_with(hosts_provider());

        let splits = compute_splits(&fs, &[file.clone()], 10).unwrap();

        assert_eq!(splits.len(), 3);
        assert_eq!(
            splits.iter().map(|s| (s.offset, s.length)).collect::<Vec<_>>(),
            vec![(0, 10), (10, 10), (20, 5)]
        );
        assert_eq!(splits[0].hosts, vec!["h1".to_string()]);
        assert_eq!(splits[1].hosts, vec!["h2".to_string()]);
        assert_eq!(splits[2].hosts, vec!["h1".to_string()]);
        assert!(splits.iter().all(|s| s.path == file));
    }

    #[test]
    fn split_que_cruza_bloques_junta_los_hosts_sin_repetir() {
        let dir = temp_dir("cruza");
        let file = write(&dir, "a.txt", 30);
        let fs = fs_with(hosts_provider());

        let splits = compute_splits(&fs, &[file], 30).unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].hosts, vec!["h1".to_string(), "h2".to_string()]);
    }

    #[test]
    fn sin_soporte_nativo_los_splits_quedan_sin_hosts() {
        let dir = temp_dir("sin_nativo");
        let file = write(&dir, "a.txt", 15);
        let fs = fs_with(None);

        let splits = compute_splits(&fs, &[file], 10).unwrap();
        assert_eq!(splits.len(), 2);
        assert!(splits.iter().all(|s| s.hosts.is_empty()));
    }

    #[test]
    fn directorio_toma_sus_archivos_visibles_en_orden() {
        let dir = temp_dir("directorio");
        write(&dir, "b.txt", 5);
        write(&dir, "a.txt", 5);
        write(&dir, "_SUCCESS", 0);
        write(&dir, ".oculto", 5);
        stdfs::create_dir_all(dir.join("sub")).unwrap();
        let fs = fs_with(None);

        let splits = compute_splits(&fs, &[dir.to_string_lossy().to_string()], 100).unwrap();
        let names: Vec<_> = splits
            .iter()
            .map(|s| PathBuf::from(&s.path).file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn patron_glob_y_archivo_vacio() {
        let dir = temp_dir("glob");
        write(&dir, "parte-0.log", 5);
        write(&dir, "parte-1.log", 0);
        write(&dir, "otro.txt", 5);
        let fs = fs_with(None);

        let pattern = format!("{}/parte-*.log", dir.display());
        let splits = compute_splits(&fs, &[pattern], 100).unwrap();

        assert_eq!(splits.len(), 2);
        assert_eq!(splits[1].length, 0);
        assert!(splits[1].path.ends_with("parte-1.log"));
    }

    #[test]
    fn input_inexistente_es_error() {
        let dir = temp_dir("inexistente");
        let fs = fs_with(None);
        let missing = dir.join("no_esta.txt").to_string_lossy().to_string();
        assert!(compute_splits(&fs, &[missing], 10).is_err());
    }
}
