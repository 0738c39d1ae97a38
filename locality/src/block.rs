use std::path::PathBuf;

/// Un tramo contiguo de bytes de un archivo y los hosts que lo guardan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocation {
    /// `host:puerto` del nodo de almacenamiento, en el mismo orden que `hosts`
    pub names: Vec<String>,
    /// Vacío si no se conoce dónde está el bloque
    pub hosts: Vec<String>,
    pub offset: u64,
    pub length: u64,
}

impl BlockLocation {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Recorta el bloque a `[start, end)`. `None` si no se solapan.
    pub fn clip(mut self, start: u64, end: u64) -> Option<Self> {
        let lo = self.offset.max(start);
        let hi = self.end().min(end);
        if lo >= hi {
            return None;
        }
        self.offset = lo;
        self.length = hi - lo;
        Some(self)
    }
}

/// Lo mínimo que necesita la capa de localidad de un archivo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub len: u64,
    pub is_dir: bool,
}

impl FileStatus {
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            len: 0,
            is_dir: false,
        }
    }
}

/// Parte `[start, start+len)` en trozos alineados a `block_size`.
/// El primer y el último trozo quedan recortados al rango pedido.
pub fn split_range(start: u64, len: u64, block_size: u64) -> Vec<(u64, u64)> {
    let mut pieces = Vec::new();
    if len == 0 || block_size == 0 {
        return pieces;
    }

    let end = start.saturating_add(len);
    let mut offset = start;
    while offset < end {
        let block_end = (offset / block_size + 1).saturating_mul(block_size);
        let piece_end = block_end.min(end);
        pieces.push((offset, piece_end - offset));
        offset = piece_end;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: u64, length: u64) -> BlockLocation {
        BlockLocation {
            names: vec!["10.0.0.1:6800".into()],
            hosts: vec!["10.0.0.1".into()],
            offset,
            length,
        }
    }

    #[test]
    fn split_range_respeta_limites_de_bloque() {
        // bloques de 4: [2,4) [4,8) [8,9)
        assert_eq!(split_range(2, 7, 4), vec![(2, 2), (4, 4), (8, 1)]);
    }

    #[test]
    fn split_range_alineado_devuelve_bloques_completos() {
        assert_eq!(split_range(0, 8, 4), vec![(0, 4), (4, 4)]);
    }

    #[test]
    fn split_range_vacio_si_len_o_bloque_es_cero() {
        assert!(split_range(10, 0, 4).is_empty());
        assert!(split_range(10, 5, 0).is_empty());
    }

    #[test]
    fn split_range_no_desborda_cerca_de_u64_max() {
        let pieces = split_range(u64::MAX - 3, 10, 4);
        let total: u64 = pieces.iter().map(|(_, l)| l).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn clip_recorta_al_rango_pedido() {
        let b = block(0, 100).clip(10, 50).unwrap();
        assert_eq!((b.offset, b.length), (10, 40));
    }

    #[test]
    fn clip_descarta_bloques_fuera_de_rango() {
        assert!(block(0, 10).clip(10, 20).is_none());
        assert!(block(30, 10).clip(10, 20).is_none());
    }
}
