use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grupo de contadores que mantiene el propio coordinador por job.
pub const JOB_COUNTERS: &str = "JobCounters";
pub const TOTAL_LAUNCHED_MAPS: &str = "TOTAL_LAUNCHED_MAPS";
pub const TOTAL_LAUNCHED_REDUCES: &str = "TOTAL_LAUNCHED_REDUCES";
pub const NUM_FAILED_MAPS: &str = "NUM_FAILED_MAPS";
pub const NUM_FAILED_REDUCES: &str = "NUM_FAILED_REDUCES";
pub const NUM_KILLED_MAPS: &str = "NUM_KILLED_MAPS";
pub const NUM_KILLED_REDUCES: &str = "NUM_KILLED_REDUCES";
pub const DATA_LOCAL_MAPS: &str = "DATA_LOCAL_MAPS";
pub const OTHER_LOCAL_MAPS: &str = "OTHER_LOCAL_MAPS";

/// Contadores que reportan las tareas.
pub const FILESYSTEM_COUNTERS: &str = "FileSystemCounters";
pub const BYTES_READ: &str = "BYTES_READ";
pub const TASK_COUNTERS: &str = "TaskCounters";
pub const MAP_INPUT_RECORDS: &str = "MAP_INPUT_RECORDS";

/// Mapa jerárquico (grupo, nombre) -> valor acumulado.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counters {
    groups: BTreeMap<String, BTreeMap<String, u64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, group: &str, name: &str, delta: u64) {
        let slot = self
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert(0);
        *slot = slot.saturating_add(delta);
    }

    /// 0 si el contador no existe.
    pub fn value(&self, group: &str, name: &str) -> u64 {
        self.groups
            .get(group)
            .and_then(|g| g.get(name))
            .copied()
            .unwrap_or(0)
    }

    /// Suma todos los contadores de `other` sobre estos.
    pub fn merge(&mut self, other: &Counters) {
        for (group, names) in &other.groups {
            for (name, v) in names {
                self.increment(group, name, *v);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, u64>)> {
        self.groups.iter().map(|(g, names)| (g.as_str(), names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_acumula_por_grupo_y_nombre() {
        let mut c = Counters::new();
        c.increment(JOB_COUNTERS, NUM_FAILED_MAPS, 1);
        c.increment(JOB_COUNTERS, NUM_FAILED_MAPS, 2);
        c.increment(TASK_COUNTERS, MAP_INPUT_RECORDS, 10);

        assert_eq!(c.value(JOB_COUNTERS, NUM_FAILED_MAPS), 3);
        assert_eq!(c.value(TASK_COUNTERS, MAP_INPUT_RECORDS), 10);
        assert_eq!(c.value(TASK_COUNTERS, "NO_EXISTE"), 0);
    }

    #[test]
    fn merge_suma_contadores_de_otra_instancia() {
        let mut a = Counters::new();
        a.increment(FILESYSTEM_COUNTERS, BYTES_READ, 100);

        let mut b = Counters::new();
        b.increment(FILESYSTEM_COUNTERS, BYTES_READ, 50);
        b.increment(TASK_COUNTERS, MAP_INPUT_RECORDS, 4);

        a.merge(&b);
        assert_eq!(a.value(FILESYSTEM_COUNTERS, BYTES_READ), 150);
        assert_eq!(a.value(TASK_COUNTERS, MAP_INPUT_RECORDS), 4);
        assert_eq!(a.groups().count(), 2);
    }

    #[test]
    fn se_serializa_como_mapa_anidado() {
        let mut c = Counters::new();
        c.increment("g", "n", 7);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json, serde_json::json!({"g": {"n": 7}}));
    }
}
