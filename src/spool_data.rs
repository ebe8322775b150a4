//! Per-extruder spool names as stored in the settings file.
//!
//! The JSON shape is an object keyed by 1-based extruder number:
//! `{"1": {"sm_name": "Red PLA"}, "2": {"sm_name": ""}}`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PostprocessError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpoolEntry {
    #[serde(default)]
    pub sm_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpoolAssignments {
    entries: BTreeMap<String, Option<SpoolEntry>>,
}

/// Highest extruder number accepted from spool data.
pub const MAX_EXTRUDERS: usize = 256;

fn extruder_number(key: &str) -> Option<usize> {
    key.trim()
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=MAX_EXTRUDERS).contains(n))
}

impl SpoolAssignments {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| PostprocessError::SpoolData(e.to_string()))
    }

    /// Read a spool JSON file. A relative path that does not exist in the
    /// working directory is looked up next to the executable.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let resolved = resolve_beside_executable(path);
        let text = fs::read_to_string(&resolved).map_err(|e| {
            PostprocessError::SpoolData(format!(
                "Could not read spool file '{}': {e}",
                resolved.display()
            ))
        })?;
        Self::from_json_str(&text)
    }

    /// Assignments for extruders 1..=n from `names`, in order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut out = Self::default();
        out.assign_in_order(names);
        out
    }

    /// Overwrite extruders 1..=n with `names`, keeping any higher extruders.
    pub fn assign_in_order<S: AsRef<str>>(&mut self, names: &[S]) {
        for (i, name) in names.iter().enumerate() {
            self.set(i + 1, name.as_ref());
        }
    }

    pub fn from_spool_map(spools: &BTreeMap<usize, String>) -> Self {
        let mut out = Self::default();
        for (extruder, name) in spools {
            out.set(*extruder, name);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, extruder: usize) -> Option<&str> {
        self.entries
            .get(&extruder.to_string())
            .and_then(|e| e.as_ref())
            .and_then(|e| e.sm_name.as_deref())
    }

    pub fn set(&mut self, extruder: usize, name: &str) {
        let entry = self
            .entries
            .entry(extruder.to_string())
            .or_insert(None)
            .get_or_insert_with(SpoolEntry::default);
        entry.sm_name = Some(name.to_string());
    }

    pub fn remove(&mut self, extruder: usize) -> bool {
        self.entries.remove(&extruder.to_string()).is_some()
    }

    /// Add an extruder after the highest numbered one; returns its number.
    pub fn push(&mut self, name: &str) -> usize {
        let extruder = self.ordered().last().map_or(1, |(last, _)| last + 1);
        self.set(extruder, name);
        extruder
    }

    /// Entries with a valid extruder number, ordered numerically.
    pub fn ordered(&self) -> Vec<(usize, Option<&str>)> {
        let mut out: Vec<(usize, Option<&str>)> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                let Some(extruder) = extruder_number(key) else {
                    warn!(key = %key, "ignoring spool entry with invalid extruder number");
                    return None;
                };
                let name = entry.as_ref().and_then(|e| e.sm_name.as_deref());
                Some((extruder, name))
            })
            .collect();
        out.sort_by_key(|(extruder, _)| *extruder);
        out
    }

    /// Replacement values indexed by extruder - 1; gaps are `None`.
    ///
    /// Keys outside `1..=MAX_EXTRUDERS` are skipped.
    pub fn to_replacements(&self) -> Vec<Option<String>> {
        let ordered = self.ordered();
        let len = ordered.last().map_or(0, |(extruder, _)| *extruder);
        let mut out = vec![None; len];
        for (extruder, name) in ordered {
            out[extruder - 1] = name.map(str::to_string);
        }
        out
    }
}

fn resolve_beside_executable(path: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(path)))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replacements_follow_extruder_numbers() {
        let data = SpoolAssignments::from_json_str(
            r#"{"2": {"sm_name": "Blue"}, "1": {"sm_name": "Red"}, "10": {"sm_name": "Last"}}"#,
        )
        .unwrap();
        let replacements = data.to_replacements();
        assert_eq!(replacements.len(), 10);
        assert_eq!(replacements[0].as_deref(), Some("Red"));
        assert_eq!(replacements[1].as_deref(), Some("Blue"));
        assert!(replacements[2..9].iter().all(Option::is_none));
        assert_eq!(replacements[9].as_deref(), Some("Last"));
    }

    #[test]
    fn invalid_keys_and_null_entries_are_skipped() {
        let data = SpoolAssignments::from_json_str(
            r#"{"one": {"sm_name": "X"}, "0": {"sm_name": "Y"}, "1": null, "2": {}}"#,
        )
        .unwrap();
        assert_eq!(data.to_replacements(), vec![None, None]);
    }

    #[test]
    fn malformed_json_is_spool_data_error() {
        let err = SpoolAssignments::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, PostprocessError::SpoolData(_)));
    }

    #[test]
    fn edits_mirror_the_extruder_list() {
        let mut data = SpoolAssignments::from_names(&["A", "B"]);
        assert_eq!(data.push(""), 3);
        data.set(3, "C");
        assert!(data.remove(1));
        assert!(!data.remove(7));
        assert_eq!(data.get(3), Some("C"));
        assert_eq!(data.to_replacements(), vec![None, Some("B".to_string()), Some("C".to_string())]);
    }

    #[test]
    fn push_after_removal_does_not_overwrite() {
        let mut data = SpoolAssignments::from_names(&["A", "B", "C"]);
        assert!(data.remove(2));
        assert_eq!(data.push("New"), 4);
        assert_eq!(data.get(3), Some("C"));
        assert_eq!(data.get(4), Some("New"));

        let mut empty = SpoolAssignments::default();
        assert_eq!(empty.push("First"), 1);
    }

    #[test]
    fn out_of_range_extruders_are_skipped() {
        let data = SpoolAssignments::from_json_str(
            r#"{"18446744073709551615": {"sm_name": "X"}, "100000000000": {"sm_name": "Y"}, "257": {"sm_name": "Z"}, "2": {"sm_name": "B"}}"#,
        )
        .unwrap();
        assert_eq!(data.to_replacements(), vec![None, Some("B".to_string())]);

        let mut data = SpoolAssignments::default();
        data.set(MAX_EXTRUDERS, "Edge");
        assert_eq!(data.to_replacements().len(), MAX_EXTRUDERS);
    }

    #[test]
    fn assign_in_order_keeps_higher_extruders() {
        let mut data = SpoolAssignments::from_names(&["A", "B", "C"]);
        data.assign_in_order(&["X"]);
        assert_eq!(data.get(1), Some("X"));
        assert_eq!(data.get(3), Some("C"));
    }

    #[test]
    fn extra_fields_round_trip() {
        let text = r#"{"1":{"sm_name":"A","weight":750}}"#;
        let data = SpoolAssignments::from_json_str(text).unwrap();
        assert_eq!(serde_json::to_string(&data).unwrap(), text);
    }

    #[test]
    fn reads_spool_file() {
        let td = tempdir().unwrap();
        let path = td.path().join("spools.json");
        fs::write(&path, r#"{"1": {"sm_name": "Galaxy Black"}}"#).unwrap();
        let data = SpoolAssignments::from_json_file(&path).unwrap();
        assert_eq!(data.get(1), Some("Galaxy Black"));

        let err = SpoolAssignments::from_json_file(&td.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }
}
