//! End-to-end rewrite of one gcode file: tail read, parse, patch, commit.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::annotation::{count_named_extruders, parse_annotations, spools_from_tail};
use crate::error::{PostprocessError, Result};
use crate::patcher::{rewrite_tail, PatchSummary};
use crate::tail::{read_tail, DEFAULT_TAIL_LINES};
use crate::writer::{commit, has_marker, PROCESSED_MARKER};

pub const TAIL_LINES_ENV: &str = "NVF_TAIL_LINES";

/// Options for a single invocation.
///
/// `tail_lines` assumes the slicer's summary comments sit within the last
/// lines of the file; a larger window only costs read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostprocessConfig {
    pub tail_lines: usize,
    pub marker: String,
    pub atomic_write: bool,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            tail_lines: DEFAULT_TAIL_LINES,
            marker: PROCESSED_MARKER.to_string(),
            atomic_write: true,
        }
    }
}

impl PostprocessConfig {
    /// Defaults, with `NVF_TAIL_LINES` applied when it holds a positive number.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(lines) = std::env::var(TAIL_LINES_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.tail_lines = lines;
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// No notes comment in the tail window; the file was not written.
    NoAnnotation,
    Rewritten {
        #[serde(flatten)]
        summary: PatchSummary,
        marker_added: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub path: String,
    pub tail_lines: usize,
    pub outcome: ProcessOutcome,
}

/// Rewrite the spool names of `path` in place.
///
/// `replacements[i]` is the new `sm_name` for extruder `i + 1`, `None` keeps
/// the current one. Only I/O problems are errors; anything odd in the
/// annotations leaves that part of the file as it was.
pub fn process_file(
    path: &Path,
    replacements: &[Option<String>],
    config: &PostprocessConfig,
) -> Result<ProcessReport> {
    let window = read_tail(path, config.tail_lines)?;
    let report = |outcome| ProcessReport {
        path: path.display().to_string(),
        tail_lines: window.line_count(),
        outcome,
    };

    let Some((new_tail, summary)) = rewrite_tail(&window.text, replacements) else {
        debug!(path = %path.display(), "no filament_notes comment in tail window, file left untouched");
        return Ok(report(ProcessOutcome::NoAnnotation));
    };

    let marker_added = commit(path, &window, &new_tail, &config.marker, config.atomic_write)?;
    info!(
        path = %path.display(),
        renamed = summary.renamed.len(),
        fragments = summary.fragments,
        marker_added,
        "gcode spool names updated"
    );
    Ok(report(ProcessOutcome::Rewritten {
        summary,
        marker_added,
    }))
}

/// What a gcode file currently records about its extruders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcodeInspection {
    pub path: String,
    pub processed: bool,
    pub has_notes: bool,
    pub fragments: usize,
    pub named_extruders: usize,
    pub filament_types: Vec<String>,
    pub filament_used: Vec<String>,
    pub spools: BTreeMap<usize, String>,
}

fn file_starts_with_marker(path: &Path, marker: &str) -> Result<bool> {
    let file = File::open(path).map_err(|source| PostprocessError::MissingFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mut line = Vec::new();
    BufReader::new(file).read_until(b'\n', &mut line)?;
    Ok(has_marker(&line, marker))
}

pub fn inspect_file(path: &Path, config: &PostprocessConfig) -> Result<GcodeInspection> {
    let window = read_tail(path, config.tail_lines)?;
    let annotations = parse_annotations(&window.text);
    Ok(GcodeInspection {
        path: path.display().to_string(),
        processed: file_starts_with_marker(path, &config.marker)?,
        has_notes: annotations.notes.is_some(),
        fragments: annotations.notes.as_ref().map_or(0, |n| n.fragments.len()),
        named_extruders: count_named_extruders(&window.text),
        filament_types: annotations
            .types
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect(),
        filament_used: annotations
            .used
            .map(|u| u.entries.iter().map(|e| e.trim().to_string()).collect())
            .unwrap_or_default(),
        spools: spools_from_tail(&window.text),
    })
}
