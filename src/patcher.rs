//! Rewrites `sm_name` values in the notes comment and pads the filament-used
//! list, producing a new tail text.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::annotation::{parse_annotations, NotesAnnotation, UsedAnnotation};

/// Replacement text for a byte range of the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    pub range: Range<usize>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedExtruder {
    pub extruder: usize,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedListChange {
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    pub fragments: usize,
    pub renamed: Vec<RenamedExtruder>,
    /// Extruders that were given a name but have no `sm_name` token to hold it.
    pub without_token: Vec<usize>,
    /// Extruders whose name was refused because it would break the notes line.
    pub rejected: Vec<usize>,
    pub ignored_replacements: usize,
    pub used_list: Option<UsedListChange>,
}

/// Splices for every fragment whose `sm_name` should change.
///
/// `replacements[i]` targets extruder `i + 1`; `None` leaves it alone. Fragments
/// without a token are never given one. Names containing a line break, `;` or
/// `]` are refused so the fragment layout stays the same.
pub fn patch_notes(
    notes: &NotesAnnotation<'_>,
    replacements: &[Option<String>],
    summary: &mut PatchSummary,
) -> Vec<Splice> {
    summary.fragments = notes.fragments.len();
    if replacements.len() > notes.fragments.len() {
        summary.ignored_replacements = replacements.len() - notes.fragments.len();
        debug!(
            ignored = summary.ignored_replacements,
            fragments = notes.fragments.len(),
            "more replacement values than note fragments"
        );
    }

    let mut splices = Vec::new();
    for (i, fragment) in notes.fragments.iter().enumerate() {
        let extruder = i + 1;
        let Some(Some(name)) = replacements.get(i) else {
            continue;
        };
        if name.contains(['\n', '\r', ';', ']']) {
            warn!(
                extruder,
                name = %name.escape_debug(),
                "spool name contains a line break or note delimiter, leaving note unchanged"
            );
            summary.rejected.push(extruder);
            continue;
        }
        let Some(token) = &fragment.sm_name else {
            debug!(extruder, "note has no sm_name token, replacement dropped");
            summary.without_token.push(extruder);
            continue;
        };
        if token.value == name {
            continue;
        }
        summary.renamed.push(RenamedExtruder {
            extruder,
            from: token.value.to_string(),
            to: name.clone(),
        });
        splices.push(Splice {
            range: token.span.clone(),
            text: name.clone(),
        });
    }
    splices
}

/// Pad the used list with `"0"` up to `num_filaments` when the lengths differ.
///
/// The list is never shortened. Entries are trimmed and rejoined with `", "`.
pub fn reconcile_used(used: &UsedAnnotation<'_>, num_filaments: usize) -> Option<(Splice, UsedListChange)> {
    if used.entries.len() == num_filaments {
        return None;
    }
    let mut entries: Vec<&str> = used.entries.iter().map(|e| e.trim()).collect();
    if entries.len() < num_filaments {
        entries.resize(num_filaments, "0");
    }
    let change = UsedListChange {
        before: used.entries.len(),
        after: entries.len(),
    };
    let splice = Splice {
        range: used.line.value.clone(),
        text: entries.join(", "),
    };
    Some((splice, change))
}

/// Apply non-overlapping splices to `text`.
pub fn apply_splices(text: &str, mut splices: Vec<Splice>) -> String {
    splices.sort_by_key(|s| s.range.start);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for splice in splices {
        out.push_str(&text[cursor..splice.range.start]);
        out.push_str(&splice.text);
        cursor = splice.range.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Rewrite a tail window. Returns `None` when it has no notes comment.
pub fn rewrite_tail(tail: &str, replacements: &[Option<String>]) -> Option<(String, PatchSummary)> {
    let annotations = parse_annotations(tail);
    let notes = annotations.notes.as_ref()?;

    let mut summary = PatchSummary::default();
    let mut splices = patch_notes(notes, replacements, &mut summary);
    if let Some(used) = &annotations.used {
        if let Some((splice, change)) = reconcile_used(used, annotations.num_filaments()) {
            debug!(before = change.before, after = change.after, "reconciled filament used list");
            summary.used_list = Some(change);
            splices.push(splice);
        }
    }
    Some((apply_splices(tail, splices), summary))
}
