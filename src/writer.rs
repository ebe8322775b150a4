//! Reassembles head + rewritten tail and writes the file back in one go.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{PostprocessError, Result};
use crate::tail::TailWindow;

pub const PROCESSED_MARKER: &str = "; Edited with NVF Postprocessor";

fn first_line(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == b'\n') {
        Some(pos) => &bytes[..=pos],
        None => bytes,
    }
}

pub fn has_marker(content_start: &[u8], marker: &str) -> bool {
    first_line(content_start).starts_with(marker.as_bytes())
}

/// Build the full new file content. Returns it and whether a marker was added.
///
/// The marker line reuses the first line's `\r\n` ending if it has one.
pub fn assemble(head: &[u8], original_tail: &str, new_tail: &str, marker: &str) -> (Vec<u8>, bool) {
    let original_start = if head.is_empty() {
        original_tail.as_bytes()
    } else {
        head
    };
    let needs_marker = !has_marker(original_start, marker);

    let mut out = Vec::with_capacity(head.len() + new_tail.len() + marker.len() + 2);
    if needs_marker {
        out.extend_from_slice(marker.as_bytes());
        if first_line(original_start).ends_with(b"\r\n") {
            out.extend_from_slice(b"\r\n");
        } else {
            out.push(b'\n');
        }
    }
    out.extend_from_slice(head);
    out.extend_from_slice(new_tail.as_bytes());
    (out, needs_marker)
}

pub fn read_head(path: &Path, head_len: u64) -> Result<Vec<u8>> {
    let missing = |source| PostprocessError::MissingFile {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(missing)?;
    let mut head = Vec::with_capacity(head_len as usize);
    file.take(head_len).read_to_end(&mut head).map_err(missing)?;
    Ok(head)
}

fn write_direct(path: &Path, data: &[u8]) -> std::io::Result<()> {
    fs::write(path, data)
}

/// Write through a sibling temp file renamed over the target.
///
/// A symlinked path is resolved first so the link itself survives. The
/// replacement file is owned by the current user, not the original owner.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let path = resolved.as_path();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path).map(|m| m.permissions()).ok();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        fs::set_permissions(tmp.path(), permissions)?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Overwrite `path` with its head followed by `new_tail`, ensuring the marker line.
pub fn commit(
    path: &Path,
    window: &TailWindow,
    new_tail: &str,
    marker: &str,
    atomic: bool,
) -> Result<bool> {
    let head = read_head(path, window.head_len)?;
    let (content, marker_added) = assemble(&head, &window.text, new_tail, marker);
    debug!(
        path = %path.display(),
        bytes = content.len(),
        marker_added,
        atomic,
        "writing gcode file"
    );
    let written = if atomic {
        write_atomic(path, &content)
    } else {
        write_direct(path, &content)
    };
    written.map_err(|source| PostprocessError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(marker_added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn marker_is_prepended_once() {
        let (out, added) = assemble(b"G28\n", "M84\n", "M84\n", PROCESSED_MARKER);
        assert!(added);
        assert_eq!(out, b"; Edited with NVF Postprocessor\nG28\nM84\n");

        let text = String::from_utf8(out).unwrap();
        let (again, added) = assemble(b"", &text, &text, PROCESSED_MARKER);
        assert!(!added);
        assert_eq!(again, text.as_bytes());
    }

    #[test]
    fn marker_follows_crlf_files() {
        let (out, _) = assemble(b"", "G28\r\nM84\r\n", "G28\r\nM84\r\n", PROCESSED_MARKER);
        assert!(out.starts_with(b"; Edited with NVF Postprocessor\r\nG28\r\n"));
    }

    #[test]
    fn marker_check_uses_first_line_only() {
        assert!(has_marker(b"; Edited with NVF Postprocessor\nG1\n", PROCESSED_MARKER));
        assert!(!has_marker(b"G1\n; Edited with NVF Postprocessor\n", PROCESSED_MARKER));
        assert!(!has_marker(b"", PROCESSED_MARKER));
    }

    #[test]
    fn commit_keeps_head_bytes() {
        let td = tempdir().unwrap();
        let path = td.path().join("part.gcode");
        fs::write(&path, "head1\nhead2\ntail\n").unwrap();
        let window = TailWindow {
            head_len: 12,
            text: "tail\n".to_string(),
        };

        for atomic in [true, false] {
            fs::write(&path, "head1\nhead2\ntail\n").unwrap();
            let added = commit(&path, &window, "new tail\n", PROCESSED_MARKER, atomic).unwrap();
            assert!(added);
            assert_eq!(
                fs::read_to_string(&path).unwrap(),
                "; Edited with NVF Postprocessor\nhead1\nhead2\nnew tail\n"
            );
        }
    }

    #[test]
    fn commit_into_missing_directory_fails() {
        let td = tempdir().unwrap();
        let path = td.path().join("gone").join("part.gcode");
        let window = TailWindow {
            head_len: 0,
            text: String::new(),
        };
        let err = commit(&path, &window, "x\n", PROCESSED_MARKER, false).unwrap_err();
        assert!(matches!(err, PostprocessError::MissingFile { .. }));
    }

    #[test]
    fn rename_over_directory_is_write_failure() {
        let td = tempdir().unwrap();
        let path = td.path().join("print.gcode");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();
        let window = TailWindow {
            head_len: 0,
            text: String::new(),
        };
        let err = commit(&path, &window, "x\n", PROCESSED_MARKER, true).unwrap_err();
        assert!(matches!(err, PostprocessError::WriteFailure { .. }));
        assert!(path.join("occupied").exists());
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_keeps_symlink() {
        let td = tempdir().unwrap();
        let target = td.path().join("real.gcode");
        let link = td.path().join("link.gcode");
        fs::write(&target, "G28\n").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let window = TailWindow {
            head_len: 0,
            text: "G28\n".to_string(),
        };

        commit(&link, &window, "G28\n", PROCESSED_MARKER, true).unwrap();
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "; Edited with NVF Postprocessor\nG28\n"
        );
    }
}
