//! Reads the trailing lines of a gcode file without loading the whole file.
//!
//! Slicers write their configuration summary as comments at the very end of the
//! file, so only this window is ever parsed. Everything before it (the head) is
//! addressed by byte offset and copied through untouched.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{PostprocessError, Result};

pub const DEFAULT_TAIL_LINES: usize = 1000;

const CHUNK: usize = 8192;

/// The last lines of a file, plus the byte offset where they begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailWindow {
    pub head_len: u64,
    pub text: String,
}

impl TailWindow {
    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }
}

/// Byte offset of the first of the last `lines` lines.
///
/// A newline that ends the file terminates the final line and is not counted
/// as a separator. Returns 0 when the file has no more than `lines` lines.
pub fn locate_tail_start<R: Read + Seek>(reader: &mut R, lines: usize) -> std::io::Result<u64> {
    let len = reader.seek(SeekFrom::End(0))?;
    if lines == 0 {
        return Ok(len);
    }

    let mut buf = vec![0u8; CHUNK];
    let mut end = len;
    let mut seen = 0usize;
    while end > 0 {
        let start = end.saturating_sub(CHUNK as u64);
        let size = (end - start) as usize;
        reader.seek(SeekFrom::Start(start))?;
        reader.read_exact(&mut buf[..size])?;
        for (i, byte) in buf[..size].iter().enumerate().rev() {
            if *byte != b'\n' {
                continue;
            }
            let pos = start + i as u64;
            if pos + 1 == len {
                continue;
            }
            seen += 1;
            if seen == lines {
                return Ok(pos + 1);
            }
        }
        end = start;
    }
    Ok(0)
}

/// Return the last `lines` lines of `path`, or the whole file if it is shorter.
pub fn read_tail(path: &Path, lines: usize) -> Result<TailWindow> {
    let missing = |source| PostprocessError::MissingFile {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(missing)?;
    let head_len = locate_tail_start(&mut file, lines).map_err(missing)?;
    file.seek(SeekFrom::Start(head_len)).map_err(missing)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(missing)?;
    let text = String::from_utf8(bytes).map_err(|_| PostprocessError::Encoding {
        path: path.to_path_buf(),
    })?;
    Ok(TailWindow { head_len, text })
}
