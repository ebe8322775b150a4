use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostprocessError {
    #[error("Could not read gcode file '{}': {source}", path.display())]
    MissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Trailing metadata of '{}' is not valid UTF-8 text", path.display())]
    Encoding { path: PathBuf },

    #[error("Could not write gcode file '{}': {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Invalid spool data: {0}")]
    SpoolData(String),

    #[error("OctoPrint error: {0}")]
    Octoprint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PostprocessError>;
