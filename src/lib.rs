pub mod about;
pub mod annotation;
pub mod error;
pub mod octoprint;
pub mod patcher;
pub mod postprocess;
pub mod settings;
pub mod spool_data;
pub mod tail;
pub mod writer;

pub use error::{PostprocessError, Result};
pub use postprocess::{inspect_file, process_file, PostprocessConfig, ProcessOutcome, ProcessReport};
