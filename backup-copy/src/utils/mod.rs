//! Utility modules for backup-copy.

pub mod errors;
pub mod logger;
pub mod size;

pub use errors::{CopyError, Result};
pub use size::{format_duration, format_size, parse_size, ByteSize};
