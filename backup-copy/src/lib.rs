//! Backup Copy Library
//!
//! Copies configured directory trees to rclone remotes or a local path on a
//! day-level schedule, with size budgets, age filters and dated retention.

pub mod config;
pub mod context;
pub mod fs;
pub mod notify;
pub mod orchestrator;
pub mod preflight;
pub mod retention;
pub mod schedule;
pub mod shutdown;
pub mod summary;
pub mod transfer;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::errors::{CopyError, Result};
