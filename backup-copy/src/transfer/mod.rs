//! Transfer tool abstraction.
//!
//! The orchestrator never moves bytes itself. Everything that touches a
//! destination (free space, directory creation, copying, listing, deleting)
//! goes through a [`TransferTool`].

pub mod driver;
pub mod local;
pub mod rclone;

use crate::fs::FileSelection;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use driver::{DriveError, TransferDriver};
pub use local::LocalCopyTool;
pub use rclone::RcloneTool;

/// Everything a tool needs to copy one job's selection.
#[derive(Debug, Clone, Copy)]
pub struct CopyRequest<'a> {
    pub job_name: &'a str,
    pub source_root: &'a Path,
    pub selection: &'a FileSelection,
    /// Timestamped destination directory, already created
    pub destination: &'a str,
}

/// A copy that started but did not complete.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransferFailure {
    pub message: String,
    /// Bytes that reached the destination before the failure
    pub bytes_transferred: u64,
}

impl TransferFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            bytes_transferred: 0,
        }
    }
}

#[async_trait]
pub trait TransferTool: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Check the tool can be used at all. Failure is fatal for the run.
    async fn verify(&self) -> Result<()>;

    /// Free bytes available at a destination endpoint
    async fn free_space(&self, endpoint: &str) -> Result<u64>;

    /// Create a destination directory (and its parents)
    async fn make_dir(&self, path: &str) -> Result<()>;

    /// Copy the selected files, preserving their relative layout, and
    /// return the number of bytes moved.
    async fn copy(&self, request: &CopyRequest<'_>) -> std::result::Result<u64, TransferFailure>;

    /// Names of the directories directly below `parent`
    async fn list_dirs(&self, parent: &str) -> Result<Vec<String>>;

    /// Remove a directory and everything in it
    async fn remove_dir(&self, path: &str) -> Result<()>;
}

/// Append a directory name to a destination base.
///
/// Works for both `remote:` style bases and plain paths.
pub fn join_destination(base: &str, name: &str) -> String {
    if base.ends_with('/') || base.ends_with(':') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// The storage endpoint whose free space a destination draws on.
///
/// `remote:some/path` maps to `remote:`; anything else is a local path and
/// is its own endpoint.
pub fn endpoint_of(destination: &str) -> String {
    match destination.split_once(':') {
        Some((remote, _)) if is_remote_name(remote) => format!("{}:", remote),
        _ => destination.to_string(),
    }
}

fn is_remote_name(candidate: &str) -> bool {
    !candidate.is_empty()
        && !candidate.contains(['/', '\\'])
        // Single letters are drive prefixes on Windows; rclone treats them
        // as remotes everywhere else.
        && (!cfg!(windows) || candidate.len() > 1)
}
