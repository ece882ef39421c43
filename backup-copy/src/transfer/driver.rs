//! Runs one job's transfer: create the dated directory, then copy.
//!
//! A copy is attempted once. It ends early when the job's timeout elapses
//! or the run is cancelled; dropping the in-flight copy kills the child
//! process, since every tool spawns with `kill_on_drop`.

use super::{CopyRequest, TransferFailure, TransferTool};
use crate::config::JobConfig;
use crate::fs::FileSelection;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DriveError {
    /// Nothing was copied
    #[error("could not create destination directory {path}: {detail}")]
    CreateDir { path: String, detail: String },

    /// The copy started and did not complete
    #[error(transparent)]
    Transfer(#[from] TransferFailure),
}

pub struct TransferDriver<'a> {
    tool: &'a dyn TransferTool,
    cancel: CancellationToken,
}

impl<'a> TransferDriver<'a> {
    pub fn new(tool: &'a dyn TransferTool, cancel: CancellationToken) -> Self {
        Self { tool, cancel }
    }

    /// Copy `selection` into `destination` and return the bytes moved.
    pub async fn drive(
        &self,
        job: &JobConfig,
        selection: &FileSelection,
        destination: &str,
    ) -> Result<u64, DriveError> {
        self.tool
            .make_dir(destination)
            .await
            .map_err(|e| DriveError::CreateDir {
                path: destination.to_string(),
                detail: e.to_string(),
            })?;

        let request = CopyRequest {
            job_name: &job.name,
            source_root: &job.source_dir,
            selection,
            destination,
        };

        info!(
            job = %job.name,
            tool = self.tool.name(),
            files = selection.len(),
            %destination,
            "Starting transfer"
        );

        let copy = async {
            match job.timeout_minutes {
                Some(minutes) => {
                    let limit = Duration::from_secs(minutes * 60);
                    tokio::time::timeout(limit, self.tool.copy(&request))
                        .await
                        .unwrap_or_else(|_| {
                            warn!(job = %job.name, minutes, "Transfer timed out");
                            Err(TransferFailure::new(format!(
                                "transfer timed out after {} minutes",
                                minutes
                            )))
                        })
                }
                None => self.tool.copy(&request).await,
            }
        };

        let result = tokio::select! {
            result = copy => result,
            _ = self.cancel.cancelled() => {
                warn!(job = %job.name, "Transfer interrupted");
                Err(TransferFailure::new("transfer interrupted"))
            }
        };

        Ok(result?)
    }
}
