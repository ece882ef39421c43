//! Pruning of dated destination directories.
//!
//! A job's copies live next to each other as `<job>_<timestamp>`. Only names
//! whose suffix parses as a timestamp count, so `web_app_2024-...` is never
//! mistaken for a copy of job `web`.

use crate::context::TIMESTAMP_FORMAT;
use crate::transfer::{join_destination, TransferTool};
use chrono::NaiveDateTime;
use tracing::{info, warn};

/// Retention applied to jobs that do not set one.
pub const DEFAULT_RETENTION: usize = 2;

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    /// Directories kept, newest first
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    /// Warnings for the job result; cleanup never fails a job
    pub notes: Vec<String>,
}

/// Timestamp of a directory belonging to `job_name`, if it is one.
pub fn dated_dir_timestamp(dir_name: &str, job_name: &str) -> Option<NaiveDateTime> {
    let suffix = dir_name.strip_prefix(job_name)?.strip_prefix('_')?;
    NaiveDateTime::parse_from_str(suffix, TIMESTAMP_FORMAT).ok()
}

/// Split a listing into (kept, to delete), both newest first.
pub fn plan_retention(names: &[String], job_name: &str, keep: usize) -> (Vec<String>, Vec<String>) {
    let mut dated: Vec<(NaiveDateTime, &String)> = names
        .iter()
        .filter_map(|name| dated_dir_timestamp(name, job_name).map(|ts| (ts, name)))
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(a.1)));

    let keep = keep.max(1);
    let mut names = dated.into_iter().map(|(_, name)| name.clone());
    let kept: Vec<String> = names.by_ref().take(keep).collect();
    (kept, names.collect())
}

pub struct RetentionManager<'a> {
    tool: &'a dyn TransferTool,
}

impl<'a> RetentionManager<'a> {
    pub fn new(tool: &'a dyn TransferTool) -> Self {
        Self { tool }
    }

    /// Keep the newest `keep` copies of `job_name` under `base`.
    ///
    /// `created` is this run's directory name; if it is missing from the
    /// listing nothing is pruned.
    pub async fn apply(&self, base: &str, job_name: &str, keep: usize, created: &str) -> RetentionOutcome {
        let mut outcome = RetentionOutcome::default();

        let names = match self.tool.list_dirs(base).await {
            Ok(names) => names,
            Err(e) => {
                warn!(job = %job_name, %base, error = %e, "Could not list destination for cleanup");
                outcome.notes.push(format!("cleanup skipped: could not list {}: {}", base, e));
                return outcome;
            }
        };

        if !names.iter().any(|name| name == created) {
            warn!(job = %job_name, %created, "New copy not found in destination listing, skipping cleanup");
            outcome
                .notes
                .push(format!("cleanup skipped: {} not found under {}", created, base));
            return outcome;
        }

        let (kept, expired) = plan_retention(&names, job_name, keep);
        outcome.kept = kept;

        for name in expired {
            let path = join_destination(base, &name);
            info!(job = %job_name, %path, "Deleting old backup");
            match self.tool.remove_dir(&path).await {
                Ok(()) => outcome.removed.push(name),
                Err(e) => {
                    warn!(job = %job_name, %path, error = %e, "Failed to delete old backup");
                    outcome.notes.push(format!("failed to delete {}: {}", path, e));
                }
            }
        }

        outcome
    }
}
