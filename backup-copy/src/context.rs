//! Per-run context shared by every orchestrator stage.

use crate::config::{AppConfig, JobConfig};
use crate::transfer::{endpoint_of, join_destination};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Timestamp embedded in destination directory names, e.g. `2024-06-01_05-00`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

const REMOTE_RATE: u64 = 5 * 1024 * 1024;
const LOCAL_RATE: u64 = 50 * 1024 * 1024;

/// How a run treats schedules, destinations and transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "destination")]
pub enum RunMode {
    /// Scheduled copy to each job's configured destination
    Remote,
    /// Copy every job into one local directory, ignoring schedules
    LocalPath(PathBuf),
    /// Compute selections and sizes only
    Analysis,
}

impl RunMode {
    /// Whether schedules and the per-job enable flag filter the job list
    pub fn honours_schedule(&self) -> bool {
        matches!(self, RunMode::Remote)
    }

    /// Whether the run talks to destinations at all
    pub fn touches_destination(&self) -> bool {
        !matches!(self, RunMode::Analysis)
    }

    /// Whether destination endpoints are held to the free-space minimum.
    /// A local override target is the operator's own choice and is not.
    pub fn checks_free_space(&self) -> bool {
        matches!(self, RunMode::Remote)
    }

    /// Assumed throughput, in bytes per second, for transfer estimates.
    /// Analysis plans for the remote rate.
    pub fn planning_rate(&self) -> u64 {
        match self {
            RunMode::LocalPath(_) => LOCAL_RATE,
            RunMode::Remote | RunMode::Analysis => REMOTE_RATE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunMode::Remote => "remote",
            RunMode::LocalPath(_) => "local",
            RunMode::Analysis => "analysis",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::LocalPath(root) => write!(f, "local ({})", root.display()),
            other => f.write_str(other.label()),
        }
    }
}

/// Everything fixed for the duration of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub mode: RunMode,
    /// Captured once; names every destination directory and anchors age cutoffs
    pub run_timestamp: DateTime<Local>,
    pub jobs: Vec<JobConfig>,
    /// Minimum free bytes each destination endpoint must report
    pub min_free_space: u64,
    pub host: String,
}

impl RunContext {
    pub fn new(mode: RunMode, config: &AppConfig, run_timestamp: DateTime<Local>) -> Self {
        Self {
            mode,
            run_timestamp,
            jobs: config.jobs.clone(),
            min_free_space: config.checks.min_free_space.bytes(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string()),
        }
    }

    pub fn timestamp_label(&self) -> String {
        self.run_timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Directory holding all dated copies of a job
    pub fn destination_base(&self, job: &JobConfig) -> String {
        match &self.mode {
            RunMode::LocalPath(root) => root.to_string_lossy().into_owned(),
            RunMode::Remote | RunMode::Analysis => job.destination_path.clone(),
        }
    }

    /// `<base>/<job>_<timestamp>` for this run
    pub fn destination_dir(&self, job: &JobConfig) -> String {
        join_destination(
            &self.destination_base(job),
            &dated_dir_name(&job.name, &self.timestamp_label()),
        )
    }

    /// Endpoint whose free space this job's copy consumes
    pub fn endpoint_for(&self, job: &JobConfig) -> String {
        endpoint_of(&self.destination_base(job))
    }
}

pub fn dated_dir_name(job_name: &str, timestamp: &str) -> String {
    format!("{}_{}", job_name, timestamp)
}
