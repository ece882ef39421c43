//! Per-job results and the consolidated run summary.

use crate::context::{RunContext, RunMode};
use crate::fs::FileSelection;
use crate::preflight::PreflightFailure;
use crate::utils::size::{format_duration, format_size};
use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::fmt::Write;
use std::time::{Duration, Instant};
use tracing::warn;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of one job in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    SkippedSchedule,
    SkippedDisabled,
    SkippedPreflightFailed { reason: PreflightFailure },
    /// The run was cancelled before this job started
    SkippedInterrupted,
    Ok,
    Failed { error: String },
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::SkippedSchedule => "skipped_schedule",
            JobStatus::SkippedDisabled => "skipped_disabled",
            JobStatus::SkippedPreflightFailed { .. } => "skipped_preflight_failed",
            JobStatus::SkippedInterrupted => "skipped_interrupted",
            JobStatus::Ok => "ok",
            JobStatus::Failed { .. } => "failed",
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            JobStatus::SkippedSchedule => "SKIPPED: not scheduled today",
            JobStatus::SkippedDisabled => "SKIPPED: transfer disabled",
            JobStatus::SkippedPreflightFailed { .. } => "SKIPPED: pre-flight failed",
            JobStatus::SkippedInterrupted => "SKIPPED: run interrupted",
            JobStatus::Ok => "SUCCESS",
            JobStatus::Failed { .. } => "FAILED",
        }
    }

    /// Present exactly for preflight skips and failures
    pub fn error_detail(&self) -> Option<String> {
        match self {
            JobStatus::SkippedPreflightFailed { reason } => Some(reason.to_string()),
            JobStatus::Failed { error } => Some(error.clone()),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failed { .. })
    }

    pub fn is_skip(&self) -> bool {
        !matches!(self, JobStatus::Ok | JobStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub job_name: String,
    #[serde(flatten)]
    pub status: JobStatus,
    pub files_count: usize,
    pub bytes_total: u64,
    /// Files left out for being older than the age cutoff
    pub files_excluded_by_age: usize,
    pub files_unreadable: usize,
    /// Set only when a transfer was attempted
    pub bytes_transferred: Option<u64>,
    pub latest_file_mtime: Option<DateTime<Local>>,
    pub destination_dir_created: Option<String>,
    pub notes: Vec<String>,
    /// Planning estimate for copying `bytes_total`, set by analysis runs
    #[serde(serialize_with = "serialize_opt_secs")]
    pub estimated_transfer: Option<Duration>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl JobResult {
    pub fn new(job_name: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_name: job_name.into(),
            status,
            files_count: 0,
            bytes_total: 0,
            files_excluded_by_age: 0,
            files_unreadable: 0,
            bytes_transferred: None,
            latest_file_mtime: None,
            destination_dir_created: None,
            notes: Vec::new(),
            estimated_transfer: None,
            duration: Duration::ZERO,
        }
    }

    /// Result carrying the metrics of a computed selection.
    pub fn with_selection(mut self, selection: &FileSelection) -> Self {
        self.files_count = selection.len();
        self.bytes_total = selection.total_bytes;
        self.latest_file_mtime = selection.latest_modified;
        self.files_excluded_by_age = selection.excluded_by_age;
        self.files_unreadable = selection.unreadable;
        self
    }

    /// Estimate how long copying `bytes_total` takes at `rate` bytes per second.
    pub fn with_estimate(mut self, rate: u64) -> Self {
        self.estimated_transfer =
            (rate > 0).then(|| Duration::from_secs_f64(self.bytes_total as f64 / rate as f64));
        self
    }
}

/// Process exit status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    Success,
    /// Configuration or system error kept every job from running
    Fatal,
    JobsFailed,
    Interrupted,
}

impl RunExit {
    pub fn code(self) -> u8 {
        match self {
            RunExit::Success => 0,
            RunExit::Fatal => 1,
            RunExit::JobsFailed => 2,
            RunExit::Interrupted => 130,
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub host: String,
    pub started_at: DateTime<Local>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    /// One entry per configured job, in configuration order
    pub results: Vec<JobResult>,
    pub fatal_error: Option<String>,
    pub interrupted: bool,
    pub exit: RunExit,
    pub exit_code: u8,
}

impl RunSummary {
    pub fn has_errors(&self) -> bool {
        self.fatal_error.is_some() || self.results.iter().any(|r| r.status.is_failure())
    }

    pub fn count(&self, predicate: impl Fn(&JobStatus) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.status)).count()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.status == JobStatus::Ok)
            .filter_map(|r| r.bytes_transferred)
            .sum()
    }

    pub fn subject(&self, base: &str) -> String {
        if self.has_errors() {
            format!("{} - WITH ERRORS", base)
        } else {
            base.to_string()
        }
    }

    /// Plain-text report for logs and notifications.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let transferred = self.bytes_transferred();

        // Writing into a String cannot fail.
        let _ = writeln!(out, "=== Backup Copy Summary ===");
        let _ = writeln!(out);
        let _ = writeln!(out, "Host: {}", self.host);
        let _ = writeln!(out, "Mode: {}", self.mode);
        let _ = writeln!(out, "Started: {}", self.started_at.format(DATE_FORMAT));
        let _ = writeln!(out, "Total backups processed: {}", self.results.len());
        let _ = writeln!(out, "Successful: {}", self.count(|s| *s == JobStatus::Ok));
        let _ = writeln!(out, "Failed: {}", self.count(JobStatus::is_failure));
        let _ = writeln!(out, "Skipped: {}", self.count(JobStatus::is_skip));
        let _ = writeln!(
            out,
            "Total bytes transferred: {} ({} bytes)",
            format_size(transferred),
            transferred
        );
        let _ = writeln!(out, "Total execution time: {}", format_duration(self.duration));
        if let Some(error) = &self.fatal_error {
            let _ = writeln!(out, "Fatal error: {}", error);
        }
        if self.interrupted {
            let _ = writeln!(out, "Run was interrupted before completion");
        }

        let _ = writeln!(out);
        let _ = write!(out, "=== Individual Backup Results ===");
        for result in &self.results {
            let _ = writeln!(out);
            let _ = writeln!(out);
            let _ = write!(out, "[{}] {}", result.status.heading(), result.job_name);

            if result.files_count > 0 || result.bytes_total > 0 {
                let _ = write!(
                    out,
                    "\n  Files: {} ({})",
                    result.files_count,
                    format_size(result.bytes_total)
                );
            }
            if result.files_excluded_by_age > 0 || result.files_unreadable > 0 {
                let _ = write!(
                    out,
                    "\n  Excluded: {} (older than cutoff), Unreadable: {}",
                    result.files_excluded_by_age, result.files_unreadable
                );
            }
            if let Some(estimate) = result.estimated_transfer {
                let _ = write!(out, "\n  Estimated transfer time: {}", format_duration(estimate));
            }
            if let Some(bytes) = result.bytes_transferred {
                let _ = write!(out, "\n  Bytes transferred: {}", format_size(bytes));
            }
            if let Some(mtime) = result.latest_file_mtime {
                let _ = write!(out, "\n  Latest file date: {}", mtime.format(DATE_FORMAT));
            }
            if let Some(dir) = &result.destination_dir_created {
                let _ = write!(out, "\n  Destination: {}", dir);
            }
            if !result.duration.is_zero() {
                let _ = write!(out, "\n  Execution time: {}", format_duration(result.duration));
            }
            if let Some(detail) = result.status.error_detail() {
                let _ = write!(out, "\n  Error: {}", detail);
            }
            for note in &result.notes {
                let _ = write!(out, "\n  Note: {}", note);
            }
        }
        out.push('\n');
        out
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn serialize_opt_secs<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(duration) => serialize_secs(duration, serializer),
        None => serializer.serialize_none(),
    }
}

/// Collects job results into a [`RunSummary`].
///
/// Holds one slot per configured job. Each slot is filled at most once;
/// slots still empty at [`finish`](Self::finish) become `skipped_interrupted`.
pub struct RunAggregator {
    mode: RunMode,
    host: String,
    started_at: DateTime<Local>,
    clock: Instant,
    slots: Vec<(String, Option<JobResult>)>,
    fatal_error: Option<String>,
    interrupted: bool,
}

impl RunAggregator {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            mode: ctx.mode.clone(),
            host: ctx.host.clone(),
            started_at: ctx.run_timestamp,
            clock: Instant::now(),
            slots: ctx.jobs.iter().map(|job| (job.name.clone(), None)).collect(),
            fatal_error: None,
            interrupted: false,
        }
    }

    /// Fill the slot for `result.job_name`. Returns false if the job is
    /// unknown or already recorded; the first result wins.
    pub fn record(&mut self, result: JobResult) -> bool {
        match self.slots.iter_mut().find(|(name, _)| *name == result.job_name) {
            Some((_, slot @ None)) => {
                *slot = Some(result);
                true
            }
            Some((name, Some(_))) => {
                warn!(job = %name, "Job result already recorded, ignoring duplicate");
                false
            }
            None => {
                warn!(job = %result.job_name, "Result for unknown job ignored");
                false
            }
        }
    }

    pub fn set_fatal(&mut self, error: impl Into<String>) {
        self.fatal_error.get_or_insert_with(|| error.into());
    }

    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub fn finish(self) -> RunSummary {
        let results: Vec<JobResult> = self
            .slots
            .into_iter()
            .map(|(name, slot)| slot.unwrap_or_else(|| JobResult::new(name, JobStatus::SkippedInterrupted)))
            .collect();

        let exit = if self.fatal_error.is_some() {
            RunExit::Fatal
        } else if self.interrupted {
            RunExit::Interrupted
        } else if results.iter().any(|r| r.status.is_failure()) {
            RunExit::JobsFailed
        } else {
            RunExit::Success
        };

        RunSummary {
            mode: self.mode,
            host: self.host,
            started_at: self.started_at,
            duration: self.clock.elapsed(),
            results,
            fatal_error: self.fatal_error,
            interrupted: self.interrupted,
            exit,
            exit_code: exit.code(),
        }
    }
}
