//! One backup run, start to finish.
//!
//! Jobs go through the schedule filter, preflight, transfer and retention in
//! configuration order, one at a time. Every configured job ends up with
//! exactly one [`JobResult`], and the finished summary is handed to the
//! notifier once, whatever happened along the way.

use crate::config::JobConfig;
use crate::context::{dated_dir_name, RunContext};
use crate::notify::Notifier;
use crate::preflight::{Candidate, PreflightChecker};
use crate::retention::RetentionManager;
use crate::summary::{JobResult, JobStatus, RunAggregator, RunSummary};
use crate::transfer::{DriveError, TransferDriver, TransferTool};
use crate::utils::size::format_size;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Orchestrator<'a> {
    tool: &'a dyn TransferTool,
    notifier: &'a dyn Notifier,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(tool: &'a dyn TransferTool, notifier: &'a dyn Notifier, cancel: CancellationToken) -> Self {
        Self {
            tool,
            notifier,
            cancel,
        }
    }

    /// Execute the run and deliver its summary.
    pub async fn run(self, ctx: &RunContext) -> RunSummary {
        info!(
            mode = %ctx.mode,
            jobs = ctx.jobs.len(),
            timestamp = %ctx.timestamp_label(),
            "Starting backup run"
        );

        let mut aggregator = RunAggregator::new(ctx);
        let due = self.due_jobs(ctx, &mut aggregator);

        if due.is_empty() {
            info!("No jobs due in this run");
        } else {
            self.run_due(ctx, &due, &mut aggregator).await;
        }

        if self.cancel.is_cancelled() {
            aggregator.mark_interrupted();
        }

        let summary = aggregator.finish();
        info!(
            exit_code = summary.exit_code,
            duration_secs = summary.duration.as_secs(),
            "Backup run finished"
        );

        if let Err(e) = self.notifier.notify(&summary).await {
            error!(error = %e, "Failed to deliver run summary");
        }
        summary
    }

    /// Jobs taking part in this run. Jobs filtered out are recorded here.
    fn due_jobs<'c>(&self, ctx: &'c RunContext, aggregator: &mut RunAggregator) -> Vec<&'c JobConfig> {
        if !ctx.mode.honours_schedule() {
            return ctx.jobs.iter().collect();
        }

        let today = ctx.run_timestamp.date_naive();
        let mut due = Vec::with_capacity(ctx.jobs.len());

        for job in &ctx.jobs {
            if !job.transfer_enabled {
                info!(job = %job.name, "Transfer disabled, skipping");
                aggregator.record(JobResult::new(&job.name, JobStatus::SkippedDisabled));
            } else if !job.schedule.is_due(today) {
                let next = job.schedule.next_due_date(today);
                info!(
                    job = %job.name,
                    schedule = %job.schedule,
                    next_due = ?next,
                    "Not scheduled today, skipping"
                );
                aggregator.record(JobResult::new(&job.name, JobStatus::SkippedSchedule));
            } else {
                due.push(job);
            }
        }

        due
    }

    async fn run_due(&self, ctx: &RunContext, due: &[&JobConfig], aggregator: &mut RunAggregator) {
        let report = match PreflightChecker::new(self.tool, ctx).run(due).await {
            Ok(report) => report,
            Err(failure) => {
                error!(reason = %failure, "Pre-flight failed for the whole run");
                aggregator.set_fatal(failure.to_string());
                for job in due {
                    aggregator.record(JobResult::new(
                        &job.name,
                        JobStatus::SkippedPreflightFailed {
                            reason: failure.clone(),
                        },
                    ));
                }
                return;
            }
        };

        for (job, reason) in report.rejected {
            aggregator.record(JobResult::new(
                &job.name,
                JobStatus::SkippedPreflightFailed { reason },
            ));
        }

        for candidate in report.candidates {
            if self.cancel.is_cancelled() {
                warn!(job = %candidate.job.name, "Run cancelled, not starting remaining jobs");
                aggregator.mark_interrupted();
                break;
            }
            aggregator.record(self.run_job(ctx, candidate).await);
        }
    }

    async fn run_job(&self, ctx: &RunContext, candidate: Candidate<'_>) -> JobResult {
        let started = Instant::now();
        let Candidate { job, selection } = candidate;
        let mut result = JobResult::new(&job.name, JobStatus::Ok).with_selection(&selection);

        if !ctx.mode.touches_destination() {
            info!(
                job = %job.name,
                files = selection.len(),
                size = %format_size(selection.total_bytes),
                "Analysis only, nothing transferred"
            );
            result = result.with_estimate(ctx.mode.planning_rate());
            result.duration = started.elapsed();
            return result;
        }

        if selection.is_empty() {
            info!(job = %job.name, "No files selected, creating an empty copy");
        }

        let destination = ctx.destination_dir(job);
        let driver = TransferDriver::new(self.tool, self.cancel.clone());

        match driver.drive(job, &selection, &destination).await {
            Ok(bytes) => {
                info!(
                    job = %job.name,
                    bytes,
                    %destination,
                    "Transferred {}",
                    format_size(bytes)
                );
                result.bytes_transferred = Some(bytes);
                result.destination_dir_created = Some(destination);

                let created = dated_dir_name(&job.name, &ctx.timestamp_label());
                let cleanup = RetentionManager::new(self.tool)
                    .apply(&ctx.destination_base(job), &job.name, job.retention_count, &created)
                    .await;
                debug!(
                    job = %job.name,
                    kept = cleanup.kept.len(),
                    removed = cleanup.removed.len(),
                    "Retention applied"
                );
                result.notes = cleanup.notes;
            }
            Err(DriveError::Transfer(failure)) => {
                error!(job = %job.name, error = %failure, "Transfer failed");
                result.status = JobStatus::Failed {
                    error: failure.message,
                };
                result.bytes_transferred = Some(failure.bytes_transferred);
                result.destination_dir_created = Some(destination);
            }
            Err(e) => {
                error!(job = %job.name, error = %e, "Transfer could not start");
                result.status = JobStatus::Failed {
                    error: e.to_string(),
                };
            }
        }

        result.duration = started.elapsed();
        result
    }
}
