//! Checks run once per run before any data moves.
//!
//! Order: transfer tool (fatal for the run), source directories (per job),
//! destination free space (once per endpoint, remote runs only), then file
//! selection against each job's size budget (per job). A job rejected at one
//! step is not looked at by later steps.

use crate::config::JobConfig;
use crate::context::RunContext;
use crate::fs::{FileSelection, FileSelector, WalkOptions};
use crate::transfer::TransferTool;
use crate::utils::size::{format_size, ByteSize};
use nix::unistd::{access, AccessFlags};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a job did not pass preflight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreflightFailure {
    #[error("transfer tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("source not accessible: {}: {detail}", .path.display())]
    SourceNotAccessible { path: PathBuf, detail: String },

    #[error("destination not reachable: {endpoint}: {detail}")]
    EndpointUnreachable { endpoint: String, detail: String },

    #[error("insufficient destination space on {endpoint}: {available} available, {required} required")]
    InsufficientSpace {
        endpoint: String,
        available: ByteSize,
        required: ByteSize,
    },

    #[error("size budget exceeded: computed {computed} > limit {limit}")]
    SizeBudgetExceeded { computed: ByteSize, limit: ByteSize },

    #[error("file selection failed: {0}")]
    SelectionFailed(String),
}

impl Serialize for PreflightFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A job cleared for transfer, with the files it will copy.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub job: &'a JobConfig,
    pub selection: FileSelection,
}

/// Outcome of preflight for the jobs that were due.
#[derive(Debug, Default)]
pub struct PreflightReport<'a> {
    /// Jobs that passed, in configuration order
    pub candidates: Vec<Candidate<'a>>,
    /// Jobs that failed, with their reason
    pub rejected: Vec<(&'a JobConfig, PreflightFailure)>,
}

pub struct PreflightChecker<'a> {
    tool: &'a dyn TransferTool,
    ctx: &'a RunContext,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(tool: &'a dyn TransferTool, ctx: &'a RunContext) -> Self {
        Self { tool, ctx }
    }

    /// Run every check over `jobs`.
    ///
    /// Returns `Err` only for run-fatal conditions; everything else is
    /// reported per job in the [`PreflightReport`].
    pub async fn run(
        &self,
        jobs: &[&'a JobConfig],
    ) -> Result<PreflightReport<'a>, PreflightFailure> {
        let touches_destination = self.ctx.mode.touches_destination();

        if touches_destination {
            self.tool
                .verify()
                .await
                .map_err(|e| PreflightFailure::ToolUnavailable(e.to_string()))?;
            info!(tool = self.tool.name(), "Transfer tool available");
        }

        let mut report = PreflightReport::default();
        let mut remaining = Vec::with_capacity(jobs.len());

        for &job in jobs {
            match check_source(&job.source_dir) {
                Ok(()) => remaining.push(job),
                Err(detail) => {
                    warn!(job = %job.name, source = %job.source_dir.display(), %detail, "Source not accessible");
                    report.rejected.push((
                        job,
                        PreflightFailure::SourceNotAccessible {
                            path: job.source_dir.clone(),
                            detail,
                        },
                    ));
                }
            }
        }

        if self.ctx.mode.checks_free_space() {
            let mut endpoints: HashMap<String, Option<PreflightFailure>> = HashMap::new();
            let mut with_space = Vec::with_capacity(remaining.len());

            for job in remaining {
                let endpoint = self.ctx.endpoint_for(job);
                if !endpoints.contains_key(&endpoint) {
                    let verdict = self.check_endpoint(&endpoint).await;
                    endpoints.insert(endpoint.clone(), verdict);
                }

                match &endpoints[&endpoint] {
                    None => with_space.push(job),
                    Some(failure) => report.rejected.push((job, failure.clone())),
                }
            }
            remaining = with_space;
        }

        for job in remaining {
            match self.select(job).await {
                Ok(selection) => report.candidates.push(Candidate { job, selection }),
                Err(failure) => {
                    warn!(job = %job.name, reason = %failure, "Preflight rejected job");
                    report.rejected.push((job, failure));
                }
            }
        }

        info!(
            passed = report.candidates.len(),
            rejected = report.rejected.len(),
            "Pre-flight checks complete"
        );
        Ok(report)
    }

    async fn check_endpoint(&self, endpoint: &str) -> Option<PreflightFailure> {
        let required = self.ctx.min_free_space;
        match self.tool.free_space(endpoint).await {
            Ok(available) if available >= required => {
                debug!(%endpoint, available, required, "Endpoint has enough free space");
                None
            }
            Ok(available) => {
                warn!(%endpoint, available, required, "Endpoint has insufficient free space");
                Some(PreflightFailure::InsufficientSpace {
                    endpoint: endpoint.to_string(),
                    available: ByteSize(available),
                    required: ByteSize(required),
                })
            }
            Err(e) => {
                warn!(%endpoint, error = %e, "Could not query endpoint");
                Some(PreflightFailure::EndpointUnreachable {
                    endpoint: endpoint.to_string(),
                    detail: e.to_string(),
                })
            }
        }
    }

    async fn select(&self, job: &JobConfig) -> Result<FileSelection, PreflightFailure> {
        let options = WalkOptions {
            follow_links: true,
            max_age_days: job.max_age_days,
            exclude_patterns: job.exclude.clone(),
        };

        let selector = FileSelector::new(&job.source_dir, options, self.ctx.run_timestamp);

        // The walk is blocking I/O; keep it off the runtime thread so signals
        // are still seen during long scans.
        let selection = tokio::task::spawn_blocking(move || selector.select())
            .await
            .map_err(|e| PreflightFailure::SelectionFailed(e.to_string()))?
            .map_err(|e| PreflightFailure::SelectionFailed(e.to_string()))?;

        let limit = job.max_size.bytes();
        if selection.total_bytes > limit {
            return Err(PreflightFailure::SizeBudgetExceeded {
                computed: ByteSize(selection.total_bytes),
                limit: ByteSize(limit),
            });
        }

        info!(
            job = %job.name,
            files = selection.len(),
            bytes = selection.total_bytes,
            "Selected {} within budget of {}",
            format_size(selection.total_bytes),
            format_size(limit)
        );
        Ok(selection)
    }
}

/// The source must be a directory the process can list and enter.
fn check_source(path: &Path) -> Result<(), String> {
    let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
    if !metadata.is_dir() {
        return Err("not a directory".to_string());
    }

    access(path, AccessFlags::R_OK | AccessFlags::X_OK).map_err(|e| e.desc().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::context::RunMode;
    use crate::testing::ScriptedTool;
    use chrono::Local;
    use std::fs;
    use tempfile::TempDir;

    fn config(jobs: &[(&str, &Path, &str, &str)], min_free: &str) -> AppConfig {
        let mut toml = format!("[checks]\nmin_free_space = \"{}\"\n", min_free);
        for (name, source, dest, max_size) in jobs {
            toml.push_str(&format!(
                "[[jobs]]\nname = \"{}\"\nsource_dir = \"{}\"\ndestination_path = \"{}\"\nmax_size = \"{}\"\n",
                name,
                source.display(),
                dest,
                max_size
            ));
        }
        AppConfig::from_toml_str(&toml).unwrap()
    }

    async fn run_preflight(
        ctx: &RunContext,
        tool: &ScriptedTool,
    ) -> Result<Vec<(String, Option<PreflightFailure>)>, PreflightFailure> {
        let jobs: Vec<&JobConfig> = ctx.jobs.iter().collect();
        let report = PreflightChecker::new(tool, ctx).run(&jobs).await?;
        let mut outcome: Vec<(String, Option<PreflightFailure>)> = report
            .candidates
            .iter()
            .map(|c| (c.job.name.clone(), None))
            .chain(report.rejected.into_iter().map(|(j, f)| (j.name.clone(), Some(f))))
            .collect();
        outcome.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(outcome)
    }

    #[tokio::test]
    async fn test_missing_source_only_affects_that_job() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("f"), b"data").unwrap();
        let missing = source.path().join("does-not-exist");

        let config = config(
            &[("a", source.path(), "r:a", "1MB"), ("b", &missing, "r:b", "1MB")],
            "1KB",
        );
        let ctx = RunContext::new(RunMode::Remote, &config, Local::now());
        let tool = ScriptedTool::new().with_free_space("r:", 1 << 30);

        let outcome = run_preflight(&ctx, &tool).await.unwrap();
        assert_eq!(outcome[0], ("a".to_string(), None));
        assert!(matches!(
            outcome[1].1,
            Some(PreflightFailure::SourceNotAccessible { .. })
        ));
    }

    #[tokio::test]
    async fn test_size_budget_only_affects_that_job() {
        let big = TempDir::new().unwrap();
        let small = TempDir::new().unwrap();
        fs::write(big.path().join("f"), vec![0u8; 4096]).unwrap();
        fs::write(small.path().join("f"), vec![0u8; 512]).unwrap();

        let config = config(
            &[("big", big.path(), "r:big", "1KB"), ("small", small.path(), "r:small", "1KB")],
            "1KB",
        );
        let ctx = RunContext::new(RunMode::Remote, &config, Local::now());
        let tool = ScriptedTool::new().with_free_space("r:", 1 << 30);

        let outcome = run_preflight(&ctx, &tool).await.unwrap();
        assert_eq!(
            outcome[0].1,
            Some(PreflightFailure::SizeBudgetExceeded {
                computed: ByteSize(4096),
                limit: ByteSize(1024)
            })
        );
        assert_eq!(outcome[1], ("small".to_string(), None));
        assert_eq!(
            outcome[0].1.as_ref().unwrap().to_string(),
            "size budget exceeded: computed 4.0 KB > limit 1.0 KB"
        );
    }

    #[tokio::test]
    async fn test_endpoint_queried_once_and_shared() {
        let source = TempDir::new().unwrap();
        let config = config(
            &[
                ("a", source.path(), "shared:a", "1MB"),
                ("b", source.path(), "shared:b", "1MB"),
                ("c", source.path(), "other:c", "1MB"),
            ],
            "10GB",
        );
        let ctx = RunContext::new(RunMode::Remote, &config, Local::now());
        let tool = ScriptedTool::new()
            .with_free_space("shared:", 1 << 20)
            .with_free_space("other:", 1 << 40);

        let outcome = run_preflight(&ctx, &tool).await.unwrap();
        assert_eq!(outcome[0].1, outcome[1].1);
        assert!(matches!(
            outcome[0].1,
            Some(PreflightFailure::InsufficientSpace { .. })
        ));
        assert_eq!(outcome[2], ("c".to_string(), None));
        assert_eq!(tool.calls_to("free_space shared:"), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let source = TempDir::new().unwrap();
        let config = config(&[("a", source.path(), "ghost:a", "1MB")], "1KB");
        let ctx = RunContext::new(RunMode::Remote, &config, Local::now());
        let tool = ScriptedTool::new();

        let outcome = run_preflight(&ctx, &tool).await.unwrap();
        assert!(matches!(
            outcome[0].1,
            Some(PreflightFailure::EndpointUnreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_unusable_tool_is_fatal() {
        let source = TempDir::new().unwrap();
        let config = config(&[("a", source.path(), "r:a", "1MB")], "1KB");
        let ctx = RunContext::new(RunMode::Remote, &config, Local::now());
        let tool = ScriptedTool::new().unavailable();

        let result = run_preflight(&ctx, &tool).await;
        assert!(matches!(result, Err(PreflightFailure::ToolUnavailable(_))));
    }

    #[tokio::test]
    async fn test_analysis_skips_destination_checks() {
        let source = TempDir::new().unwrap();
        let config = config(&[("a", source.path(), "ghost:a", "1MB")], "1KB");
        let ctx = RunContext::new(RunMode::Analysis, &config, Local::now());
        let tool = ScriptedTool::new().unavailable();

        let outcome = run_preflight(&ctx, &tool).await.unwrap();
        assert_eq!(outcome[0], ("a".to_string(), None));
        assert_eq!(tool.calls_to("free_space ghost:"), 0);
    }

    #[tokio::test]
    async fn test_local_override_skips_free_space() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(source.path().join("f"), b"data").unwrap();
        let config = config(&[("a", source.path(), "r:a", "1MB")], "200GB");
        let ctx = RunContext::new(
            RunMode::LocalPath(target.path().to_path_buf()),
            &config,
            Local::now(),
        );
        // No free space is scripted, so any query would reject the job.
        let tool = ScriptedTool::new();

        let outcome = run_preflight(&ctx, &tool).await.unwrap();
        assert_eq!(outcome[0], ("a".to_string(), None));
        assert_eq!(tool.calls(), ["verify"]);
    }

    #[tokio::test]
    async fn test_selection_counts_files_under_budget() {
        let source = TempDir::new().unwrap();
        fs::create_dir(source.path().join("nested")).unwrap();
        fs::write(source.path().join("nested/f"), vec![0u8; 300]).unwrap();
        fs::write(source.path().join("g"), vec![0u8; 200]).unwrap();
        let config = config(&[("a", source.path(), "r:a", "1KB")], "1KB");
        let ctx = RunContext::new(RunMode::Remote, &config, Local::now());
        let tool = ScriptedTool::new().with_free_space("r:", 1 << 30);

        let jobs: Vec<&JobConfig> = ctx.jobs.iter().collect();
        let report = PreflightChecker::new(&tool, &ctx).run(&jobs).await.unwrap();
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].selection.len(), 2);
        assert_eq!(report.candidates[0].selection.total_bytes, 500);
    }

    #[test]
    fn test_check_source_rejects_files() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert_eq!(check_source(&file), Err("not a directory".to_string()));
        assert!(check_source(temp_dir.path()).is_ok());
    }
}
