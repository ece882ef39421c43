//! rclone-backed transfers.
//!
//! Every operation shells out to the `rclone` binary. The copy receives the
//! exact selected file list on stdin (`--files-from-raw -`) so what lands at
//! the destination is what preflight sized. Selection follows symlinks, so the
//! copy runs with `--copy-links`; without it rclone skips linked files.

use super::{CopyRequest, TransferFailure, TransferTool};
use crate::utils::errors::{CopyError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Lines of stderr kept when a command fails without explicit ERROR lines
const ERROR_TAIL_LINES: usize = 5;

/// Subset of `rclone about --json`
#[derive(Debug, Deserialize)]
struct AboutInfo {
    #[serde(default)]
    free: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RcloneTool {
    binary: PathBuf,
}

impl RcloneTool {
    pub fn new() -> Self {
        Self::with_binary("rclone")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.kill_on_drop(true).stdin(Stdio::null());
        command
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(binary = %self.binary.display(), ?args, "Running rclone");
        let output = self.command().args(args).output().await.map_err(|e| {
            CopyError::Transfer(format!("failed to run {}: {}", self.binary.display(), e))
        })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(CopyError::Transfer(format!(
                "rclone {} failed ({}): {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                failure_text(&String::from_utf8_lossy(&output.stderr))
            )))
        }
    }
}

impl Default for RcloneTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferTool for RcloneTool {
    fn name(&self) -> &'static str {
        "rclone"
    }

    async fn verify(&self) -> Result<()> {
        let output = self.run(&["version"]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(version) = stdout.lines().next() {
            info!("Using {}", version.trim());
        }
        Ok(())
    }

    async fn free_space(&self, endpoint: &str) -> Result<u64> {
        let output = self.run(&["about", endpoint, "--json"]).await?;
        let about: AboutInfo = serde_json::from_slice(&output.stdout)?;
        about.free.ok_or_else(|| {
            CopyError::Transfer(format!("'{}' does not report free space", endpoint))
        })
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        self.run(&["mkdir", path]).await.map(|_| ())
    }

    async fn copy(&self, request: &CopyRequest<'_>) -> std::result::Result<u64, TransferFailure> {
        let source = request.source_root.to_string_lossy();
        let args = [
            "copy",
            source.as_ref(),
            request.destination,
            "--files-from-raw",
            "-",
            "--copy-links",
            "-v",
            "--stats",
            "1m",
        ];
        info!(job = %request.job_name, files = request.selection.len(), "Running rclone {}", args.join(" "));

        let mut child = self
            .command()
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransferFailure::new(format!("failed to start rclone: {}", e)))?;

        // rclone may exit before reading the list (bad remote, auth); keep
        // the write error and let the exit status and stderr explain it.
        let mut list_error = None;
        if let Some(mut stdin) = child.stdin.take() {
            let mut list = Vec::new();
            for path in request.selection.relative_paths() {
                list.extend_from_slice(path.as_os_str().as_encoded_bytes());
                list.push(b'\n');
            }
            list_error = stdin.write_all(&list).await.err();
            // Dropping stdin closes the pipe so rclone sees end of list.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransferFailure::new(format!("rclone did not complete: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let bytes_transferred = parse_transferred_bytes(&stderr);

        match (output.status.success(), list_error) {
            (true, None) => Ok(bytes_transferred),
            (true, Some(e)) => Err(TransferFailure {
                message: format!("failed to send file list to rclone: {}", e),
                bytes_transferred,
            }),
            (false, _) => Err(TransferFailure {
                message: format!("rclone copy failed ({}): {}", output.status, failure_text(&stderr)),
                bytes_transferred,
            }),
        }
    }

    async fn list_dirs(&self, parent: &str) -> Result<Vec<String>> {
        let output = self.run(&["lsd", parent]).await?;
        Ok(parse_lsd(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        self.run(&["purge", path]).await.map(|_| ())
    }
}

/// Extract the byte count from the last `Transferred:` stats line that
/// carries a size (the other `Transferred:` line counts files).
pub fn parse_transferred_bytes(stderr: &str) -> u64 {
    stderr
        .lines()
        .filter_map(|line| line.split_once("Transferred:").map(|(_, rest)| rest))
        .filter_map(|rest| parse_size_with_unit(rest.split('/').next()?.trim()))
        .last()
        .unwrap_or(0)
}

fn parse_size_with_unit(text: &str) -> Option<u64> {
    let split = text.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier: u64 = match unit.trim().chars().next()? {
        'B' => 1,
        'k' | 'K' => 1 << 10,
        'M' => 1 << 20,
        'G' => 1 << 30,
        'T' => 1 << 40,
        'P' => 1 << 50,
        _ => return None,
    };

    Some((value * multiplier as f64).round() as u64)
}

/// Parse `rclone lsd` output into directory names.
///
/// Lines look like `          -1 2024-06-01 05:00:00        -1 photos_2024-06-01_05-00`;
/// the name is everything after the fourth column and may contain spaces.
pub fn parse_lsd(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut rest = line.trim_start();
            for _ in 0..4 {
                let end = rest.find(char::is_whitespace)?;
                rest = rest[end..].trim_start();
            }
            (!rest.is_empty()).then(|| rest.trim_end().to_string())
        })
        .collect()
}

/// Condense rclone stderr into a one-line error message.
fn failure_text(stderr: &str) -> String {
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("ERROR"))
        .collect();

    let picked: Vec<&str> = if errors.is_empty() {
        let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        lines[lines.len().saturating_sub(ERROR_TAIL_LINES)..].to_vec()
    } else {
        errors
    };

    if picked.is_empty() {
        "no error output".to_string()
    } else {
        picked.join("; ")
    }
}
