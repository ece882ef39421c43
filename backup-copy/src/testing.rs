//! In-memory collaborators for orchestrator tests.

use crate::notify::Notifier;
use crate::summary::RunSummary;
use crate::transfer::{CopyRequest, TransferFailure, TransferTool};
use crate::utils::errors::{CopyError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Simulates a remote: directories live in memory, copies succeed unless
/// the job is scripted to fail.
#[derive(Default)]
pub struct ScriptedTool {
    unavailable: bool,
    free_space: HashMap<String, u64>,
    failing_jobs: HashSet<String>,
    hanging_jobs: HashSet<String>,
    failing_removals: HashSet<String>,
    dirs: Mutex<BTreeMap<String, BTreeSet<String>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn with_free_space(mut self, endpoint: &str, bytes: u64) -> Self {
        self.free_space.insert(endpoint.to_string(), bytes);
        self
    }

    pub fn failing_copy(mut self, job_name: &str) -> Self {
        self.failing_jobs.insert(job_name.to_string());
        self
    }

    /// Copies for this job never complete on their own
    pub fn hanging_copy(mut self, job_name: &str) -> Self {
        self.hanging_jobs.insert(job_name.to_string());
        self
    }

    pub fn failing_removal(mut self, path: &str) -> Self {
        self.failing_removals.insert(path.to_string());
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        let (parent, name) = split_parent(path);
        self.dirs
            .lock()
            .unwrap()
            .entry(parent)
            .or_default()
            .insert(name);
        self
    }

    pub fn dirs_under(&self, parent: &str) -> Vec<String> {
        self.dirs
            .lock()
            .unwrap()
            .get(parent)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn split_parent(path: &str) -> (String, String) {
    if let Some((parent, name)) = path.rsplit_once('/') {
        (parent.to_string(), name.to_string())
    } else if let Some(idx) = path.find(':') {
        (path[..=idx].to_string(), path[idx + 1..].to_string())
    } else {
        (String::new(), path.to_string())
    }
}

#[async_trait]
impl TransferTool for ScriptedTool {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn verify(&self) -> Result<()> {
        self.record("verify".to_string());
        if self.unavailable {
            Err(CopyError::Transfer("scripted tool is unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    async fn free_space(&self, endpoint: &str) -> Result<u64> {
        self.record(format!("free_space {}", endpoint));
        self.free_space
            .get(endpoint)
            .copied()
            .ok_or_else(|| CopyError::Transfer(format!("unknown endpoint {}", endpoint)))
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        self.record(format!("make_dir {}", path));
        let (parent, name) = split_parent(path);
        self.dirs.lock().unwrap().entry(parent).or_default().insert(name);
        Ok(())
    }

    async fn copy(&self, request: &CopyRequest<'_>) -> std::result::Result<u64, TransferFailure> {
        self.record(format!("copy {}", request.job_name));
        if self.hanging_jobs.contains(request.job_name) {
            std::future::pending::<()>().await;
        }
        if self.failing_jobs.contains(request.job_name) {
            Err(TransferFailure {
                message: format!("scripted failure for {}", request.job_name),
                bytes_transferred: 7,
            })
        } else {
            Ok(request.selection.total_bytes)
        }
    }

    async fn list_dirs(&self, parent: &str) -> Result<Vec<String>> {
        self.record(format!("list_dirs {}", parent));
        Ok(self.dirs_under(parent))
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        self.record(format!("remove_dir {}", path));
        if self.failing_removals.contains(path) {
            return Err(CopyError::Transfer(format!("cannot purge {}", path)));
        }
        let (parent, name) = split_parent(path);
        if let Some(names) = self.dirs.lock().unwrap().get_mut(&parent) {
            names.remove(&name);
        }
        Ok(())
    }
}

/// Keeps every summary it is handed.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub delivered: Arc<Mutex<Vec<RunSummary>>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        self.delivered.lock().unwrap().push(summary.clone());
        Ok(())
    }
}
