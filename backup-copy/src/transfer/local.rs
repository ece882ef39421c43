//! Local filesystem transfers, used when a run targets a local path.

use super::{CopyRequest, TransferFailure, TransferTool};
use crate::utils::errors::{CopyError, Result};
use async_trait::async_trait;
use filetime::FileTime;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info};

const WRITE_PROBE: &str = ".backup-copy-write-test";

/// Copies selections into dated directories under a local root.
#[derive(Debug, Clone)]
pub struct LocalCopyTool {
    root: PathBuf,
}

impl LocalCopyTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TransferTool for LocalCopyTool {
    fn name(&self) -> &'static str {
        "local"
    }

    /// The destination root must exist (or be creatable) and be writable.
    async fn verify(&self) -> Result<()> {
        let not_writable = |e: io::Error| {
            CopyError::Transfer(format!(
                "local destination not accessible or writable: {}: {}",
                self.root.display(),
                e
            ))
        };

        fs::create_dir_all(&self.root).await.map_err(not_writable)?;
        let probe = self.root.join(WRITE_PROBE);
        fs::write(&probe, b"test").await.map_err(not_writable)?;
        fs::remove_file(&probe).await.map_err(not_writable)?;
        Ok(())
    }

    async fn free_space(&self, endpoint: &str) -> Result<u64> {
        let endpoint = endpoint.to_string();

        // Ancestor probing and statvfs block; run them on the blocking pool.
        tokio::task::spawn_blocking(move || -> Result<u64> {
            // The endpoint may not exist yet; measure the filesystem it will live on.
            let path = nearest_existing(Path::new(&endpoint)).ok_or_else(|| {
                CopyError::Transfer(format!("no existing ancestor for '{}'", endpoint))
            })?;

            let stat = nix::sys::statvfs::statvfs(&path)
                .map_err(|e| CopyError::Io(io::Error::from(e)))?;
            Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
        })
        .await
        .map_err(|e| CopyError::Transfer(format!("free space query did not complete: {}", e)))?
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn copy(&self, request: &CopyRequest<'_>) -> std::result::Result<u64, TransferFailure> {
        let destination = Path::new(request.destination);
        let mut bytes_transferred = 0u64;

        for file in &request.selection.files {
            let target = destination.join(&file.relative_path);
            let copied = copy_preserving_mtime(&file.path, &target, file.modified.into()).await;

            match copied {
                Ok(bytes) => {
                    debug!(job = %request.job_name, path = %file.relative_path.display(), bytes, "Copied file");
                    bytes_transferred += bytes;
                }
                Err(e) => {
                    return Err(TransferFailure {
                        message: format!("local copy failed for {}: {}", file.path.display(), e),
                        bytes_transferred,
                    });
                }
            }
        }

        info!(
            job = %request.job_name,
            files = request.selection.len(),
            bytes = bytes_transferred,
            "Copied files to {}",
            destination.display()
        );
        Ok(bytes_transferred)
    }

    async fn list_dirs(&self, parent: &str) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(parent).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(dirs)
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        fs::remove_dir_all(path).await?;
        Ok(())
    }
}

async fn copy_preserving_mtime(source: &Path, target: &Path, modified: SystemTime) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = fs::copy(source, target).await?;
    filetime::set_file_mtime(target, FileTime::from_system_time(modified))?;
    Ok(bytes)
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}
