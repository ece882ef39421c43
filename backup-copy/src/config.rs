//! Configuration management for backup-copy.
//!
//! Loads configuration from a TOML file with `BACKUP_COPY__*` environment
//! variable overrides (e.g. `BACKUP_COPY__LOG__LEVEL=debug`).

use crate::schedule::Schedule;
use crate::utils::errors::{CopyError, Result};
use crate::utils::size::ByteSize;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "BACKUP_COPY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub checks: ChecksConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    /// Backup jobs, processed in this order
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file, appended to in addition to stdout
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    /// Minimum free space every destination endpoint must report
    #[serde(default = "default_min_free_space")]
    pub min_free_space: ByteSize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Endpoint receiving the run summary as JSON
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Subject line used for the summary
    #[serde(default = "default_subject")]
    pub subject: String,
}

/// One configured source-to-destination backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique short name, also the prefix of every dated destination directory
    pub name: String,

    /// Absolute path of the tree to copy
    pub source_dir: PathBuf,

    /// Destination base, `remote:sub/path` or a plain path
    pub destination_path: String,

    /// Size budget for the selected file set
    #[serde(default = "default_max_size")]
    pub max_size: ByteSize,

    /// Only files modified within this many days are copied (0 = all)
    #[serde(default)]
    pub max_age_days: u32,

    #[serde(default)]
    pub schedule: Schedule,

    /// Number of dated destination directories kept
    #[serde(default = "default_retention")]
    pub retention_count: usize,

    /// Whether the job takes part in remote runs (local runs always include it)
    #[serde(default = "default_transfer_enabled")]
    pub transfer_enabled: bool,

    /// File-name substrings excluded from selection
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Wall-clock limit for the transfer, in minutes
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("log/backup_copy.log"))
}

fn default_min_free_space() -> ByteSize {
    ByteSize::gib(200)
}

fn default_subject() -> String {
    "Backup Copy Summary".to_string()
}

fn default_max_size() -> ByteSize {
    ByteSize::gib(1)
}

fn default_retention() -> usize {
    crate::retention::DEFAULT_RETENTION
}

fn default_transfer_enabled() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            min_free_space: default_min_free_space(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, applying environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CopyError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the orchestrator cannot run safely
    pub fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(CopyError::Config(format!(
                "log.level must be one of {}",
                LEVELS.join(", ")
            )));
        }

        if self.jobs.is_empty() {
            return Err(CopyError::Config("no backup jobs configured".to_string()));
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !names.insert(job.name.as_str()) {
                return Err(CopyError::Config(format!(
                    "backup job names must be unique: '{}' appears more than once",
                    job.name
                )));
            }
        }

        Ok(())
    }
}

impl JobConfig {
    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| CopyError::Config(format!("job '{}': {}", self.name, reason));

        if self.name.trim().is_empty() {
            return Err(CopyError::Config("job name must not be empty".to_string()));
        }
        if self.name.contains(['/', '\\', ':']) {
            return Err(invalid("name must not contain path separators or ':'"));
        }
        if !self.source_dir.is_absolute() {
            return Err(invalid("source_dir must be an absolute path"));
        }
        if self.destination_path.trim().is_empty() {
            return Err(invalid("destination_path must not be empty"));
        }
        if self.retention_count < 1 {
            return Err(invalid("retention_count must be at least 1"));
        }
        if self.timeout_minutes == Some(0) {
            return Err(invalid("timeout_minutes must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
        [[jobs]]
        name = "photos"
        source_dir = "/srv/photos"
        destination_path = "b2:archive/photos"
    "#;

    #[test]
    fn test_defaults_are_applied() {
        let config = AppConfig::from_toml_str(MINIMAL).unwrap();
        let job = &config.jobs[0];

        assert_eq!(job.max_size, ByteSize::gib(1));
        assert_eq!(job.max_age_days, 0);
        assert_eq!(job.retention_count, 2);
        assert!(job.transfer_enabled);
        assert_eq!(job.schedule, Schedule::default());
        assert_eq!(config.checks.min_free_space, ByteSize::gib(200));
        assert_eq!(config.log.level, "info");
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_full_job_parses() {
        let config = AppConfig::from_toml_str(
            r#"
            [checks]
            min_free_space = "50GB"

            [[jobs]]
            name = "db"
            source_dir = "/var/backups/db"
            destination_path = "/mnt/usb/db"
            max_size = "200MB"
            max_age_days = 1
            schedule = "0 5 1,15 * *"
            retention_count = 3
            transfer_enabled = false
            exclude = [".tmp"]
            timeout_minutes = 30
            "#,
        )
        .unwrap();

        let job = &config.jobs[0];
        assert_eq!(job.max_size.bytes(), 200 * 1024 * 1024);
        assert_eq!(job.schedule.expression(), "0 5 1,15 * *");
        assert_eq!(job.retention_count, 3);
        assert!(!job.transfer_enabled);
        assert_eq!(job.timeout_minutes, Some(30));
        assert_eq!(config.checks.min_free_space, ByteSize::gib(50));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let content = format!("{}\n{}", MINIMAL, MINIMAL);
        let err = AppConfig::from_toml_str(&content).unwrap_err();
        assert!(err.to_string().contains("unique"));
    }

    #[test]
    fn test_relative_source_rejected() {
        let err = AppConfig::from_toml_str(
            r#"
            [[jobs]]
            name = "rel"
            source_dir = "data/rel"
            destination_path = "remote:rel"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let err = AppConfig::from_toml_str(&format!("{}retention_count = 0\n", MINIMAL)).unwrap_err();
        assert!(err.to_string().contains("retention_count"));
    }

    #[test]
    fn test_bad_schedule_rejected() {
        let result = AppConfig::from_toml_str(&format!("{}schedule = \"* * 40 * *\"\n", MINIMAL));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_job_list_rejected() {
        assert!(AppConfig::from_toml_str("jobs = []").is_err());
    }

    #[test]
    fn test_from_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, MINIMAL)?;

        let config = AppConfig::from_file(&path)?;
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].name, "photos");
        Ok(())
    }

    #[test]
    fn test_environment_overrides_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, format!("[log]\nlevel = \"warn\"\n{}", MINIMAL))?;

        std::env::set_var("BACKUP_COPY__LOG__LEVEL", "debug");
        let loaded = AppConfig::from_file(&path);
        std::env::remove_var("BACKUP_COPY__LOG__LEVEL");

        let config = loaded?;
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.jobs[0].name, "photos");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = AppConfig::from_file(Path::new("/nonexistent/backup-copy.toml")).unwrap_err();
        assert!(matches!(err, CopyError::Config(_)));
    }
}
