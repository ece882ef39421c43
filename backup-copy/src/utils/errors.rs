//! Custom error types for backup-copy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid schedule '{expression}': {reason}")]
    Schedule { expression: String, reason: String },

    #[error("Invalid size '{0}'")]
    Size(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer tool error: {0}")]
    Transfer(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Notification error: {0}")]
    Notification(String),
}

pub type Result<T> = std::result::Result<T, CopyError>;
