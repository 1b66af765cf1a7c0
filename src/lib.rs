//! Gleaner: a resilient entity discovery and identity harvesting engine
//!
//! This crate discovers entities (subreddits) from a rate-limited remote source,
//! harvests the identities (commenters) associated with each one, and exports
//! them in fixed-size chunks. Progress is checkpointed so that a crash or a
//! termination signal loses no work, and blocking by the remote source is
//! answered by rotating the outbound network identity and retrying.

pub mod config;
pub mod crawler;
pub mod export;
pub mod output;
pub mod recovery;
pub mod rotation;
pub mod source;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Gleaner operations
#[derive(Debug, Error)]
pub enum GleanerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Remote source error: {0}")]
    Source(#[from] source::SourceError),

    #[error("Identity rotation error: {0}")]
    Rotation(#[from] rotation::RotatorError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] recovery::RecoveryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Gleaner operations
pub type Result<T> = std::result::Result<T, GleanerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{Entity, Phase, Visibility};
