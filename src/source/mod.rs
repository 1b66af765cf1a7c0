//! Remote source module
//!
//! This module defines the contract the crawler needs from the remote
//! listing service and ships one implementation of it:
//! - `RemoteSource`: paginated entity listings, post listings and comment trees
//! - `SourceError`: the failure taxonomy the recovery controller dispatches on
//! - `RedditClient`: a reqwest-backed client for the public JSON endpoints

mod client;
mod listing;
mod traits;
mod types;

pub use client::{build_http_client, RedditClient};
pub use listing::{
    extract_commenters, extract_sidebar, parse_about, parse_entity, parse_entity_listing,
    parse_post_listing, SKIPPED_AUTHORS,
};
pub use traits::RemoteSource;
pub use types::{EntityListing, ListingPage, Post, PostCategory};

use thiserror::Error;

/// Default wait suggested for a rate limit without a `Retry-After` header
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Failures surfaced by the remote source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// HTTP 429
    #[error("Rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// HTTP 403 or 503: the current outbound identity is blocked
    #[error("Request blocked: {0}")]
    Blocked(String),

    /// Timeouts, connection resets, other 5xx
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Malformed responses and 4xx other than 403/429
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl SourceError {
    /// Maps an HTTP status and optional `Retry-After` hint to the taxonomy
    pub fn from_status(status: u16, retry_after: Option<u64>) -> Self {
        match status {
            429 => Self::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            403 => Self::Blocked(format!("HTTP {}", status)),
            503 => Self::Blocked("service unavailable (HTTP 503)".to_string()),
            408 | 500..=599 => Self::Transient(format!("HTTP {}", status)),
            _ => Self::Permanent(format!("HTTP {}", status)),
        }
    }

    /// Classifies a transport-level reqwest error
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient("request timeout".to_string())
        } else if err.is_connect() {
            Self::Transient(format!("connection failed: {}", err))
        } else if err.is_decode() || err.is_builder() {
            Self::Permanent(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

/// Result type for remote source operations
pub type SourceResult<T> = Result<T, SourceError>;
