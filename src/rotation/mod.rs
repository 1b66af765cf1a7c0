//! Outbound identity rotation
//!
//! The crawler reaches the remote source through a proxy whose public
//! address can be changed on demand. `IdentityRotator` is the contract the
//! recovery controller relies on; `ProxyRotator` implements it by running a
//! restart command and probing an address-echo endpoint through the proxy.

mod proxy;

pub use proxy::{parse_origin, ProxyRotator, CHECK_INTERVAL};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failures of the identity rotation layer
#[derive(Debug, Error)]
pub enum RotatorError {
    /// The proxy did not answer address checks before the health timeout
    #[error("Proxy not ready: {0}")]
    NotReady(String),

    /// The restart command could not be run or exited unsuccessfully
    #[error("Restart command failed: {0}")]
    CommandFailed(String),

    /// The address check failed
    #[error("Address check failed: {0}")]
    AddressCheck(String),

    #[error("Rotation cancelled")]
    Cancelled,
}

/// Result type for rotation operations
pub type RotatorResult<T> = Result<T, RotatorError>;

/// Result of one rotation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    /// True if the outbound address differs from the one before the rotation
    pub changed: bool,
    /// The address observed after the rotation
    pub address: String,
}

/// Changes the process's outbound network address on demand
#[async_trait]
pub trait IdentityRotator: Send {
    /// Confirms the outbound path works and records the current address
    async fn verify(&mut self) -> RotatorResult<String>;

    /// Last address observed by `verify` or `rotate`
    fn current_address(&self) -> Option<&str>;

    /// Requests a new outbound address and waits until the path is usable
    async fn rotate(&mut self, cancel: &CancellationToken) -> RotatorResult<RotationOutcome>;
}
