//! Proxy-backed identity rotator

use crate::config::RotatorConfig;
use crate::rotation::{IdentityRotator, RotationOutcome, RotatorError, RotatorResult};
use async_trait::async_trait;
use reqwest::{Client, Proxy};
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Delay between readiness checks after a restart
pub const CHECK_INTERVAL: Duration = Duration::from_secs(3);

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Extracts the first address from an address-echo response body
///
/// The body looks like `{"origin": "1.2.3.4"}`; behind some proxies the
/// field holds a comma-separated chain, in which case the first hop is the
/// public address.
pub fn parse_origin(body: &str) -> Option<String> {
    let doc: Value = serde_json::from_str(body).ok()?;
    let origin = doc.get("origin")?.as_str()?;
    let first = origin.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

/// Rotates the outbound address of an HTTP proxy
pub struct ProxyRotator {
    config: RotatorConfig,
    client: Client,
    current: Option<String>,
}

impl ProxyRotator {
    pub fn new(config: RotatorConfig) -> RotatorResult<Self> {
        let proxy = Proxy::all(&config.proxy_url)
            .map_err(|e| RotatorError::AddressCheck(format!("invalid proxy url: {}", e)))?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(CHECK_TIMEOUT)
            .build()
            .map_err(|e| RotatorError::AddressCheck(e.to_string()))?;

        Ok(Self {
            config,
            client,
            current: None,
        })
    }

    /// Asks the address-echo endpoint for our public address
    async fn check_address(&self) -> RotatorResult<String> {
        let response = self
            .client
            .get(&self.config.ip_check_url)
            .send()
            .await
            .map_err(|e| RotatorError::AddressCheck(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RotatorError::AddressCheck(format!("HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RotatorError::AddressCheck(e.to_string()))?;
        parse_origin(&body).ok_or_else(|| RotatorError::AddressCheck("no origin in response".to_string()))
    }

    async fn run_restart_command(&self, cancel: &CancellationToken) -> RotatorResult<()> {
        let Some((program, args)) = self.config.restart_command.split_first() else {
            return Ok(());
        };

        tracing::debug!("Running restart command: {:?}", self.config.restart_command);
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(RotatorError::Cancelled),
            output = command.output() => output,
        }
        .map_err(|e| RotatorError::CommandFailed(format!("{}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RotatorError::CommandFailed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Polls the address check until it answers or the health timeout elapses
    async fn wait_until_ready(&self, cancel: &CancellationToken) -> RotatorResult<String> {
        let deadline = Instant::now() + Duration::from_secs(self.config.health_timeout_secs);

        loop {
            match self.check_address().await {
                Ok(address) => return Ok(address),
                Err(e) => {
                    if Instant::now() + CHECK_INTERVAL > deadline {
                        return Err(RotatorError::NotReady(format!(
                            "no answer within {}s ({})",
                            self.config.health_timeout_secs, e
                        )));
                    }
                    tracing::debug!("Proxy not ready yet: {}", e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RotatorError::Cancelled),
                _ = tokio::time::sleep(CHECK_INTERVAL) => {}
            }
        }
    }
}

#[async_trait]
impl IdentityRotator for ProxyRotator {
    async fn verify(&mut self) -> RotatorResult<String> {
        let address = self.check_address().await?;
        tracing::info!("Outbound address via proxy: {}", address);
        self.current = Some(address.clone());
        Ok(address)
    }

    fn current_address(&self) -> Option<&str> {
        self.current.as_deref()
    }

    async fn rotate(&mut self, cancel: &CancellationToken) -> RotatorResult<RotationOutcome> {
        let previous = self.current.clone();
        tracing::info!(
            "Rotating outbound identity (current {})",
            previous.as_deref().unwrap_or("unknown")
        );

        self.run_restart_command(cancel).await?;

        if self.config.cooldown_secs > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RotatorError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(self.config.cooldown_secs)) => {}
            }
        }

        let address = self.wait_until_ready(cancel).await?;
        let changed = previous.as_deref() != Some(address.as_str());
        if changed {
            tracing::info!("Outbound address changed to {}", address);
        } else {
            tracing::warn!("Outbound address unchanged after rotation ({})", address);
        }

        self.current = Some(address.clone());
        Ok(RotationOutcome { changed, address })
    }
}
