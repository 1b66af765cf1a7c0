//! Delivery of chunk files to a remote host

use crate::config::DeliveryConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const MKDIR_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Uploads exported files
///
/// Failures never propagate: they are logged and show up as a lower
/// success count.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Uploads `paths`, returning how many were transferred
    async fn upload_files(&self, paths: &[PathBuf]) -> usize;

    fn is_enabled(&self) -> bool;

    /// Human readable target, for logs and summaries
    fn describe(&self) -> String;
}

/// Sink used when delivery is not configured
pub struct DisabledSink;

#[async_trait]
impl DeliverySink for DisabledSink {
    async fn upload_files(&self, _paths: &[PathBuf]) -> usize {
        0
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        "disabled".to_string()
    }
}

/// Uploads files with `scp`, creating the remote directory over `ssh` first
pub struct ScpSink {
    config: DeliveryConfig,
}

impl ScpSink {
    pub fn new(config: DeliveryConfig) -> Self {
        Self { config }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    /// Options shared by ssh and scp
    fn common_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(key) = &self.config.key_path {
            if Path::new(key).exists() {
                args.push("-i".to_string());
                args.push(key.clone());
            }
        }
        args.extend(
            ["-o", "StrictHostKeyChecking=no", "-o", "BatchMode=yes"]
                .iter()
                .map(|s| s.to_string()),
        );
        args
    }

    fn mkdir_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.config.port.to_string()];
        args.extend(self.common_args());
        args.push(self.destination());
        args.push(format!("mkdir -p {}", self.config.remote_dir));
        args
    }

    fn scp_args(&self, local: &Path) -> Vec<String> {
        let mut args = vec!["-P".to_string(), self.config.port.to_string()];
        args.extend(self.common_args());
        args.push(local.display().to_string());
        args.push(format!(
            "{}:{}/",
            self.destination(),
            self.config.remote_dir.trim_end_matches('/')
        ));
        args
    }

    /// Runs a command with a timeout; returns stderr on failure
    async fn run(program: &str, args: &[String], timeout: Duration) -> Result<(), String> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
            Ok(Err(e)) => Err(e.to_string()),
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        }
    }
}

#[async_trait]
impl DeliverySink for ScpSink {
    async fn upload_files(&self, paths: &[PathBuf]) -> usize {
        if paths.is_empty() {
            return 0;
        }

        if let Err(e) = Self::run("ssh", &self.mkdir_args(), MKDIR_TIMEOUT).await {
            tracing::warn!("Could not create remote directory {}: {}", self.config.remote_dir, e);
        }

        let mut uploaded = 0;
        for path in paths {
            if !path.exists() {
                tracing::error!("Upload skipped, file not found: {}", path.display());
                continue;
            }

            match Self::run("scp", &self.scp_args(path), UPLOAD_TIMEOUT).await {
                Ok(()) => {
                    tracing::info!("Uploaded {} to {}", path.display(), self.describe());
                    uploaded += 1;
                }
                Err(e) => tracing::error!("Failed to upload {}: {}", path.display(), e),
            }
        }
        uploaded
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "{}:{}{}",
            self.destination(),
            self.config.port,
            self.config.remote_dir
        )
    }
}

/// Picks the sink for an optional delivery section
pub fn build_sink(config: Option<&DeliveryConfig>) -> Box<dyn DeliverySink> {
    match config {
        Some(delivery) if delivery.is_complete() => {
            let sink = ScpSink::new(delivery.clone());
            tracing::info!("Delivery enabled: {}", sink.describe());
            Box::new(sink)
        }
        _ => {
            tracing::info!("Delivery disabled, chunks are kept locally only");
            Box::new(DisabledSink)
        }
    }
}
