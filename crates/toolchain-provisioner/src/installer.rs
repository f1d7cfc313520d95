//! Toolchain installation through rustup.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ProvisioningError, Result};

/// Installs toolchains and target standard libraries.
#[async_trait]
pub trait ToolchainInstaller: Send + Sync {
    /// Install `toolchain` (a channel like `stable` or a version like `1.60`).
    async fn install(&self, toolchain: &str) -> Result<()>;

    /// Add the standard library for `target` to an installed toolchain.
    async fn add_target(&self, toolchain: &str, target: &str) -> Result<()>;
}

/// rustup-backed installer
#[derive(Debug, Clone)]
pub struct RustupInstaller {
    program: String,
}

impl Default for RustupInstaller {
    fn default() -> Self {
        RustupInstaller {
            program: "rustup".to_string(),
        }
    }
}

impl RustupInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different rustup binary.
    pub fn with_program(program: &str) -> Self {
        RustupInstaller {
            program: program.to_string(),
        }
    }

    async fn rustup(&self, toolchain: &str, args: &[&str]) -> Result<()> {
        debug!(program = %self.program, ?args, "Running rustup");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProvisioningError::ToolchainInstall {
                toolchain: toolchain.to_string(),
                reason: format!("failed to launch {}: {}", self.program, e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ProvisioningError::ToolchainInstall {
                toolchain: toolchain.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ToolchainInstaller for RustupInstaller {
    async fn install(&self, toolchain: &str) -> Result<()> {
        info!(toolchain, "Installing toolchain");
        self.rustup(
            toolchain,
            &["toolchain", "install", toolchain, "--profile", "minimal"],
        )
        .await
    }

    async fn add_target(&self, toolchain: &str, target: &str) -> Result<()> {
        info!(toolchain, target, "Adding target");
        self.rustup(
            toolchain,
            &["target", "add", target, "--toolchain", toolchain],
        )
        .await
    }
}
