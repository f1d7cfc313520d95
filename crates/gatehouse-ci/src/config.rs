//! `gatehouse.toml` configuration.

use gatehouse_core::{CheckKind, Platform};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use toolchain_provisioner::ProvisionerConfig;
use tracing::debug;

use crate::error::{Result, RunnerError};
use crate::stage::FormatScope;

/// Config file looked up at the workspace root.
pub const CONFIG_FILE: &str = "gatehouse.toml";

/// Orchestrator configuration. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatehouseConfig {
    /// Build platforms to fan out over; the host platform by default.
    pub platforms: Vec<Platform>,

    /// Check kinds to run.
    pub checks: Vec<CheckKind>,

    /// Maximum simultaneously running jobs; host parallelism when unset.
    pub concurrency: Option<usize>,

    /// Per-job time budget; 0 disables it.
    pub job_timeout_secs: u64,

    /// How long a cancelled tool gets to exit after being killed.
    pub cancel_grace_secs: u64,

    pub format: FormatConfig,

    pub msrv: MsrvConfig,

    pub provisioner: ProvisionerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatConfig {
    pub scope: FormatScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MsrvConfig {
    /// Check packages concurrently instead of one after another.
    pub parallel: bool,

    /// Cargo subcommand used for the minimum-version build.
    pub check_command: String,
}

impl Default for MsrvConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            check_command: "check".to_string(),
        }
    }
}

impl Default for GatehouseConfig {
    fn default() -> Self {
        Self {
            platforms: vec![Platform::host()],
            checks: CheckKind::ALL.to_vec(),
            concurrency: None,
            job_timeout_secs: 3600,
            cancel_grace_secs: 10,
            format: FormatConfig::default(),
            msrv: MsrvConfig::default(),
            provisioner: ProvisionerConfig::default(),
        }
    }
}

impl GatehouseConfig {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RunnerError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| RunnerError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Load `gatehouse.toml` from `root`, or defaults if there is none.
    pub fn discover(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if path.is_file() {
            debug!(path = %path.display(), "Loading configuration");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: &str| RunnerError::Config {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.concurrency == Some(0) {
            return Err(invalid("concurrency must be at least 1"));
        }
        if self.platforms.contains(&Platform::Lint) {
            return Err(invalid(
                "lint is the implicit platform of format-check and msrv-check; list build platforms only",
            ));
        }
        if self.msrv.check_command.trim().is_empty() {
            return Err(invalid("msrv.check_command must not be empty"));
        }
        Ok(())
    }
}
