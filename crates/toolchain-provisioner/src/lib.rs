//! Toolchain Provisioner: scoped build environments for Gatehouse jobs
//!
//! Each job gets a [`ScopedEnvironment`] holding:
//! - a private scratch directory used as the build's target dir
//! - the platform's build toolchain, installed through a shared cache
//! - the external code-generation compiler, fetched from a versioned
//!   distribution source when it is not already cached
//!
//! Teardown of the scratch area happens on every exit path: explicit
//! release, drop after cancellation, or failure part-way through
//! provisioning.

pub mod cache;
pub mod distribution;
pub mod environment;
pub mod error;
pub mod installer;

pub use cache::ToolchainCache;
pub use distribution::{CodegenSpec, DistributionSource, HttpDistribution};
pub use environment::ScopedEnvironment;
pub use error::{ProvisioningError, Result};
pub use installer::{RustupInstaller, ToolchainInstaller};

use gatehouse_core::{Platform, ProvisioningNeeds};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Provisioner configuration (`[provisioner]` in `gatehouse.toml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Root of the shared install cache
    pub cache_dir: PathBuf,
    /// Toolchain used by build-test and format-check
    pub toolchain: String,
    /// Platforms this machine can provision. Defaults to the host and
    /// `lint`; list other platforms only when their cross toolchains and
    /// linkers are available.
    pub platforms: Vec<Platform>,
    /// Pinned code-generation compiler, if the workspace needs one
    pub codegen: Option<CodegenSpec>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        ProvisionerConfig {
            cache_dir: std::env::temp_dir().join("gatehouse-cache"),
            toolchain: "stable".to_string(),
            platforms: vec![Platform::host(), Platform::Lint],
            codegen: None,
        }
    }
}

/// Hands out scoped environments backed by one shared cache.
pub struct Provisioner {
    config: ProvisionerConfig,
    cache: Arc<ToolchainCache>,
    installer: Arc<dyn ToolchainInstaller>,
    distribution: Arc<dyn DistributionSource>,
}

impl Provisioner {
    /// Provisioner using rustup and the HTTP distribution source.
    pub fn new(config: ProvisionerConfig) -> Result<Self> {
        Ok(Self::with_parts(
            config,
            Arc::new(RustupInstaller::new()),
            Arc::new(HttpDistribution::new()?),
        ))
    }

    pub fn with_parts(
        config: ProvisionerConfig,
        installer: Arc<dyn ToolchainInstaller>,
        distribution: Arc<dyn DistributionSource>,
    ) -> Self {
        let cache = Arc::new(ToolchainCache::new(config.cache_dir.clone()));
        Provisioner {
            config,
            cache,
            installer,
            distribution,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ToolchainCache> {
        &self.cache
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.config.platforms.contains(&platform)
    }

    /// Acquire an environment for one job on `platform`.
    pub async fn provision(
        &self,
        platform: Platform,
        needs: ProvisioningNeeds,
    ) -> Result<ScopedEnvironment> {
        if !self.supports(platform) {
            return Err(ProvisioningError::UnsupportedPlatform(platform));
        }

        let scratch_root = self.config.cache_dir.join("scratch");
        tokio::fs::create_dir_all(&scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", platform.name()))
            .tempdir_in(&scratch_root)?;

        // From here on an early return drops `env`, which removes the scratch dir.
        let mut env = ScopedEnvironment::new(
            platform,
            self.config.toolchain.clone(),
            scratch,
            Arc::clone(&self.cache),
            Arc::clone(&self.installer),
        );

        if needs.toolchain {
            let cross = cross_target(platform);
            self.cache
                .ensure_toolchain(self.installer.as_ref(), &self.config.toolchain, cross)
                .await?;
            if let Some(triple) = cross {
                env.set_build_target(triple);
            }
        }

        if needs.codegen_compiler {
            if let Some(spec) = &self.config.codegen {
                let artifact_platform = match platform {
                    Platform::Lint => Platform::host(),
                    other => other,
                };
                let path = self
                    .cache
                    .ensure_artifact(self.distribution.as_ref(), spec, artifact_platform)
                    .await?;
                env.set_codegen_compiler(spec.env_var(), path);
            } else {
                debug!(platform = %platform, "No code generation compiler configured");
            }
        }

        info!(
            platform = %platform,
            toolchain = %env.toolchain(),
            scratch = %env.scratch_dir().display(),
            "Environment provisioned"
        );
        Ok(env)
    }
}

/// Target triple to build for when `platform` is not the host.
fn cross_target(platform: Platform) -> Option<&'static str> {
    if platform == Platform::Lint || platform == Platform::host() {
        None
    } else {
        platform.target_triple()
    }
}
