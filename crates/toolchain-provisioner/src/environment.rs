//! Scoped build environment handed to exactly one job.

use gatehouse_core::Platform;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::cache::ToolchainCache;
use crate::error::Result;
use crate::installer::ToolchainInstaller;

/// A provisioned environment. The scratch directory (used as the build's
/// target dir) is removed by [`ScopedEnvironment::release`] or, failing
/// that, when the value is dropped.
pub struct ScopedEnvironment {
    platform: Platform,
    toolchain: String,
    codegen_compiler: Option<PathBuf>,
    build_target: Option<String>,
    envs: BTreeMap<String, String>,
    scratch: Option<TempDir>,
    scratch_path: PathBuf,
    cache: Arc<ToolchainCache>,
    installer: Arc<dyn ToolchainInstaller>,
}

impl std::fmt::Debug for ScopedEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedEnvironment")
            .field("platform", &self.platform)
            .field("toolchain", &self.toolchain)
            .field("codegen_compiler", &self.codegen_compiler)
            .field("build_target", &self.build_target)
            .field("scratch", &self.scratch_path)
            .finish()
    }
}

impl ScopedEnvironment {
    pub(crate) fn new(
        platform: Platform,
        toolchain: String,
        scratch: TempDir,
        cache: Arc<ToolchainCache>,
        installer: Arc<dyn ToolchainInstaller>,
    ) -> Self {
        let scratch_path = scratch.path().to_path_buf();
        let mut envs = BTreeMap::new();
        envs.insert(
            "CARGO_TARGET_DIR".to_string(),
            scratch_path.join("target").display().to_string(),
        );
        ScopedEnvironment {
            platform,
            toolchain,
            codegen_compiler: None,
            build_target: None,
            envs,
            scratch: Some(scratch),
            scratch_path,
            cache,
            installer,
        }
    }

    pub(crate) fn set_codegen_compiler(&mut self, env_var: String, path: PathBuf) {
        self.envs.insert(env_var, path.display().to_string());
        self.codegen_compiler = Some(path);
    }

    pub(crate) fn set_build_target(&mut self, triple: &str) {
        self.envs
            .insert("CARGO_BUILD_TARGET".to_string(), triple.to_string());
        self.build_target = Some(triple.to_string());
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Default toolchain for this job, e.g. `stable`.
    pub fn toolchain(&self) -> &str {
        &self.toolchain
    }

    /// Foreign target triple when the job cross-compiles.
    pub fn build_target(&self) -> Option<&str> {
        self.build_target.as_deref()
    }

    pub fn codegen_compiler(&self) -> Option<&Path> {
        self.codegen_compiler.as_deref()
    }

    /// Scratch directory private to this job.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_path
    }

    /// Environment variables every command of the job must see.
    pub fn envs(&self) -> &BTreeMap<String, String> {
        &self.envs
    }

    /// Install another toolchain (MSRV builds) through the shared cache.
    pub async fn ensure_toolchain(&self, toolchain: &str) -> Result<()> {
        self.cache
            .ensure_toolchain(self.installer.as_ref(), toolchain, None)
            .await
    }

    /// Tear down the environment, reporting cleanup failures.
    pub fn release(mut self) -> Result<()> {
        if let Some(scratch) = self.scratch.take() {
            debug!(platform = %self.platform, path = %self.scratch_path.display(), "Releasing environment");
            scratch.close()?;
        }
        Ok(())
    }
}

impl Drop for ScopedEnvironment {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = scratch.close() {
                warn!(path = %self.scratch_path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }
}
