//! Local cache of installed toolchains and fetched compilers.
//!
//! Shared by every job on the machine. Lookups of already-installed
//! entries only take the read side of an `RwLock`; installing a missing
//! entry is serialised behind a single install mutex and re-checked once
//! the mutex is held.

use gatehouse_core::Platform;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::distribution::{CodegenSpec, DistributionSource};
use crate::error::Result;
use crate::installer::ToolchainInstaller;

/// Shared install cache
#[derive(Debug)]
pub struct ToolchainCache {
    root: PathBuf,
    toolchains: RwLock<HashSet<String>>,
    artifacts: RwLock<HashMap<String, PathBuf>>,
    install_lock: Mutex<()>,
}

impl ToolchainCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ToolchainCache {
            root: root.into(),
            toolchains: RwLock::new(HashSet::new()),
            artifacts: RwLock::new(HashMap::new()),
            install_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn has_toolchain(&self, key: &str) -> bool {
        self.toolchains.read().await.contains(key)
    }

    /// Make sure `toolchain` (and optionally its `target` std) is installed.
    pub async fn ensure_toolchain(
        &self,
        installer: &dyn ToolchainInstaller,
        toolchain: &str,
        target: Option<&str>,
    ) -> Result<()> {
        let key = match target {
            Some(target) => format!("{toolchain}:{target}"),
            None => toolchain.to_string(),
        };
        if self.has_toolchain(&key).await {
            return Ok(());
        }

        let _guard = self.install_lock.lock().await;
        if self.has_toolchain(&key).await {
            debug!(toolchain = %key, "Installed by a concurrent job");
            return Ok(());
        }

        if !self.has_toolchain(toolchain).await {
            installer.install(toolchain).await?;
            self.toolchains.write().await.insert(toolchain.to_string());
        }
        if let Some(target) = target {
            installer.add_target(toolchain, target).await?;
            self.toolchains.write().await.insert(key);
        }
        Ok(())
    }

    /// Where the compiler binary for `platform` lives once fetched.
    pub fn artifact_path(&self, spec: &CodegenSpec, platform: Platform) -> PathBuf {
        self.root
            .join("codegen")
            .join(&spec.name)
            .join(&spec.version)
            .join(platform.name())
            .join(format!("{}{}", spec.name, platform.exe_suffix()))
    }

    /// Return the local path of the compiler for `platform`, fetching it
    /// from `source` if it is not already present.
    pub async fn ensure_artifact(
        &self,
        source: &dyn DistributionSource,
        spec: &CodegenSpec,
        platform: Platform,
    ) -> Result<PathBuf> {
        let key = spec.artifact_name(platform);
        if let Some(path) = self.artifacts.read().await.get(&key) {
            return Ok(path.clone());
        }

        let _guard = self.install_lock.lock().await;
        if let Some(path) = self.artifacts.read().await.get(&key) {
            return Ok(path.clone());
        }

        let path = self.artifact_path(spec, platform);
        if tokio::fs::try_exists(&path).await? {
            debug!(path = %path.display(), "Compiler already on disk");
        } else {
            let bytes = source.fetch(spec, platform).await?;
            spec.verify(platform, &bytes)?;
            write_atomically(&path, &bytes).await?;
            info!(artifact = %key, path = %path.display(), "Installed code generation compiler");
        }

        self.artifacts.write().await.insert(key, path.clone());
        Ok(path)
    }
}

/// Write via a temp file in the destination directory, then rename, so a
/// half-written binary is never visible at `path`.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&dir).await?;

    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        use std::io::Write;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o755))?;
        }
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisioningError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingInstaller {
        installs: AtomicUsize,
        targets: AtomicUsize,
    }

    #[async_trait]
    impl ToolchainInstaller for CountingInstaller {
        async fn install(&self, _toolchain: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn add_target(&self, _toolchain: &str, _target: &str) -> Result<()> {
            self.targets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StaticSource {
        body: Vec<u8>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl DistributionSource for StaticSource {
        async fn fetch(&self, _spec: &CodegenSpec, _platform: Platform) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    #[tokio::test]
    async fn test_concurrent_ensure_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ToolchainCache::new(dir.path()));
        let installer = Arc::new(CountingInstaller::default());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let installer = Arc::clone(&installer);
            handles.push(tokio::spawn(async move {
                cache
                    .ensure_toolchain(installer.as_ref(), "1.60", None)
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(installer.installs.load(Ordering::SeqCst), 1);
        assert!(cache.has_toolchain("1.60").await);
    }

    #[tokio::test]
    async fn test_target_added_once_per_toolchain() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(dir.path());
        let installer = CountingInstaller::default();

        for _ in 0..3 {
            cache
                .ensure_toolchain(&installer, "stable", Some("x86_64-pc-windows-msvc"))
                .await
                .unwrap();
        }
        cache.ensure_toolchain(&installer, "stable", None).await.unwrap();

        assert_eq!(installer.installs.load(Ordering::SeqCst), 1);
        assert_eq!(installer.targets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_artifact_fetched_once_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(dir.path());
        let source = StaticSource {
            body: b"compiler".to_vec(),
            fetches: AtomicUsize::new(0),
        };
        let spec = CodegenSpec::new("protoc", "25.1", "http://unused");

        let first = cache
            .ensure_artifact(&source, &spec, Platform::Linux)
            .await
            .unwrap();
        let second = cache
            .ensure_artifact(&source, &spec, Platform::Linux)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&first).unwrap(), b"compiler");
    }

    #[tokio::test]
    async fn test_artifact_checksum_mismatch_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(dir.path());
        let source = StaticSource {
            body: b"tampered".to_vec(),
            fetches: AtomicUsize::new(0),
        };
        let spec = CodegenSpec::new("protoc", "25.1", "http://unused")
            .with_sha256(Platform::Linux, &"0".repeat(64));

        let res = cache.ensure_artifact(&source, &spec, Platform::Linux).await;

        assert!(matches!(res, Err(ProvisioningError::ChecksumMismatch { .. })));
        assert!(!cache.artifact_path(&spec, Platform::Linux).exists());
    }
}
