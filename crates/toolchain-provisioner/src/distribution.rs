//! Versioned distribution source for the external code-generation compiler.
//!
//! Artifacts live at `{base}/v{version}/{name}-{version}-{platform}{exe}`,
//! e.g. `https://dist.example.com/protoc/v25.1/protoc-25.1-windows.exe`.

use async_trait::async_trait;
use gatehouse_core::Platform;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ProvisioningError, Result};

/// Pinned code-generation compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodegenSpec {
    /// Binary name, e.g. `protoc`
    pub name: String,
    /// Version to fetch
    pub version: String,
    /// Base URL of the distribution source
    pub distribution_url: String,
    /// Environment variable the build reads the compiler path from.
    /// Defaults to the upper-cased binary name.
    #[serde(default)]
    pub env_var: Option<String>,
    /// Expected SHA-256 per platform name; platforms not listed are not verified
    #[serde(default)]
    pub sha256: BTreeMap<String, String>,
}

impl CodegenSpec {
    pub fn new(name: &str, version: &str, distribution_url: &str) -> Self {
        CodegenSpec {
            name: name.to_string(),
            version: version.to_string(),
            distribution_url: distribution_url.to_string(),
            env_var: None,
            sha256: BTreeMap::new(),
        }
    }

    /// Pin the digest for one platform.
    pub fn with_sha256(mut self, platform: Platform, digest: &str) -> Self {
        self.sha256
            .insert(platform.name().to_string(), digest.to_ascii_lowercase());
        self
    }

    /// File name of the artifact for `platform`.
    pub fn artifact_name(&self, platform: Platform) -> String {
        format!(
            "{}-{}-{}{}",
            self.name,
            self.version,
            platform.name(),
            platform.exe_suffix()
        )
    }

    pub fn artifact_url(&self, platform: Platform) -> String {
        format!(
            "{}/v{}/{}",
            self.distribution_url.trim_end_matches('/'),
            self.version,
            self.artifact_name(platform)
        )
    }

    pub fn env_var(&self) -> String {
        self.env_var
            .clone()
            .unwrap_or_else(|| self.name.to_ascii_uppercase().replace('-', "_"))
    }

    /// Check `bytes` against the pinned digest for `platform`, if any.
    pub fn verify(&self, platform: Platform, bytes: &[u8]) -> Result<()> {
        let Some(expected) = self.sha256.get(platform.name()) else {
            return Ok(());
        };
        let actual = hex::encode(Sha256::digest(bytes));
        if actual != expected.to_ascii_lowercase() {
            return Err(ProvisioningError::ChecksumMismatch {
                artifact: self.artifact_name(platform),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Where code-generation compiler binaries come from.
#[async_trait]
pub trait DistributionSource: Send + Sync {
    /// Download the artifact bytes for `platform`.
    async fn fetch(&self, spec: &CodegenSpec, platform: Platform) -> Result<Vec<u8>>;
}

/// HTTP distribution source
pub struct HttpDistribution {
    client: reqwest::Client,
}

impl HttpDistribution {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(120))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gatehouse-provisioner/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(HttpDistribution { client })
    }
}

#[async_trait]
impl DistributionSource for HttpDistribution {
    async fn fetch(&self, spec: &CodegenSpec, platform: Platform) -> Result<Vec<u8>> {
        let url = spec.artifact_url(platform);
        info!(url = %url, "Fetching code generation compiler");

        let unreachable = |reason: String| ProvisioningError::DistributionUnreachable {
            url: url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        debug!(url = %url, bytes = bytes.len(), "Downloaded artifact");
        Ok(bytes.to_vec())
    }
}
