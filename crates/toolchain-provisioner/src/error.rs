//! Error types for toolchain-provisioner

use gatehouse_core::Platform;
use thiserror::Error;

/// Errors that can occur while acquiring a build environment.
///
/// These are infrastructure failures: the owning job is reported as
/// `errored`, never `failed`.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// Provisioner is not configured to serve this platform
    #[error("platform {0} is not supported by this provisioner")]
    UnsupportedPlatform(Platform),

    /// Distribution source could not be reached or refused the artifact
    #[error("distribution source unreachable at {url}: {reason}")]
    DistributionUnreachable { url: String, reason: String },

    /// Downloaded artifact does not match the pinned digest
    #[error("checksum mismatch for {artifact}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// Toolchain installer failed
    #[error("toolchain install failed for {toolchain}: {reason}")]
    ToolchainInstall { toolchain: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for ProvisioningError {
    fn from(err: reqwest::Error) -> Self {
        ProvisioningError::Http(err.to_string())
    }
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisioningError>;
