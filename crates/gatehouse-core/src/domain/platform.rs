//! Platforms and check kinds that span the job matrix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Target platform a job executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "linux")]
    Linux,

    #[serde(rename = "macos")]
    MacOs,

    #[serde(rename = "windows")]
    Windows,

    /// Single logical platform shared by platform-agnostic checks.
    #[serde(rename = "lint")]
    Lint,
}

impl Platform {
    /// Platforms that produce real build jobs.
    pub const BUILD: [Platform; 3] = [Platform::Linux, Platform::MacOs, Platform::Windows];

    /// Get the platform name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
            Platform::Lint => "lint",
        }
    }

    /// Rust target triple used when building for this platform.
    ///
    /// The logical `lint` platform runs on the host and has no triple.
    pub fn target_triple(&self) -> Option<&'static str> {
        match self {
            Platform::Linux => Some("x86_64-unknown-linux-gnu"),
            Platform::MacOs => Some("aarch64-apple-darwin"),
            Platform::Windows => Some("x86_64-pc-windows-msvc"),
            Platform::Lint => None,
        }
    }

    /// Suffix for executables on this platform.
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            Platform::Windows => ".exe",
            _ => "",
        }
    }

    /// Platform of the machine running the orchestrator.
    pub fn host() -> Platform {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" | "ubuntu" => Ok(Platform::Linux),
            "macos" | "darwin" | "osx" => Ok(Platform::MacOs),
            "windows" | "win" => Ok(Platform::Windows),
            "lint" => Ok(Platform::Lint),
            other => Err(CoreError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Kind of validation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    /// Build and test every package in the workspace.
    BuildTest,

    /// Formatter in check-only mode.
    FormatCheck,

    /// Verify declared minimum toolchain versions.
    MsrvCheck,
}

impl CheckKind {
    /// All check kinds, in planning order.
    pub const ALL: [CheckKind; 3] = [
        CheckKind::BuildTest,
        CheckKind::FormatCheck,
        CheckKind::MsrvCheck,
    ];

    /// Get the check name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::BuildTest => "build-test",
            CheckKind::FormatCheck => "format-check",
            CheckKind::MsrvCheck => "msrv-check",
        }
    }

    /// Platform-agnostic checks run once on the logical `lint` platform.
    pub fn is_platform_agnostic(&self) -> bool {
        matches!(self, CheckKind::FormatCheck | CheckKind::MsrvCheck)
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CheckKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "build-test" | "build" | "test" => Ok(CheckKind::BuildTest),
            "format-check" | "format" | "fmt" => Ok(CheckKind::FormatCheck),
            "msrv-check" | "msrv" => Ok(CheckKind::MsrvCheck),
            other => Err(CoreError::UnknownCheckKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse_aliases() {
        assert_eq!("ubuntu".parse::<Platform>().unwrap(), Platform::Linux);
        assert_eq!("Darwin".parse::<Platform>().unwrap(), Platform::MacOs);
        assert_eq!(" win ".parse::<Platform>().unwrap(), Platform::Windows);
        assert!("beos".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_serde_names() {
        let json = serde_json::to_string(&Platform::MacOs).unwrap();
        assert_eq!(json, "\"macos\"");
        let parsed: Platform = serde_json::from_str("\"windows\"").unwrap();
        assert_eq!(parsed, Platform::Windows);
    }

    #[test]
    fn test_lint_has_no_triple() {
        assert!(Platform::Lint.target_triple().is_none());
        for platform in Platform::BUILD {
            assert!(platform.target_triple().is_some());
        }
    }

    #[test]
    fn test_windows_exe_suffix() {
        assert_eq!(Platform::Windows.exe_suffix(), ".exe");
        assert_eq!(Platform::Linux.exe_suffix(), "");
    }

    #[test]
    fn test_check_kind_names_round_trip() {
        for kind in CheckKind::ALL {
            assert_eq!(kind.name().parse::<CheckKind>().unwrap(), kind);
        }
        assert_eq!("fmt".parse::<CheckKind>().unwrap(), CheckKind::FormatCheck);
    }

    #[test]
    fn test_platform_agnostic_checks() {
        assert!(!CheckKind::BuildTest.is_platform_agnostic());
        assert!(CheckKind::FormatCheck.is_platform_agnostic());
        assert!(CheckKind::MsrvCheck.is_platform_agnostic());
    }
}
