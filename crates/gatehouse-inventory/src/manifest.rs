//! Raw Cargo manifest structure, as much of it as discovery needs.
//!
//! Unknown keys are ignored; dev-dependencies are deliberately not read
//! because they do not constrain a package's minimum toolchain.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{DiscoveryError, Result};

/// Top-level manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawManifest {
    pub package: Option<RawPackage>,

    pub workspace: Option<RawWorkspace>,

    #[serde(default)]
    pub dependencies: BTreeMap<String, RawDependency>,

    #[serde(default, rename = "build-dependencies")]
    pub build_dependencies: BTreeMap<String, RawDependency>,

    /// `[target.'cfg(...)'.dependencies]` tables.
    #[serde(default)]
    pub target: BTreeMap<String, RawTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPackage {
    pub name: String,

    #[serde(default, rename = "rust-version")]
    pub rust_version: Option<Inheritable>,

    #[serde(default)]
    pub metadata: Option<toml::Value>,
}

/// A field that may be inherited from `[workspace.package]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Inheritable {
    Value(String),
    Workspace { workspace: bool },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkspace {
    /// Member directories, relative to the root; `*` and `?` match within one path segment.
    #[serde(default)]
    pub members: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub package: Option<RawWorkspacePackage>,

    #[serde(default)]
    pub dependencies: BTreeMap<String, RawDependency>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkspacePackage {
    #[serde(default, rename = "rust-version")]
    pub rust_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub dependencies: BTreeMap<String, RawDependency>,

    #[serde(default, rename = "build-dependencies")]
    pub build_dependencies: BTreeMap<String, RawDependency>,
}

/// `dep = "1.0"` or `dep = { path = "..", version = "..", workspace = true }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDependency {
    Version(String),
    Detailed(DetailedDependency),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailedDependency {
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub workspace: bool,
}

impl RawManifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse manifest text; `path` is only used in error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let manifest: RawManifest =
            toml::from_str(content).map_err(|e| DiscoveryError::MalformedManifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if let Some(package) = &manifest.package {
            if package.name.trim().is_empty() {
                return Err(DiscoveryError::MalformedManifest {
                    path: path.to_path_buf(),
                    reason: "package.name is empty".to_string(),
                });
            }
        }
        Ok(manifest)
    }

    /// Every normal and build dependency, including target-specific ones.
    /// A dependency listed in several tables appears once.
    pub fn all_dependencies(&self) -> BTreeMap<&str, &RawDependency> {
        let mut all = BTreeMap::new();
        let tables = [&self.dependencies, &self.build_dependencies]
            .into_iter()
            .chain(
                self.target
                    .values()
                    .flat_map(|t| [&t.dependencies, &t.build_dependencies]),
            );
        for table in tables {
            for (name, dep) in table {
                all.entry(name.as_str()).or_insert(dep);
            }
        }
        all
    }

    /// `[package.metadata.gatehouse.external-rust-version]` entries.
    pub fn external_rust_versions(&self, path: &Path) -> Result<BTreeMap<String, String>> {
        let table = self
            .package
            .as_ref()
            .and_then(|p| p.metadata.as_ref())
            .and_then(|m| m.get("gatehouse"))
            .and_then(|g| g.get("external-rust-version"));

        let Some(table) = table else {
            return Ok(BTreeMap::new());
        };
        let Some(table) = table.as_table() else {
            return Err(DiscoveryError::MalformedManifest {
                path: path.to_path_buf(),
                reason: "package.metadata.gatehouse.external-rust-version must be a table"
                    .to_string(),
            });
        };

        table
            .iter()
            .map(|(name, value)| match value.as_str() {
                Some(version) => Ok((name.clone(), version.to_string())),
                None => Err(DiscoveryError::MalformedManifest {
                    path: path.to_path_buf(),
                    reason: format!("external-rust-version for {name} must be a string"),
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(content: &str) -> Result<RawManifest> {
        RawManifest::parse(content, &PathBuf::from("Cargo.toml"))
    }

    #[test]
    fn test_parse_package_with_dependencies() {
        let manifest = parse(
            r#"
            [package]
            name = "io"
            rust-version = "1.55"

            [dependencies]
            core = { path = "../core" }
            serde = "1.0"

            [dev-dependencies]
            tempfile = "3"

            [target.'cfg(windows)'.dependencies]
            winapi = "0.3"
            "#,
        )
        .unwrap();

        let package = manifest.package.as_ref().unwrap();
        assert_eq!(package.name, "io");
        assert!(matches!(&package.rust_version, Some(Inheritable::Value(v)) if v == "1.55"));

        let deps = manifest.all_dependencies();
        assert_eq!(deps.len(), 3);
        assert!(deps.contains_key("core"));
        assert!(deps.contains_key("winapi"));
        assert!(!deps.contains_key("tempfile"));
    }

    #[test]
    fn test_parse_inherited_rust_version() {
        let manifest = parse(
            r#"
            [package]
            name = "core"
            rust-version.workspace = true
            "#,
        )
        .unwrap();
        assert!(matches!(
            manifest.package.unwrap().rust_version,
            Some(Inheritable::Workspace { workspace: true })
        ));
    }

    #[test]
    fn test_virtual_manifest_has_no_package() {
        let manifest = parse(
            r#"
            [workspace]
            members = ["core"]

            [workspace.package]
            rust-version = "1.60"

            [workspace.dependencies]
            core = { path = "core" }
            "#,
        )
        .unwrap();
        assert!(manifest.package.is_none());
        let ws = manifest.workspace.unwrap();
        assert_eq!(ws.package.unwrap().rust_version.as_deref(), Some("1.60"));
        assert!(ws.dependencies.contains_key("core"));
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let res = parse("[package\nname = ");
        assert!(matches!(res, Err(DiscoveryError::MalformedManifest { .. })));
    }

    #[test]
    fn test_missing_name_is_error() {
        let res = parse("[package]\nversion = \"0.1.0\"\n");
        assert!(matches!(res, Err(DiscoveryError::MalformedManifest { .. })));
    }

    #[test]
    fn test_external_rust_versions() {
        let manifest = parse(
            r#"
            [package]
            name = "io"

            [package.metadata.gatehouse.external-rust-version]
            prost = "1.70"
            "#,
        )
        .unwrap();
        let ext = manifest
            .external_rust_versions(&PathBuf::from("Cargo.toml"))
            .unwrap();
        assert_eq!(ext.get("prost").map(String::as_str), Some("1.70"));
    }

    #[test]
    fn test_external_rust_version_must_be_string() {
        let manifest = parse(
            r#"
            [package]
            name = "io"

            [package.metadata.gatehouse.external-rust-version]
            prost = 170
            "#,
        )
        .unwrap();
        assert!(manifest
            .external_rust_versions(&PathBuf::from("Cargo.toml"))
            .is_err());
    }
}
