//! Workspace inventory
//!
//! Discovers every package in a multi-package workspace, its declared
//! minimum toolchain version, and the in-workspace dependency graph
//! between packages.
//!
//! # Example
//!
//! ```no_run
//! use gatehouse_inventory::discover_packages;
//!
//! let inventory = discover_packages(std::path::Path::new(".")).unwrap();
//! for package in inventory.packages() {
//!     println!("{} {:?}", package.name, inventory.effective_msrv(&package.name));
//! }
//! ```

pub mod discover;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod version;

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use discover::discover_packages;
pub use error::{DiscoveryError, Result};
pub use graph::WorkspaceGraph;
pub use version::RustVersion;

/// One package of the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    pub manifest_path: PathBuf,
    /// Declared minimum toolchain version, if any.
    pub rust_version: Option<RustVersion>,
    pub dependencies: Vec<Dependency>,
}

/// A normal or build dependency of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub name: String,
    pub source: DependencySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencySource {
    /// Another package of the same workspace.
    Workspace { package: String },
    /// A registry or git dependency, with its known minimum if configured.
    External { rust_version: Option<RustVersion> },
}

impl Package {
    /// Names of in-workspace packages this package depends on.
    pub fn workspace_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().filter_map(|d| match &d.source {
            DependencySource::Workspace { package } => Some(package.as_str()),
            DependencySource::External { .. } => None,
        })
    }

    /// Known minimums of external dependencies.
    pub fn external_minimums(&self) -> impl Iterator<Item = RustVersion> + '_ {
        self.dependencies.iter().filter_map(|d| match &d.source {
            DependencySource::External { rust_version } => *rust_version,
            DependencySource::Workspace { .. } => None,
        })
    }

    pub fn manifest_dir(&self) -> &Path {
        self.manifest_path.parent().unwrap_or(&self.manifest_path)
    }
}

/// The result of discovery: packages sorted by name plus their graph.
#[derive(Debug, Clone)]
pub struct Inventory {
    root: PathBuf,
    packages: Vec<Package>,
    graph: WorkspaceGraph,
    effective: BTreeMap<String, Option<RustVersion>>,
}

impl Inventory {
    /// Assemble an inventory from already-resolved packages. Used by callers
    /// that construct workspaces in memory.
    pub fn from_packages(root: impl Into<PathBuf>, mut packages: Vec<Package>) -> Result<Self> {
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in packages.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(DiscoveryError::DuplicatePackage {
                    name: pair[0].name.clone(),
                    first: pair[0].manifest_path.clone(),
                    second: pair[1].manifest_path.clone(),
                });
            }
        }
        discover::build_inventory(root.into(), packages)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages
            .binary_search_by(|p| p.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.packages[i])
    }

    pub fn graph(&self) -> &WorkspaceGraph {
        &self.graph
    }

    /// Declared minimum of `name`, if the package declares one.
    pub fn declared_msrv(&self, name: &str) -> Option<RustVersion> {
        self.package(name).and_then(|p| p.rust_version)
    }

    /// Maximum of the package's own minimum and every transitive
    /// dependency's minimum. `None` when nothing in the closure declares one.
    pub fn effective_msrv(&self, name: &str) -> Option<RustVersion> {
        self.effective.get(name).copied().flatten()
    }

    /// Package names, dependencies before dependents.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        self.graph.topological_order()
    }
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    fn package(name: &str, msrv: Option<&str>, deps: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            manifest_path: PathBuf::from(format!("/ws/{name}/Cargo.toml")),
            rust_version: msrv.map(|v| v.parse().unwrap()),
            dependencies: deps
                .iter()
                .map(|d| Dependency {
                    name: d.to_string(),
                    source: DependencySource::Workspace {
                        package: d.to_string(),
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn test_from_packages_sorts_and_computes_effective() {
        let inv = Inventory::from_packages(
            "/ws",
            vec![
                package("io", Some("1.55"), &["core"]),
                package("core", Some("1.58"), &[]),
            ],
        )
        .unwrap();
        let names: Vec<_> = inv.packages().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["core", "io"]);
        assert_eq!(inv.effective_msrv("io").unwrap().to_string(), "1.58");
        assert_eq!(inv.declared_msrv("io").unwrap().to_string(), "1.55");
        assert!(inv.package("ghost").is_none());
    }

    #[test]
    fn test_from_packages_rejects_duplicates() {
        let res = Inventory::from_packages(
            "/ws",
            vec![package("core", None, &[]), package("core", None, &[])],
        );
        assert!(matches!(res, Err(DiscoveryError::DuplicatePackage { .. })));
    }

    #[test]
    fn test_dependency_source_serializes_with_kind() {
        let dep = Dependency {
            name: "serde".to_string(),
            source: DependencySource::External {
                rust_version: Some("1.56".parse().unwrap()),
            },
        };
        let json = serde_json::to_value(&dep).unwrap();
        assert_eq!(json["source"]["kind"], "external");
        assert_eq!(json["source"]["rust_version"], "1.56");
    }
}
