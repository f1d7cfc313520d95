//! Workspace walk: find every package manifest and resolve its edges.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{DiscoveryError, Result};
use crate::graph::WorkspaceGraph;
use crate::manifest::{Inheritable, RawDependency, RawManifest, RawWorkspace};
use crate::version::RustVersion;
use crate::{Dependency, DependencySource, Inventory, Package};

const MANIFEST_NAME: &str = "Cargo.toml";

/// Discover every package under `workspace_root`.
///
/// When the root manifest has a `[workspace]` table, only the root package
/// and directories matched by `members` (minus `exclude`) are packages;
/// other manifests in the tree are ignored. Without one, every manifest
/// under the root counts.
///
/// Discovery is all-or-nothing: the first malformed manifest, unresolvable
/// dependency or dependency cycle aborts with an error and no inventory.
pub fn discover_packages(workspace_root: &Path) -> Result<Inventory> {
    let root = workspace_root
        .canonicalize()
        .map_err(|source| DiscoveryError::Io {
            path: workspace_root.to_path_buf(),
            source,
        })?;

    let root_manifest = root.join(MANIFEST_NAME);
    let declared_workspace = if root_manifest.is_file() {
        RawManifest::load(&root_manifest)?.workspace
    } else {
        None
    };

    let mut manifest_paths = find_manifests(&root)?;
    if let Some(ws) = &declared_workspace {
        manifest_paths = select_members(&root, manifest_paths, ws);
    }
    debug!(root = %root.display(), manifests = manifest_paths.len(), "Found manifests");

    let mut manifests: Vec<(PathBuf, RawManifest)> = Vec::with_capacity(manifest_paths.len());
    for path in manifest_paths {
        let manifest = RawManifest::load(&path)?;
        manifests.push((path, manifest));
    }

    let workspace = declared_workspace.unwrap_or_default();

    // Index packages by directory so path dependencies can be resolved.
    let mut by_dir: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut by_name: BTreeMap<String, PathBuf> = BTreeMap::new();
    for (path, manifest) in &manifests {
        let Some(package) = &manifest.package else {
            continue;
        };
        let name = package.name.trim().to_string();
        if let Some(first) = by_name.get(&name) {
            return Err(DiscoveryError::DuplicatePackage {
                name,
                first: first.clone(),
                second: path.clone(),
            });
        }
        by_dir.insert(manifest_dir(path), name.clone());
        by_name.insert(name, path.clone());
    }

    if by_name.is_empty() {
        return Err(DiscoveryError::NoPackages(root));
    }

    let mut packages = Vec::with_capacity(by_name.len());
    for (path, manifest) in &manifests {
        let Some(raw) = &manifest.package else {
            continue;
        };
        let name = raw.name.trim().to_string();
        let rust_version = resolve_rust_version(raw.rust_version.as_ref(), &workspace, path)?;
        let external = manifest.external_rust_versions(path)?;

        let mut dependencies = Vec::new();
        for (dep_name, dep) in manifest.all_dependencies() {
            let source = resolve_dependency(
                &name,
                dep_name,
                dep,
                &manifest_dir(path),
                &root,
                &workspace,
                &by_dir,
            )?;
            let source = match source {
                Resolved::Workspace(package) => DependencySource::Workspace { package },
                Resolved::External => DependencySource::External {
                    rust_version: external
                        .get(dep_name)
                        .map(|v| v.parse::<RustVersion>())
                        .transpose()?,
                },
            };
            dependencies.push(Dependency {
                name: dep_name.to_string(),
                source,
            });
        }

        packages.push(Package {
            name,
            manifest_path: path.clone(),
            rust_version,
            dependencies,
        });
    }

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    let inventory = build_inventory(root, packages)?;
    info!(
        root = %inventory.root().display(),
        packages = inventory.packages().len(),
        "Workspace inventory complete"
    );
    Ok(inventory)
}

/// Build the graph and effective minimums for already-resolved packages.
pub(crate) fn build_inventory(root: PathBuf, packages: Vec<Package>) -> Result<Inventory> {
    let mut graph = WorkspaceGraph::new();
    for package in &packages {
        graph.add_node(&package.name);
    }
    for package in &packages {
        for dep in package.workspace_dependencies() {
            graph.add_dependency(dep, &package.name)?;
        }
    }

    let declared: BTreeMap<String, Option<RustVersion>> = packages
        .iter()
        .map(|p| (p.name.clone(), p.rust_version))
        .collect();
    let external: BTreeMap<String, Vec<RustVersion>> = packages
        .iter()
        .map(|p| (p.name.clone(), p.external_minimums().collect()))
        .collect();
    let effective = graph.effective_minimums(&declared, &external)?;

    Ok(Inventory {
        root,
        packages,
        graph,
        effective,
    })
}

fn find_manifests(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));

    for entry in walker {
        let entry = entry.map_err(|e| DiscoveryError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
        })?;
        if entry.file_type().is_file() && entry.file_name() == MANIFEST_NAME {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Keep the root manifest plus those whose directory matches a member
/// pattern and lies under no excluded path.
fn select_members(root: &Path, paths: Vec<PathBuf>, workspace: &RawWorkspace) -> Vec<PathBuf> {
    let patterns: Vec<Vec<&str>> = workspace
        .members
        .iter()
        .map(|m| path_segments(m))
        .collect();
    let excluded: Vec<Vec<&str>> = workspace
        .exclude
        .iter()
        .map(|e| path_segments(e))
        .collect();
    let mut matched = vec![false; patterns.len()];

    let selected = paths
        .into_iter()
        .filter(|path| {
            let Ok(rel) = manifest_dir(path).strip_prefix(root).map(Path::to_path_buf) else {
                return false;
            };
            let segments: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if segments.is_empty() {
                return true;
            }
            if excluded.iter().any(|ex| is_under(ex, &segments)) {
                debug!(path = %path.display(), "Excluded from workspace");
                return false;
            }
            let mut member = false;
            for (pattern, hit) in patterns.iter().zip(matched.iter_mut()) {
                if pattern.len() == segments.len()
                    && pattern.iter().zip(&segments).all(|(p, s)| segment_matches(p, s))
                {
                    *hit = true;
                    member = true;
                }
            }
            member
        })
        .collect();

    for (pattern, hit) in workspace.members.iter().zip(matched) {
        if !hit {
            warn!(member = %pattern, "Workspace member pattern matched no manifest");
        }
    }
    selected
}

fn is_under(prefix: &[&str], segments: &[String]) -> bool {
    !prefix.is_empty()
        && segments.len() >= prefix.len()
        && prefix.iter().zip(segments).all(|(p, s)| p == s)
}

fn path_segments(pattern: &str) -> Vec<&str> {
    pattern
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Match one path segment against a pattern where `*` matches any run of
/// characters and `?` exactly one.
fn segment_matches(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while ni < n.len() {
        match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi, ni));
                pi += 1;
            }
            Some(c) if *c == '?' || *c == n[ni] => {
                pi += 1;
                ni += 1;
            }
            _ => match backtrack {
                Some((star, at)) => {
                    pi = star + 1;
                    ni = at + 1;
                    backtrack = Some((star, at + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == "target" || name.starts_with('.')
}

fn manifest_dir(manifest_path: &Path) -> PathBuf {
    manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn resolve_rust_version(
    raw: Option<&Inheritable>,
    workspace: &RawWorkspace,
    path: &Path,
) -> Result<Option<RustVersion>> {
    match raw {
        None => Ok(None),
        Some(Inheritable::Value(value)) => value.parse().map(Some),
        Some(Inheritable::Workspace { workspace: true }) => {
            let inherited = workspace
                .package
                .as_ref()
                .and_then(|p| p.rust_version.as_deref())
                .ok_or_else(|| DiscoveryError::MalformedManifest {
                    path: path.to_path_buf(),
                    reason: "rust-version.workspace = true but [workspace.package] has no rust-version"
                        .to_string(),
                })?;
            inherited.parse().map(Some)
        }
        Some(Inheritable::Workspace { workspace: false }) => {
            Err(DiscoveryError::MalformedManifest {
                path: path.to_path_buf(),
                reason: "rust-version.workspace must be true".to_string(),
            })
        }
    }
}

enum Resolved {
    Workspace(String),
    External,
}

fn resolve_dependency(
    package: &str,
    dep_name: &str,
    dep: &RawDependency,
    package_dir: &Path,
    root: &Path,
    workspace: &RawWorkspace,
    by_dir: &BTreeMap<PathBuf, String>,
) -> Result<Resolved> {
    let missing = |reason: String| DiscoveryError::MissingDependency {
        package: package.to_string(),
        dependency: dep_name.to_string(),
        reason,
    };

    let location = match dep {
        RawDependency::Version(_) => None,
        RawDependency::Detailed(detail) if detail.workspace => {
            let inherited = workspace.dependencies.get(dep_name).ok_or_else(|| {
                missing("declared with workspace = true but absent from [workspace.dependencies]".to_string())
            })?;
            match inherited {
                RawDependency::Detailed(detail) => detail.path.as_ref().map(|p| root.join(p)),
                RawDependency::Version(_) => None,
            }
        }
        RawDependency::Detailed(detail) => detail.path.as_ref().map(|p| package_dir.join(p)),
    };

    let Some(location) = location else {
        return Ok(Resolved::External);
    };

    let canonical = location
        .canonicalize()
        .map_err(|e| missing(format!("path {}: {}", location.display(), e)))?;
    by_dir
        .get(&canonical)
        .map(|name| Resolved::Workspace(name.clone()))
        .ok_or_else(|| {
            missing(format!(
                "path {} is not a package of this workspace",
                canonical.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_wildcards() {
        assert!(segment_matches("*", "core"));
        assert!(segment_matches("gate*", "gatehouse"));
        assert!(segment_matches("*-ci", "gatehouse-ci"));
        assert!(segment_matches("c?re", "core"));
        assert!(!segment_matches("c?re", "coore"));
        assert!(!segment_matches("io", "iox"));
    }

    #[test]
    fn test_exclude_covers_subdirectories() {
        let nested = vec!["vendor".to_string(), "zlib".to_string()];
        assert!(is_under(&["vendor"], &nested));
        assert!(!is_under(&["vendor", "png"], &nested));
        assert!(!is_under(&[], &nested));
    }
}
