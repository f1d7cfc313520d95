//! Error types for workspace discovery.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort discovery. Discovery is all-or-nothing: any of these
/// means no inventory is returned.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Filesystem access failed
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest could not be parsed or is missing required fields
    #[error("malformed manifest {path}: {reason}")]
    MalformedManifest { path: PathBuf, reason: String },

    /// A declared dependency does not resolve to anything
    #[error("package {package} declares dependency {dependency} which cannot be located: {reason}")]
    MissingDependency {
        package: String,
        dependency: String,
        reason: String,
    },

    /// A minimum toolchain version string is not `MAJOR.MINOR[.PATCH]`
    #[error("invalid toolchain version {value:?}: {reason}")]
    InvalidVersion { value: String, reason: String },

    /// Two manifests declare the same package name
    #[error("package {name} is declared by both {first} and {second}")]
    DuplicatePackage {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// The dependency graph is not acyclic
    #[error("dependency cycle detected involving packages: {packages:?}")]
    DependencyCycle { packages: Vec<String> },

    /// A graph operation referenced a package that was never added
    #[error("package not found in workspace graph: {name}")]
    UnknownPackage { name: String },

    /// No manifest with a `[package]` section was found
    #[error("no packages found under {0}")]
    NoPackages(PathBuf),
}

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_packages() {
        let err = DiscoveryError::DependencyCycle {
            packages: vec!["core".to_string(), "io".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("core"));
        assert!(msg.contains("io"));
    }

    #[test]
    fn test_missing_dependency_names_both_sides() {
        let err = DiscoveryError::MissingDependency {
            package: "io".to_string(),
            dependency: "codec".to_string(),
            reason: "path ../codec does not exist".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("io"));
        assert!(msg.contains("codec"));
    }
}
