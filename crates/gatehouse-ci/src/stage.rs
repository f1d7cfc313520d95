//! Tool commands for each check kind.

use gatehouse_inventory::{Package, RustVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// How format-check is scoped across the workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatScope {
    /// One `cargo fmt --all` over the whole workspace.
    #[default]
    Workspace,

    /// One invocation per package manifest.
    Package,
}

/// One tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCommand {
    /// Human-readable step name, e.g. `build` or `msrv core`.
    pub label: String,

    /// Executable.
    pub program: String,

    pub args: Vec<String>,

    /// Working directory.
    pub cwd: PathBuf,

    /// Extra environment variables.
    pub envs: BTreeMap<String, String>,
}

impl ToolCommand {
    /// A cargo invocation, pinned to `toolchain` when one is given.
    pub fn cargo(label: &str, toolchain: Option<&str>, args: &[&str], cwd: &Path) -> Self {
        let mut full = Vec::with_capacity(args.len() + 1);
        if let Some(toolchain) = toolchain.filter(|t| !t.is_empty()) {
            full.push(format!("+{toolchain}"));
        }
        full.extend(args.iter().map(|a| a.to_string()));
        Self {
            label: label.to_string(),
            program: "cargo".to_string(),
            args: full,
            cwd: cwd.to_path_buf(),
            envs: BTreeMap::new(),
        }
    }

    pub fn with_envs(mut self, envs: &BTreeMap<String, String>) -> Self {
        self.envs
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Toolchain selector (`+1.60`) if the command is pinned.
    pub fn toolchain(&self) -> Option<&str> {
        self.args.first().and_then(|a| a.strip_prefix('+'))
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// `build-test`: build every package, then run every package's tests.
///
/// Cross-compiled builds cannot execute their tests on this host, so
/// `run_tests = false` stops after the build.
pub fn build_test_commands(root: &Path, toolchain: &str, run_tests: bool) -> Vec<ToolCommand> {
    let mut commands = vec![ToolCommand::cargo(
        "build",
        Some(toolchain),
        &["build", "--workspace", "--all-targets"],
        root,
    )];
    if run_tests {
        commands.push(ToolCommand::cargo(
            "test",
            Some(toolchain),
            &["test", "--workspace"],
            root,
        ));
    }
    commands
}

/// `format-check`: formatter in check-only mode.
pub fn format_commands(
    root: &Path,
    toolchain: &str,
    scope: FormatScope,
    packages: &[Package],
) -> Vec<ToolCommand> {
    match scope {
        FormatScope::Workspace => vec![ToolCommand::cargo(
            "fmt",
            Some(toolchain),
            &["fmt", "--all", "--", "--check"],
            root,
        )],
        FormatScope::Package => packages
            .iter()
            .map(|p| {
                let manifest = p.manifest_path.display().to_string();
                ToolCommand::cargo(
                    &format!("fmt {}", p.name),
                    Some(toolchain),
                    &["fmt", "--manifest-path", &manifest, "--", "--check"],
                    root,
                )
            })
            .collect(),
    }
}

/// `msrv-check` for one package, built with exactly `version`.
pub fn msrv_command(
    root: &Path,
    package: &Package,
    version: RustVersion,
    check_command: &str,
) -> ToolCommand {
    let manifest = package.manifest_path.display().to_string();
    ToolCommand::cargo(
        &format!("msrv {}", package.name),
        Some(&version.toolchain()),
        &[check_command, "--manifest-path", &manifest],
        root,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(name: &str) -> Package {
        Package {
            name: name.to_string(),
            manifest_path: PathBuf::from(format!("/ws/{name}/Cargo.toml")),
            rust_version: None,
            dependencies: vec![],
        }
    }

    #[test]
    fn test_build_test_commands() {
        let cmds = build_test_commands(Path::new("/ws"), "stable", true);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].to_string(), "cargo +stable build --workspace --all-targets");
        assert_eq!(cmds[1].to_string(), "cargo +stable test --workspace");
        assert_eq!(cmds[1].toolchain(), Some("stable"));
    }

    #[test]
    fn test_cross_build_skips_test_step() {
        let cmds = build_test_commands(Path::new("/ws"), "stable", false);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].label, "build");
    }

    #[test]
    fn test_format_workspace_scope() {
        let cmds = format_commands(
            Path::new("/ws"),
            "stable",
            FormatScope::Workspace,
            &[package("core"), package("io")],
        );
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].args.contains(&"--check".to_string()));
        assert!(cmds[0].args.contains(&"--all".to_string()));
    }

    #[test]
    fn test_format_package_scope() {
        let cmds = format_commands(
            Path::new("/ws"),
            "stable",
            FormatScope::Package,
            &[package("core"), package("io")],
        );
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].label, "fmt core");
        assert!(cmds[1].args.contains(&"/ws/io/Cargo.toml".to_string()));
    }

    #[test]
    fn test_msrv_command_pins_version() {
        let cmd = msrv_command(Path::new("/ws"), &package("io"), "1.55".parse().unwrap(), "check");
        assert_eq!(cmd.toolchain(), Some("1.55"));
        assert_eq!(
            cmd.to_string(),
            "cargo +1.55 check --manifest-path /ws/io/Cargo.toml"
        );
    }

    #[test]
    fn test_empty_toolchain_is_unpinned() {
        let cmd = ToolCommand::cargo("fmt", Some(""), &["fmt"], Path::new("."));
        assert_eq!(cmd.toolchain(), None);
        assert_eq!(cmd.to_string(), "cargo fmt");
    }

    #[test]
    fn test_format_scope_from_toml_value() {
        #[derive(Deserialize)]
        struct Wrapper {
            scope: FormatScope,
        }
        let w: Wrapper = toml::from_str("scope = \"package\"").unwrap();
        assert_eq!(w.scope, FormatScope::Package);
    }
}
