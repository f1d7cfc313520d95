//! Package dependency graph and effective minimum-version computation.
//!
//! Models workspace packages as nodes in a directed acyclic graph. An edge
//! `A → B` means "B depends on A".
//!
//! Topological ordering uses Kahn's algorithm; all maps are ordered so the
//! result is deterministic for an unchanged workspace.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{DiscoveryError, Result};
use crate::version::RustVersion;

/// Directed dependency graph over package names.
///
/// Edges are stored as `dependency → dependents` adjacency lists.
/// Cycles are detected at insertion time via DFS.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceGraph {
    nodes: BTreeSet<String>,
    /// `dependency → {dependent, ...}`
    downstream: BTreeMap<String, BTreeSet<String>>,
    /// `dependent → {dependency, ...}`
    upstream: BTreeMap<String, BTreeSet<String>>,
}

impl WorkspaceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package. Idempotent.
    pub fn add_node(&mut self, name: &str) {
        self.nodes.insert(name.to_string());
        self.downstream.entry(name.to_string()).or_default();
        self.upstream.entry(name.to_string()).or_default();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    /// Add an edge: `dependent` depends on `dependency`.
    ///
    /// Returns [`DiscoveryError::DependencyCycle`] if the edge would close a
    /// cycle; the graph is left unchanged in that case.
    pub fn add_dependency(&mut self, dependency: &str, dependent: &str) -> Result<()> {
        for name in [dependency, dependent] {
            if !self.nodes.contains(name) {
                return Err(DiscoveryError::UnknownPackage {
                    name: name.to_string(),
                });
            }
        }

        self.downstream
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
        self.upstream
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());

        if let Some(cycle) = self.find_cycle_through(dependent) {
            // Roll back.
            if let Some(set) = self.downstream.get_mut(dependency) {
                set.remove(dependent);
            }
            if let Some(set) = self.upstream.get_mut(dependent) {
                set.remove(dependency);
            }
            return Err(DiscoveryError::DependencyCycle { packages: cycle });
        }

        Ok(())
    }

    /// Direct in-workspace dependencies of `name`.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<&str>> {
        let deps = self
            .upstream
            .get(name)
            .ok_or_else(|| DiscoveryError::UnknownPackage {
                name: name.to_string(),
            })?;
        Ok(deps.iter().map(String::as_str).collect())
    }

    /// Every package that depends on `name`, directly or transitively.
    pub fn transitive_dependents_of(&self, name: &str) -> Result<BTreeSet<String>> {
        if !self.nodes.contains(name) {
            return Err(DiscoveryError::UnknownPackage {
                name: name.to_string(),
            });
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.downstream.get(&current).into_iter().flatten() {
                if visited.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
        Ok(visited)
    }

    /// Packages in topological order (dependencies before dependents).
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|name| (name.as_str(), self.upstream.get(name).map_or(0, BTreeSet::len)))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&name, _)| name)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(name) = queue.pop_front() {
            sorted.push(name.to_string());
            for dependent in self.downstream.get(name).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .filter(|name| !sorted.contains(name))
                .cloned()
                .collect();
            return Err(DiscoveryError::DependencyCycle { packages: stuck });
        }
        Ok(sorted)
    }

    /// Effective minimum version of every package in one topological pass.
    ///
    /// A package's effective minimum is the maximum of its own declared
    /// minimum, the extra constraints in `external` (external dependency
    /// minimums), and the effective minimums of its in-workspace
    /// dependencies. Each package is computed once and reused by every
    /// dependent.
    pub fn effective_minimums(
        &self,
        declared: &BTreeMap<String, Option<RustVersion>>,
        external: &BTreeMap<String, Vec<RustVersion>>,
    ) -> Result<BTreeMap<String, Option<RustVersion>>> {
        let mut memo: BTreeMap<String, Option<RustVersion>> = BTreeMap::new();

        for name in self.topological_order()? {
            let own = declared.get(&name).copied().flatten();
            let externals = external.get(&name).into_iter().flatten().copied();
            let inherited = self
                .upstream
                .get(&name)
                .into_iter()
                .flatten()
                .filter_map(|dep| memo.get(dep).copied().flatten());

            let effective = own.into_iter().chain(externals).chain(inherited).max();
            memo.insert(name, effective);
        }

        Ok(memo)
    }

    /// DFS from `start` to detect cycles. Returns the cycle path if found.
    fn find_cycle_through(&self, start: &str) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        if self.dfs_cycle(start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_cycle(&self, node: &str, visited: &mut BTreeSet<String>, path: &mut Vec<String>) -> bool {
        if path.iter().any(|p| p == node) {
            path.push(node.to_string());
            return true;
        }
        if !visited.insert(node.to_string()) {
            return false;
        }
        path.push(node.to_string());

        for dependent in self.downstream.get(node).into_iter().flatten() {
            if self.dfs_cycle(dependent, visited, path) {
                return true;
            }
        }

        path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> RustVersion {
        s.parse().unwrap()
    }

    fn chain() -> WorkspaceGraph {
        // app depends on io, io depends on core
        let mut g = WorkspaceGraph::new();
        for name in ["app", "core", "io"] {
            g.add_node(name);
        }
        g.add_dependency("core", "io").unwrap();
        g.add_dependency("io", "app").unwrap();
        g
    }

    #[test]
    fn test_topological_order_respects_deps() {
        let order = chain().topological_order().unwrap();
        assert_eq!(order, vec!["core", "io", "app"]);
    }

    #[test]
    fn test_cycle_rejected_and_rolled_back() {
        let mut g = chain();
        let res = g.add_dependency("app", "core");
        assert!(matches!(res, Err(DiscoveryError::DependencyCycle { .. })));
        assert!(g.topological_order().is_ok());
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut g = WorkspaceGraph::new();
        g.add_node("solo");
        assert!(g.add_dependency("solo", "solo").is_err());
    }

    #[test]
    fn test_unknown_package() {
        let mut g = WorkspaceGraph::new();
        g.add_node("core");
        let res = g.add_dependency("core", "ghost");
        assert!(matches!(res, Err(DiscoveryError::UnknownPackage { .. })));
    }

    #[test]
    fn test_transitive_dependents() {
        let deps = chain().transitive_dependents_of("core").unwrap();
        assert!(deps.contains("io"));
        assert!(deps.contains("app"));
        assert!(!deps.contains("core"));
    }

    #[test]
    fn test_effective_minimum_takes_transitive_max() {
        let g = chain();
        let declared = BTreeMap::from([
            ("core".to_string(), Some(v("1.58"))),
            ("io".to_string(), Some(v("1.55"))),
            ("app".to_string(), None),
        ]);
        let eff = g.effective_minimums(&declared, &BTreeMap::new()).unwrap();
        assert_eq!(eff["core"], Some(v("1.58")));
        assert_eq!(eff["io"], Some(v("1.58")));
        assert_eq!(eff["app"], Some(v("1.58")));
    }

    #[test]
    fn test_effective_minimum_includes_external_constraints() {
        let g = chain();
        let declared = BTreeMap::from([("io".to_string(), Some(v("1.60")))]);
        let external = BTreeMap::from([("core".to_string(), vec![v("1.63")])]);
        let eff = g.effective_minimums(&declared, &external).unwrap();
        assert_eq!(eff["core"], Some(v("1.63")));
        assert_eq!(eff["io"], Some(v("1.63")));
    }

    #[test]
    fn test_no_constraints_anywhere_is_none() {
        let mut g = WorkspaceGraph::new();
        g.add_node("free");
        let eff = g.effective_minimums(&BTreeMap::new(), &BTreeMap::new()).unwrap();
        assert_eq!(eff["free"], None);
    }

    #[test]
    fn test_raising_dependency_never_lowers_dependent() {
        let g = chain();
        for core in ["1.50", "1.60", "1.70", "1.80"] {
            let declared = BTreeMap::from([
                ("core".to_string(), Some(v(core))),
                ("io".to_string(), Some(v("1.65"))),
            ]);
            let eff = g.effective_minimums(&declared, &BTreeMap::new()).unwrap();
            assert!(eff["io"].unwrap() >= v(core));
            assert!(eff["app"].unwrap() >= eff["io"].unwrap());
        }
    }
}
