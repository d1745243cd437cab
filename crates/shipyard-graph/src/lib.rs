//! Dependency graph, cycle detection, and topological ordering.
//!
//! Packages and their declared dependencies form a directed graph where
//! an edge `p -> q` means "p depends on q". This crate owns that graph:
//! building it from a package list, finding strongly connected
//! components with an iterative Tarjan's algorithm (recursion would
//! blow the stack on a pathological monorepo), compressing those
//! components into an acyclic condensation, and producing a
//! dependency-first topological order. Nodes live in an index arena
//! rather than behind `Rc`/`RefCell`, so cyclic dependency graphs never
//! require cyclic ownership.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use shipyard_types::Package;

/// Errors surfaced while building or traversing a package graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate package name in graph input: {0}")]
    DuplicatePackage(String),
    #[error("package {package:?} depends on unknown package {target:?}")]
    UnknownDependencyTarget { package: String, target: String },
    #[error("dependency cycle detected among: {}", .0.iter().map(|c| c.members.join(",")).collect::<Vec<_>>().join(" | "))]
    Cyclic(Vec<Cycle>),
}

/// One strongly connected component with more than one member, or a
/// single package depending on itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Member package names, sorted ascending.
    pub members: Vec<String>,
}

/// A package dependency graph, indexed by arena position rather than by
/// name, so traversal is a matter of following `usize`s.
///
/// Edges run `dependent -> dependency`: `deps[i]` is the set of packages
/// `i` depends on, and `dependents[i]` is the set of packages that
/// depend on `i`. Both are derived once at construction time.
pub struct PackageGraph {
    names: Vec<String>,
    index: BTreeMap<String, usize>,
    deps: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
}

impl PackageGraph {
    /// Builds a graph from a package list. Errors on a duplicate package
    /// name or a dependency target the package list doesn't declare;
    /// self-references and cycles are otherwise permitted (callers that
    /// validated `Config` first will never hit the first two errors, but
    /// this crate doesn't assume that's been done).
    pub fn from_packages(packages: &[Package]) -> Result<Self, GraphError> {
        let mut names = Vec::with_capacity(packages.len());
        let mut index = BTreeMap::new();
        for pkg in packages {
            if index.insert(pkg.name.clone(), names.len()).is_some() {
                return Err(GraphError::DuplicatePackage(pkg.name.clone()));
            }
            names.push(pkg.name.clone());
        }

        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); names.len()];
        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); names.len()];
        for (i, pkg) in packages.iter().enumerate() {
            for dep in &pkg.dependencies {
                let &target = index.get(&dep.target_package).ok_or_else(|| {
                    GraphError::UnknownDependencyTarget {
                        package: pkg.name.clone(),
                        target: dep.target_package.clone(),
                    }
                })?;
                deps[i].insert(target);
                dependents[target].insert(i);
            }
        }

        Ok(PackageGraph {
            names,
            index,
            deps,
            dependents,
        })
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn package_names(&self) -> &[String] {
        &self.names
    }

    fn id_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The packages `name` directly depends on, or `None` if `name` is
    /// not in the graph.
    pub fn dependencies_of(&self, name: &str) -> Option<BTreeSet<&str>> {
        let id = self.id_of(name)?;
        Some(self.deps[id].iter().map(|&i| self.names[i].as_str()).collect())
    }

    /// The packages that directly depend on `name`, or `None` if `name`
    /// is not in the graph.
    pub fn dependents_of(&self, name: &str) -> Option<BTreeSet<&str>> {
        let id = self.id_of(name)?;
        Some(
            self.dependents[id]
                .iter()
                .map(|&i| self.names[i].as_str())
                .collect(),
        )
    }

    /// Every strongly connected component with more than one member, or
    /// exactly one self-dependent member, sorted by their smallest
    /// member name.
    pub fn cycles(&self) -> Vec<Cycle> {
        let components = self.tarjan_scc();
        let mut cycles: Vec<Cycle> = components
            .into_iter()
            .filter_map(|members| {
                let is_cycle = members.len() > 1
                    || (members.len() == 1 && self.deps[members[0]].contains(&members[0]));
                if !is_cycle {
                    return None;
                }
                let mut names: Vec<String> =
                    members.iter().map(|&i| self.names[i].clone()).collect();
                names.sort();
                Some(Cycle { members: names })
            })
            .collect();
        cycles.sort_by(|a, b| a.members.first().cmp(&b.members.first()));
        cycles
    }

    /// A dependency-first order: every package appears after all the
    /// packages it depends on. Fails if the graph has any cycle; use
    /// [`Self::condensation`] first when cycles are expected and should
    /// be unified rather than rejected.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let n = self.names.len();
        let mut remaining: Vec<usize> = (0..n).map(|i| self.deps[i].len()).collect();
        let mut ready: BTreeSet<(String, usize)> = (0..n)
            .filter(|&i| remaining[i] == 0)
            .map(|i| (self.names[i].clone(), i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.iter().next().cloned() {
            ready.remove(&next);
            let (name, id) = next;
            order.push(name);
            for &dependent in &self.dependents[id] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert((self.names[dependent].clone(), dependent));
                }
            }
        }

        if order.len() != n {
            return Err(GraphError::Cyclic(self.cycles()));
        }
        Ok(order)
    }

    /// Compresses strongly connected components into a single acyclic
    /// condensation. Every [`Condensation`] is, by construction, always
    /// topologically sortable.
    pub fn condensation(&self) -> Condensation {
        let components = self.tarjan_scc();

        // Stable meta-node IDs: assign by each component's smallest
        // member name, independent of Tarjan's visitation order.
        let mut by_min_name: Vec<(String, Vec<usize>)> = components
            .into_iter()
            .map(|members| {
                let min_name = members
                    .iter()
                    .map(|&i| self.names[i].clone())
                    .min()
                    .unwrap();
                (min_name, members)
            })
            .collect();
        by_min_name.sort_by(|a, b| a.0.cmp(&b.0));

        let mut member_of: Vec<usize> = vec![0; self.names.len()];
        let mut nodes = Vec::with_capacity(by_min_name.len());
        for (meta_id, (_, members)) in by_min_name.into_iter().enumerate() {
            for &m in &members {
                member_of[m] = meta_id;
            }
            let mut member_names: Vec<String> =
                members.iter().map(|&i| self.names[i].clone()).collect();
            member_names.sort();
            let name = if member_names.len() == 1 {
                member_names[0].clone()
            } else {
                format!("scc_{meta_id}")
            };
            nodes.push(SccNode {
                name,
                members: member_names,
            });
        }

        let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
        for (i, targets) in self.deps.iter().enumerate() {
            for &t in targets {
                let (from, to) = (member_of[i], member_of[t]);
                if from != to {
                    edges.insert((from, to));
                }
            }
        }

        Condensation { nodes, edges }
    }

    /// Iterative Tarjan's SCC algorithm. Returns components as lists of
    /// node indices, each internally unsorted; callers sort as needed.
    fn tarjan_scc(&self) -> Vec<Vec<usize>> {
        let n = self.names.len();
        let mut index: Vec<Option<usize>> = vec![None; n];
        let mut lowlink: Vec<usize> = vec![0; n];
        let mut on_stack: Vec<bool> = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut components: Vec<Vec<usize>> = Vec::new();

        // Explicit work stack replaces recursion: each frame tracks which
        // child-edge index it's resuming from.
        enum Frame {
            Enter(usize),
            Exit(usize),
        }

        for start in 0..n {
            if index[start].is_some() {
                continue;
            }
            let mut work: Vec<Frame> = vec![Frame::Enter(start)];

            while let Some(frame) = work.pop() {
                match frame {
                    Frame::Enter(v) => {
                        if index[v].is_some() {
                            continue;
                        }
                        index[v] = Some(next_index);
                        lowlink[v] = next_index;
                        next_index += 1;
                        stack.push(v);
                        on_stack[v] = true;
                        work.push(Frame::Exit(v));

                        let children: Vec<usize> = self.deps[v].iter().copied().collect();
                        for &w in children.iter().rev() {
                            if index[w].is_none() {
                                work.push(Frame::Enter(w));
                            }
                        }
                    }
                    Frame::Exit(v) => {
                        // Every child has been fully entered (and, if not a
                        // back edge, fully exited) by this point, so either
                        // branch below reads a final value.
                        for &w in &self.deps[v] {
                            if on_stack[w] {
                                lowlink[v] = lowlink[v].min(index[w].unwrap());
                            } else if index[w].is_some() {
                                lowlink[v] = lowlink[v].min(lowlink[w]);
                            }
                        }

                        if lowlink[v] == index[v].unwrap() {
                            let mut component = Vec::new();
                            loop {
                                let w = stack.pop().expect("root of its own SCC is on the stack");
                                on_stack[w] = false;
                                component.push(w);
                                if w == v {
                                    break;
                                }
                            }
                            components.push(component);
                        }
                    }
                }
            }
        }

        components
    }
}

/// One node of a [`Condensation`]: a single package, or a strongly
/// connected component collapsed to one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SccNode {
    /// The package's own name for a singleton; `scc_<id>` for a
    /// multi-member component, where `<id>` is assigned by sorting
    /// components on their smallest member name.
    pub name: String,
    /// Member package names, sorted ascending.
    pub members: Vec<String>,
}

/// The acyclic graph obtained by collapsing every strongly connected
/// component of a [`PackageGraph`] into a single node.
pub struct Condensation {
    pub nodes: Vec<SccNode>,
    edges: BTreeSet<(usize, usize)>,
}

impl Condensation {
    /// A dependency-first order over meta-nodes. Always succeeds: a
    /// condensation is acyclic by construction.
    pub fn topological_order(&self) -> Vec<&SccNode> {
        let n = self.nodes.len();
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for &(from, to) in &self.edges {
            deps[from].insert(to);
            dependents[to].insert(from);
        }

        let mut remaining: Vec<usize> = deps.iter().map(|d| d.len()).collect();
        let mut ready: BTreeSet<(String, usize)> = (0..n)
            .filter(|&i| remaining[i] == 0)
            .map(|i| (self.nodes[i].name.clone(), i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.iter().next().cloned() {
            ready.remove(&next);
            let (_, id) = next;
            order.push(id);
            for &dependent in &dependents[id] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert((self.nodes[dependent].name.clone(), dependent));
                }
            }
        }

        order.into_iter().map(|i| &self.nodes[i]).collect()
    }
}

/// Caches built [`PackageGraph`]s keyed by the SHA-256 of their package
/// list, so repeated calls against an unchanged config reuse the same
/// graph instead of rebuilding and re-running SCC detection. Reads take
/// a shared lock; only a cache miss takes the exclusive one.
pub struct GraphCache {
    inner: RwLock<BTreeMap<String, Arc<PackageGraph>>>,
}

impl Default for GraphCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphCache {
    pub fn new() -> Self {
        GraphCache {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get_or_build(&self, packages: &[Package]) -> Result<Arc<PackageGraph>, GraphError> {
        let key = cache_key(packages);
        if let Some(graph) = self.inner.read().expect("graph cache lock poisoned").get(&key) {
            return Ok(graph.clone());
        }

        let graph = Arc::new(PackageGraph::from_packages(packages)?);
        self.inner
            .write()
            .expect("graph cache lock poisoned")
            .insert(key, graph.clone());
        tracing::debug!(packages = packages.len(), "built and cached package graph");
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("graph cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(packages: &[Package]) -> String {
    let json = serde_json::to_vec(packages).expect("packages always serialize");
    let digest = Sha256::digest(&json);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::Dependency;

    fn pkg(name: &str, deps: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            path: format!("packages/{name}"),
            ecosystem: None,
            version_files: vec![],
            dependencies: deps.iter().map(|d| Dependency::linked(*d)).collect(),
            templates: None,
        }
    }

    #[test]
    fn linear_chain_topological_order() {
        let packages = vec![pkg("api", &["core"]), pkg("core", &[]), pkg("web", &["api"])];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["core", "api", "web"]);
    }

    #[test]
    fn unknown_dependency_target_errors() {
        let packages = vec![pkg("api", &["missing"])];
        let err = PackageGraph::from_packages(&packages).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependencyTarget { .. }));
    }

    #[test]
    fn duplicate_package_name_errors() {
        let packages = vec![pkg("api", &[]), pkg("api", &[])];
        let err = PackageGraph::from_packages(&packages).unwrap_err();
        assert!(matches!(err, GraphError::DuplicatePackage(_)));
    }

    #[test]
    fn two_node_cycle_is_detected() {
        let packages = vec![pkg("a", &["b"]), pkg("b", &["a"])];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let cycles = graph.cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].members, vec!["a".to_string(), "b".to_string()]);
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn self_dependency_is_a_one_node_cycle() {
        let packages = vec![pkg("a", &["a"])];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let cycles = graph.cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].members, vec!["a".to_string()]);
    }

    #[test]
    fn diamond_has_no_cycles_and_valid_order() {
        let packages = vec![
            pkg("app", &["left", "right"]),
            pkg("left", &["core"]),
            pkg("right", &["core"]),
            pkg("core", &[]),
        ];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        assert!(graph.cycles().is_empty());
        let order = graph.topological_order().unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("core") < pos("left"));
        assert!(pos("core") < pos("right"));
        assert!(pos("left") < pos("app"));
        assert!(pos("right") < pos("app"));
    }

    #[test]
    fn condensation_collapses_cycle_into_scc_node_and_stays_acyclic() {
        let packages = vec![
            pkg("a", &["b"]),
            pkg("b", &["a"]),
            pkg("downstream", &["a"]),
        ];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let condensation = graph.condensation();
        assert_eq!(condensation.nodes.len(), 2);

        let scc = condensation
            .nodes
            .iter()
            .find(|n| n.members.len() == 2)
            .unwrap();
        assert_eq!(scc.name, "scc_0");
        assert_eq!(scc.members, vec!["a".to_string(), "b".to_string()]);

        let order = condensation.topological_order();
        let scc_pos = order.iter().position(|n| n.members.len() == 2).unwrap();
        let downstream_pos = order.iter().position(|n| n.name == "downstream").unwrap();
        assert!(scc_pos < downstream_pos);
    }

    #[test]
    fn dependents_of_reverses_dependencies_of() {
        let packages = vec![pkg("api", &["core"]), pkg("core", &[])];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        assert_eq!(
            graph.dependents_of("core").unwrap(),
            BTreeSet::from(["api"])
        );
        assert_eq!(
            graph.dependencies_of("api").unwrap(),
            BTreeSet::from(["core"])
        );
    }

    #[test]
    fn graph_cache_reuses_identical_package_lists() {
        let packages = vec![pkg("api", &[])];
        let cache = GraphCache::new();
        let first = cache.get_or_build(&packages).unwrap();
        let second = cache.get_or_build(&packages).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn graph_cache_distinguishes_different_package_lists() {
        let cache = GraphCache::new();
        cache.get_or_build(&[pkg("api", &[])]).unwrap();
        cache.get_or_build(&[pkg("web", &[])]).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
