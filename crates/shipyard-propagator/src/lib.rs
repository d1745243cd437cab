//! Version bump propagation across dependency edges.
//!
//! Given direct change classes for a subset of packages (from consigned
//! changes) and the package dependency graph, this crate decides which
//! other packages must also bump, and by how much:
//!
//! 1. **Cycle resolution** — every member of a strongly connected
//!    component bumps by the highest direct change class any member
//!    carries; a component with no direct bump gets none of its own.
//! 2. **Linked propagation** — processed in dependency-first order, a
//!    package whose `linked` dependency bumped receives that bump too
//!    (through the edge's `bump_mapping`, if any). A package that
//!    already carries a `direct` or `cycle` bump is never touched here;
//!    among packages that only have a propagated bump so far, a higher
//!    incoming class upgrades it. `fixed` edges block this entirely.
//! 3. **Conflict pass** — a hook for resolving signals that disagree
//!    after propagation; the built-in resolver is a no-op, since nothing
//!    in the current rule set can produce a genuine conflict, but the
//!    seam exists for a future rule to plug into without touching stages
//!    1 and 2.

use std::collections::BTreeMap;

use shipyard_graph::PackageGraph;
use shipyard_semver::{ChangeClass, Version};
use shipyard_types::{BumpSource, Dependency, DependencyStrategy, Package, VersionBump};

/// Errors surfaced while propagating version bumps.
#[derive(Debug, thiserror::Error)]
pub enum PropagatorError {
    #[error("package {0:?} has a pending bump but no known current version")]
    MissingCurrentVersion(String),
    #[error(transparent)]
    Graph(#[from] shipyard_graph::GraphError),
}

/// A package's resolved bump before it's turned into a [`VersionBump`]:
/// the change class applied and where it came from.
type Assigned = BTreeMap<String, (ChangeClass, BumpSource)>;

/// A seam for resolving disagreements left after cycle resolution and
/// linked propagation. The default [`NoopConflictResolver`] changes
/// nothing; a future rule (e.g. an explicit per-package override) can
/// implement this trait without touching the propagation stages.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, assigned: &mut Assigned);
}

/// The default conflict resolver: does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConflictResolver;

impl ConflictResolver for NoopConflictResolver {
    fn resolve(&self, _assigned: &mut Assigned) {}
}

/// Propagates `direct_bumps` across `graph`, using `conflict_resolver`
/// for the final pass, and returns one [`VersionBump`] per package that
/// ends up bumping (packages untouched by any stage are omitted).
pub fn propagate(
    graph: &PackageGraph,
    packages: &[Package],
    direct_bumps: &BTreeMap<String, ChangeClass>,
    current_versions: &BTreeMap<String, Version>,
    conflict_resolver: &dyn ConflictResolver,
) -> Result<Vec<VersionBump>, PropagatorError> {
    let by_name: BTreeMap<&str, &Package> =
        packages.iter().map(|p| (p.name.as_str(), p)).collect();

    let mut assigned: Assigned = direct_bumps
        .iter()
        .map(|(pkg, class)| (pkg.clone(), (*class, BumpSource::Direct)))
        .collect();

    resolve_cycles(graph, &mut assigned);
    propagate_linked(graph, &by_name, &mut assigned);
    conflict_resolver.resolve(&mut assigned);

    let mut bumps = Vec::with_capacity(assigned.len());
    for (package, (class, source)) in assigned {
        let old_version = current_versions
            .get(&package)
            .cloned()
            .ok_or_else(|| PropagatorError::MissingCurrentVersion(package.clone()))?;
        let new_version = old_version.bump(class);
        tracing::debug!(%package, %class, ?source, "resolved version bump");
        bumps.push(VersionBump {
            package,
            old_version,
            new_version,
            change_type: class,
            source,
        });
    }
    bumps.sort_by(|a, b| a.package.cmp(&b.package));
    Ok(bumps)
}

/// Convenience wrapper over [`propagate`] using [`NoopConflictResolver`].
pub fn propagate_default(
    graph: &PackageGraph,
    packages: &[Package],
    direct_bumps: &BTreeMap<String, ChangeClass>,
    current_versions: &BTreeMap<String, Version>,
) -> Result<Vec<VersionBump>, PropagatorError> {
    propagate(
        graph,
        packages,
        direct_bumps,
        current_versions,
        &NoopConflictResolver,
    )
}

/// Stage 1: every member of a strongly connected component bumps by the
/// highest change class any member already carries. A member whose own
/// direct bump already equals that consensus keeps its `Direct` source;
/// every other member is recorded as `Cycle`.
fn resolve_cycles(graph: &PackageGraph, assigned: &mut Assigned) {
    for cycle in graph.cycles() {
        let highest = cycle
            .members
            .iter()
            .filter_map(|m| assigned.get(m).map(|(c, _)| *c))
            .reduce(ChangeClass::max);
        let Some(highest) = highest else {
            continue;
        };
        for member in &cycle.members {
            let keep_direct = matches!(
                assigned.get(member),
                Some((c, BumpSource::Direct)) if *c >= highest
            );
            if !keep_direct {
                assigned.insert(member.clone(), (highest, BumpSource::Cycle));
            }
        }
    }
}

/// Stage 2: walk the condensation in dependency-first order so every
/// package's dependencies are already resolved before it is, and pull in
/// bumps across `linked` edges, mapped through `bump_mapping`. A package
/// with a `Direct` or `Cycle` bump already recorded never gets
/// overwritten here — direct wins over propagated, unconditionally;
/// among `Propagated` entries, only a strictly higher incoming class
/// upgrades the one already recorded.
fn propagate_linked(graph: &PackageGraph, by_name: &BTreeMap<&str, &Package>, assigned: &mut Assigned) {
    let condensation = graph.condensation();
    for node in condensation.topological_order() {
        for member in &node.members {
            let Some(pkg) = by_name.get(member.as_str()) else {
                continue;
            };
            let incoming = incoming_linked_bump(&pkg.dependencies, assigned);
            let Some(incoming) = incoming else { continue };

            let upgrade = match assigned.get(member) {
                Some((_, BumpSource::Direct | BumpSource::Cycle)) => false,
                Some((existing, BumpSource::Propagated)) => incoming > *existing,
                None => true,
            };
            if upgrade {
                assigned.insert(member.clone(), (incoming, BumpSource::Propagated));
            }
        }
    }
}

fn incoming_linked_bump(dependencies: &[Dependency], assigned: &Assigned) -> Option<ChangeClass> {
    dependencies
        .iter()
        .filter(|dep| dep.strategy == DependencyStrategy::Linked)
        .filter_map(|dep| {
            assigned
                .get(&dep.target_package)
                .map(|(class, _)| dep.map_incoming(*class))
        })
        .reduce(ChangeClass::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::Dependency;

    fn pkg(name: &str, deps: Vec<Dependency>) -> Package {
        Package {
            name: name.to_string(),
            path: format!("packages/{name}"),
            ecosystem: None,
            version_files: vec![],
            dependencies: deps,
            templates: None,
        }
    }

    fn versions(pairs: &[(&str, &str)]) -> BTreeMap<String, Version> {
        pairs
            .iter()
            .map(|(name, v)| (name.to_string(), Version::parse(v).unwrap()))
            .collect()
    }

    #[test]
    fn linear_chain_propagates_through_two_linked_edges() {
        let packages = vec![
            pkg("web", vec![Dependency::linked("api")]),
            pkg("api", vec![Dependency::linked("core")]),
            pkg("core", vec![]),
        ];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let direct = BTreeMap::from([("core".to_string(), ChangeClass::Major)]);
        let current = versions(&[("core", "1.0.0"), ("api", "2.0.0"), ("web", "3.0.0")]);

        let bumps = propagate_default(&graph, &packages, &direct, &current).unwrap();
        let by_name: BTreeMap<&str, &VersionBump> =
            bumps.iter().map(|b| (b.package.as_str(), b)).collect();

        assert_eq!(by_name["core"].source, BumpSource::Direct);
        assert_eq!(by_name["api"].source, BumpSource::Propagated);
        assert_eq!(by_name["api"].change_type, ChangeClass::Major);
        assert_eq!(by_name["web"].change_type, ChangeClass::Major);
    }

    #[test]
    fn fixed_edge_blocks_transitive_propagation() {
        let packages = vec![
            pkg("web", vec![Dependency {
                target_package: "api".into(),
                strategy: DependencyStrategy::Fixed,
                bump_mapping: None,
            }]),
            pkg("api", vec![Dependency::linked("core")]),
            pkg("core", vec![]),
        ];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let direct = BTreeMap::from([("core".to_string(), ChangeClass::Major)]);
        let current = versions(&[("core", "1.0.0"), ("api", "2.0.0"), ("web", "3.0.0")]);

        let bumps = propagate_default(&graph, &packages, &direct, &current).unwrap();
        let touched: Vec<&str> = bumps.iter().map(|b| b.package.as_str()).collect();
        assert!(touched.contains(&"api"));
        assert!(!touched.contains(&"web"));
    }

    #[test]
    fn diamond_takes_the_higher_of_two_incoming_bumps() {
        let packages = vec![
            pkg(
                "app",
                vec![Dependency::linked("left"), Dependency::linked("right")],
            ),
            pkg("left", vec![Dependency::linked("core")]),
            pkg("right", vec![Dependency::linked("core")]),
            pkg("core", vec![]),
        ];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let direct = BTreeMap::from([
            ("core".to_string(), ChangeClass::Patch),
            ("right".to_string(), ChangeClass::Major),
        ]);
        let current = versions(&[
            ("core", "1.0.0"),
            ("left", "1.0.0"),
            ("right", "1.0.0"),
            ("app", "1.0.0"),
        ]);

        let bumps = propagate_default(&graph, &packages, &direct, &current).unwrap();
        let by_name: BTreeMap<&str, &VersionBump> =
            bumps.iter().map(|b| (b.package.as_str(), b)).collect();
        assert_eq!(by_name["app"].change_type, ChangeClass::Major);
    }

    #[test]
    fn two_node_cycle_unifies_to_the_higher_direct_bump() {
        let packages = vec![
            pkg("a", vec![Dependency::linked("b")]),
            pkg("b", vec![Dependency::linked("a")]),
        ];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let direct = BTreeMap::from([("a".to_string(), ChangeClass::Patch)]);
        let current = versions(&[("a", "1.0.0"), ("b", "1.0.0")]);

        let bumps = propagate_default(&graph, &packages, &direct, &current).unwrap();
        let by_name: BTreeMap<&str, &VersionBump> =
            bumps.iter().map(|b| (b.package.as_str(), b)).collect();
        assert_eq!(by_name["a"].source, BumpSource::Direct);
        assert_eq!(by_name["b"].source, BumpSource::Cycle);
        assert_eq!(by_name["b"].change_type, ChangeClass::Patch);
    }

    #[test]
    fn bump_mapping_downgrades_the_propagated_class() {
        let mut mapping = BTreeMap::new();
        mapping.insert(ChangeClass::Major, ChangeClass::Patch);
        let packages = vec![
            pkg(
                "web",
                vec![Dependency {
                    target_package: "core".into(),
                    strategy: DependencyStrategy::Linked,
                    bump_mapping: Some(mapping),
                }],
            ),
            pkg("core", vec![]),
        ];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let direct = BTreeMap::from([("core".to_string(), ChangeClass::Major)]);
        let current = versions(&[("core", "1.0.0"), ("web", "1.0.0")]);

        let bumps = propagate_default(&graph, &packages, &direct, &current).unwrap();
        let web = bumps.iter().find(|b| b.package == "web").unwrap();
        assert_eq!(web.change_type, ChangeClass::Patch);
    }

    #[test]
    fn untouched_packages_are_omitted_from_output() {
        let packages = vec![pkg("isolated", vec![]), pkg("core", vec![])];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let direct = BTreeMap::from([("core".to_string(), ChangeClass::Patch)]);
        let current = versions(&[("core", "1.0.0"), ("isolated", "1.0.0")]);

        let bumps = propagate_default(&graph, &packages, &direct, &current).unwrap();
        assert_eq!(bumps.len(), 1);
        assert_eq!(bumps[0].package, "core");
    }

    #[test]
    fn direct_bump_is_never_overwritten_by_a_higher_incoming_linked_bump() {
        let packages = vec![
            pkg("right", vec![Dependency::linked("core")]),
            pkg("core", vec![]),
        ];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let direct = BTreeMap::from([
            ("right".to_string(), ChangeClass::Patch),
            ("core".to_string(), ChangeClass::Major),
        ]);
        let current = versions(&[("core", "1.0.0"), ("right", "1.0.0")]);

        let bumps = propagate_default(&graph, &packages, &direct, &current).unwrap();
        let right = bumps.iter().find(|b| b.package == "right").unwrap();
        assert_eq!(right.source, BumpSource::Direct);
        assert_eq!(right.change_type, ChangeClass::Patch);
    }

    #[test]
    fn missing_current_version_is_an_error() {
        let packages = vec![pkg("core", vec![])];
        let graph = PackageGraph::from_packages(&packages).unwrap();
        let direct = BTreeMap::from([("core".to_string(), ChangeClass::Patch)]);
        let err = propagate_default(&graph, &packages, &direct, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, PropagatorError::MissingCurrentVersion(p) if p == "core"));
    }
}
