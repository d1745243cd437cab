//! Facade over the shipyard core's release pipeline.
//!
//! This crate wires the leaf components together into the data flow
//! described by the system overview: consignments gathered from the
//! store, combined with the config's dependency graph, decide a
//! per-package bump (the propagator); that bump plus the consignments
//! that produced it become a changelog entry, a tag, and a history
//! record. Every other crate in the workspace can be used standalone;
//! this one exists purely for callers (a CLI, a CI job) that want the
//! whole pipeline without assembling it themselves.
//!
//! The facade never touches `std::fs`, `Utc::now()`, or a global RNG
//! directly — it's driven entirely by the injected [`FileSystem`],
//! [`ClockSource`], and [`RandomSource`], matching every leaf crate's
//! collaborator-injection style.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use shipyard_changelog::{ChangelogError, PackageRelease, Release, Tag};
use shipyard_config::Config;
use shipyard_fs::FileSystem;
use shipyard_graph::{GraphCache, GraphError};
use shipyard_history::{HistoryError, HistoryLog};
use shipyard_metadata::{MetadataError, PatternCache};
use shipyard_propagator::PropagatorError;
use shipyard_semver::{ChangeClass, Version};
use shipyard_store::{grouping, ConsignmentStore, ReadAllOutcome, StoreError};
use shipyard_template::TemplateRenderer;
use shipyard_types::{
    ClockSource, Consignment, HistoryConsignmentRef, HistoryEntry, Metadata, RandomSource,
    TemplateSource, VersionBump,
};

pub use shipyard_changelog::TagProtocolError;
pub use shipyard_config::{ConfigError, ConfigValidationError};

/// One umbrella error type wrapping every leaf component's error, so a
/// caller that doesn't need to match on a specific kind can propagate a
/// single type with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ShipyardError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Propagation(#[from] PropagatorError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Changelog(#[from] ChangelogError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("{count} metadata violations found")]
    MetadataViolations {
        count: usize,
        violations: Vec<MetadataError>,
    },
    #[error("package {0:?} is named by a consignment but is not declared in the config")]
    UnknownPackage(String),
}

/// A fully resolved release: the bump the propagator assigned to each
/// package, paired with the consignments that produced it.
#[derive(Debug, Default)]
pub struct ReleasePlan {
    pub bumps: Vec<VersionBump>,
    pub releases: BTreeMap<String, PackageRelease>,
    /// Consignments that were read but touch no package receiving a
    /// bump (e.g. a package absent from `current_versions`); kept so
    /// callers can surface them rather than silently dropping them.
    pub consignments: Vec<Consignment>,
    pub parse_errors: Vec<(PathBuf, StoreError)>,
}

/// One rendered package release: the changelog text and resolved tag.
#[derive(Debug, Clone)]
pub struct RenderedRelease {
    pub package: String,
    pub changelog: String,
    pub tag: Tag,
}

/// The shipyard core's release pipeline, parameterized over its
/// collaborators (config, filesystem, clock, randomness).
pub struct Shipyard<'a> {
    config: &'a Config,
    fs: &'a dyn FileSystem,
    clock: Arc<dyn ClockSource>,
    random: &'a dyn RandomSource,
    renderer: TemplateRenderer,
    graph_cache: GraphCache,
    patterns: PatternCache,
}

impl<'a> Shipyard<'a> {
    pub fn new(
        config: &'a Config,
        fs: &'a dyn FileSystem,
        clock: Arc<dyn ClockSource>,
        random: &'a dyn RandomSource,
    ) -> Self {
        let renderer = TemplateRenderer::new(clock.clone());
        Shipyard {
            config,
            fs,
            clock,
            random,
            renderer,
            graph_cache: GraphCache::new(),
            patterns: PatternCache::new(),
        }
    }

    fn store(&self) -> ConsignmentStore<'_> {
        ConsignmentStore::new(self.fs)
    }

    /// Records a new consignment, validating its metadata against the
    /// configured schema and writing it to the consignment store.
    pub fn create_consignment(
        &self,
        packages: Vec<String>,
        change_type: ChangeClass,
        summary: String,
        raw_metadata: Metadata,
    ) -> Result<Consignment, ShipyardError> {
        for pkg in &packages {
            if self.config.package(pkg).is_none() {
                return Err(ShipyardError::UnknownPackage(pkg.clone()));
            }
        }

        let metadata = shipyard_metadata::validate_all(
            self.config.metadata_fields(),
            &raw_metadata,
            &self.patterns,
        )
        .map_err(|violations| ShipyardError::MetadataViolations {
            count: violations.len(),
            violations,
        })?;

        let id = shipyard_store::generate_id(self.clock.as_ref(), self.random);
        let consignment = Consignment {
            id,
            timestamp: self.clock.now(),
            packages,
            change_type,
            summary,
            metadata,
        };

        self.store()
            .write(&consignment, self.consignments_dir())?;
        Ok(consignment)
    }

    fn consignments_dir(&self) -> &std::path::Path {
        std::path::Path::new(self.config.consignments_path())
    }

    fn history_path(&self) -> std::path::PathBuf {
        PathBuf::from(self.config.history_path())
    }

    /// Reads every pending consignment; per-file parse failures are
    /// reported, not propagated.
    pub fn pending_consignments(&self) -> Result<ReadAllOutcome, ShipyardError> {
        Ok(self.store().read_all(self.consignments_dir())?)
    }

    /// Builds a [`ReleasePlan`]: reads pending consignments, derives a
    /// direct bump per package (the highest change class among its
    /// consignments), and propagates across the dependency graph.
    /// Every named package must have a current version or the whole
    /// pass aborts; propagation is all-or-nothing.
    pub fn plan(
        &self,
        current_versions: &BTreeMap<String, Version>,
    ) -> Result<ReleasePlan, ShipyardError> {
        let outcome = self.pending_consignments()?;
        let direct_bumps = direct_bumps_per_package(&outcome.consignments);

        let graph = self
            .graph_cache
            .get_or_build(self.config.packages())?;
        let bumps = shipyard_propagator::propagate_default(
            &graph,
            self.config.packages(),
            &direct_bumps,
            current_versions,
        )?;

        let by_package = grouping::group_by_package(&outcome.consignments);
        let mut releases = BTreeMap::new();
        for bump in &bumps {
            let consignments = by_package.get(&bump.package).cloned().unwrap_or_default();
            let path = self
                .config
                .package(&bump.package)
                .map(|p| p.path.clone())
                .unwrap_or_else(|| ".".to_string());
            releases.insert(
                bump.package.clone(),
                PackageRelease {
                    package: bump.package.clone(),
                    path,
                    bump: bump.clone(),
                    consignments,
                },
            );
        }

        Ok(ReleasePlan {
            bumps,
            releases,
            consignments: outcome.consignments,
            parse_errors: outcome.errors,
        })
    }

    /// Renders the changelog and tag for one package's release, using
    /// the package's own template override if set, falling back to the
    /// config-level default.
    pub fn render_release(
        &self,
        release: &PackageRelease,
    ) -> Result<RenderedRelease, ShipyardError> {
        let base_dir = std::path::Path::new(".");
        let package = self
            .config
            .package(&release.package)
            .ok_or_else(|| ShipyardError::UnknownPackage(release.package.clone()))?;

        let changelog_source = package
            .templates
            .as_ref()
            .and_then(|t| t.changelog.clone())
            .or_else(|| self.config.templates().changelog.clone())
            .unwrap_or_else(|| TemplateSource::Builtin("default".to_string()));
        let tag_source = package
            .templates
            .as_ref()
            .and_then(|t| t.tag_name.clone())
            .or_else(|| self.config.templates().tag_name.clone())
            .unwrap_or_else(|| TemplateSource::Builtin("default-tag".to_string()));

        let changelog = shipyard_changelog::render_changelog(
            &self.renderer,
            self.fs,
            base_dir,
            &changelog_source,
            release,
        )?;
        let tag = shipyard_changelog::render_tag(
            &self.renderer,
            self.fs,
            base_dir,
            &tag_source,
            release,
        )?;

        Ok(RenderedRelease {
            package: release.package.clone(),
            changelog,
            tag,
        })
    }

    /// Renders the release-wide tag shared across every bumping package
    /// in `plan`, using the configured `templates.releaseTag` override
    /// or falling back to the `versions` builtin. The release-wide
    /// metadata bag is the union of every included consignment's
    /// metadata, later packages (in package-name order) overwriting
    /// earlier ones on key collision.
    pub fn render_release_tag(&self, plan: &ReleasePlan) -> Result<Tag, ShipyardError> {
        let release = Release {
            releases: plan.releases.values().cloned().collect(),
            date: self.clock.now(),
            metadata: aggregate_metadata(&plan.releases),
        };
        let source = self
            .config
            .templates()
            .release_tag
            .clone()
            .unwrap_or_else(|| TemplateSource::Builtin("versions".to_string()));

        Ok(shipyard_changelog::render_release_tag(
            &self.renderer,
            self.fs,
            std::path::Path::new("."),
            &source,
            &release,
        )?)
    }

    /// Finalizes a release: appends one history entry per bumped
    /// package and deletes the consignments that produced it. Consumed
    /// consignments that touch more than one released package are only
    /// deleted once all their packages have been recorded.
    pub fn finalize(
        &self,
        plan: &ReleasePlan,
        rendered: &BTreeMap<String, RenderedRelease>,
    ) -> Result<(), ShipyardError> {
        let history = HistoryLog::new(self.fs, self.history_path());
        let now = self.clock.now();

        let mut entries = Vec::with_capacity(plan.bumps.len());
        for bump in &plan.bumps {
            let Some(release) = plan.releases.get(&bump.package) else {
                continue;
            };
            let Some(render) = rendered.get(&bump.package) else {
                continue;
            };
            entries.push(HistoryEntry {
                version: bump.new_version.clone(),
                package: bump.package.clone(),
                tag: render.tag.name().to_string(),
                timestamp: now,
                consignments: release
                    .consignments
                    .iter()
                    .map(|c| HistoryConsignmentRef {
                        id: c.id.clone(),
                        summary: c.summary.clone(),
                        change_type: c.change_type,
                    })
                    .collect(),
            });
        }
        history.append_many(&entries)?;

        let released_ids: std::collections::BTreeSet<&str> = plan
            .bumps
            .iter()
            .filter_map(|b| plan.releases.get(&b.package))
            .flat_map(|r| r.consignments.iter().map(|c| c.id.as_str()))
            .collect();
        let to_delete: Vec<PathBuf> = plan
            .consignments
            .iter()
            .filter(|c| released_ids.contains(c.id.as_str()))
            .map(|c| self.consignments_dir().join(format!("{}.md", c.id)))
            .collect();
        self.store().delete_many(&to_delete)?;

        Ok(())
    }
}

/// The highest change class among each package's touching consignments,
/// grouped per package.
fn direct_bumps_per_package(consignments: &[Consignment]) -> BTreeMap<String, ChangeClass> {
    grouping::group_by_package(consignments)
        .into_iter()
        .map(|(pkg, cs)| (pkg, grouping::highest_change_type(&cs)))
        .collect()
}

/// The union of every released package's consignments' metadata, in
/// package-name order; a key present on more than one consignment keeps
/// whichever value is encountered last.
fn aggregate_metadata(releases: &BTreeMap<String, PackageRelease>) -> Metadata {
    let mut merged = Metadata::new();
    for release in releases.values() {
        for consignment in &release.consignments {
            merged.extend(consignment.metadata.clone());
        }
    }
    merged
}
