//! Changelog and tag rendering, and the tag protocol.
//!
//! This crate composes the template context for a single package's
//! release (its version bump plus the consignments that produced it)
//! and renders changelog entries, tag names, release notes, and commit
//! messages through [`shipyard_template`]. [`Release`] does the same
//! for a tag shared across every package in a release at once. It also
//! owns the tag protocol: a rendered tag template's output is a
//! lightweight tag if it's one line, or an annotated tag if a second,
//! blank line separates the tag name from an annotation message.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use minijinja::{context, Value};

use shipyard_fs::FileSystem;
use shipyard_semver::ChangeClass;
use shipyard_template::{TemplateError, TemplateRenderer};
use shipyard_types::{Consignment, Metadata, TemplateSource, VersionBump};

/// Errors surfaced while rendering changelog, tag, or release-note
/// output.
#[derive(Debug, thiserror::Error)]
pub enum ChangelogError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    TagProtocol(#[from] TagProtocolError),
}

/// One package's resolved release: the bump the propagator assigned,
/// plus the consignments that produced it, sorted oldest first.
#[derive(Debug, Clone)]
pub struct PackageRelease {
    pub package: String,
    /// The package's configured path, used by path-prefixed tag
    /// builtins (e.g. `go`) to distinguish a monorepo member from a
    /// root package (`path == "."`).
    pub path: String,
    pub bump: VersionBump,
    pub consignments: Vec<Consignment>,
}

impl PackageRelease {
    /// The template context shared by changelog, tag, release-note, and
    /// commit-message rendering: package name, path, old/new version,
    /// change type, and the consignment list.
    pub fn context(&self) -> Value {
        let consignments: Vec<Value> = self
            .consignments
            .iter()
            .map(|c| {
                context! {
                    id => c.id,
                    summary => c.summary,
                    change_type => c.change_type.as_str(),
                }
            })
            .collect();
        context! {
            package => self.package,
            path => self.path,
            version => self.bump.new_version.to_string(),
            previous_version => self.bump.old_version.to_string(),
            change_type => self.bump.change_type.as_str(),
            consignments => consignments,
        }
    }
}

/// Renders a package's changelog entry.
pub fn render_changelog(
    renderer: &TemplateRenderer,
    fs: &dyn FileSystem,
    base_dir: &Path,
    source: &TemplateSource,
    release: &PackageRelease,
) -> Result<String, ChangelogError> {
    Ok(renderer.render(source, fs, base_dir, release.context())?)
}

/// Renders a package's release notes.
pub fn render_release_notes(
    renderer: &TemplateRenderer,
    fs: &dyn FileSystem,
    base_dir: &Path,
    source: &TemplateSource,
    release: &PackageRelease,
) -> Result<String, ChangelogError> {
    Ok(renderer.render(source, fs, base_dir, release.context())?)
}

/// Renders a package's release commit message.
pub fn render_commit_message(
    renderer: &TemplateRenderer,
    fs: &dyn FileSystem,
    base_dir: &Path,
    source: &TemplateSource,
    release: &PackageRelease,
) -> Result<String, ChangelogError> {
    Ok(renderer.render(source, fs, base_dir, release.context())?)
}

/// Renders a package's tag template, then parses its output through the
/// tag protocol.
pub fn render_tag(
    renderer: &TemplateRenderer,
    fs: &dyn FileSystem,
    base_dir: &Path,
    source: &TemplateSource,
    release: &PackageRelease,
) -> Result<Tag, ChangelogError> {
    let rendered = renderer.render(source, fs, base_dir, release.context())?;
    Ok(parse_tag_protocol(&rendered)?)
}

/// The whole-release context: every package's bump, combined into the
/// context for a single tag shared across a release instead of one tag
/// per package. Composition mirrors [`PackageRelease::context`] — same
/// fields, widened from one package to all of them.
#[derive(Debug, Clone)]
pub struct Release {
    pub releases: Vec<PackageRelease>,
    pub date: DateTime<Utc>,
    pub metadata: Metadata,
}

impl Release {
    /// `{packages: [{name, path, version}], versions: name->version,
    /// consignments: [...] (every package's, concatenated), date,
    /// metadata}`.
    pub fn context(&self) -> Value {
        let packages: Vec<Value> = self
            .releases
            .iter()
            .map(|r| {
                context! {
                    name => r.package,
                    path => r.path,
                    version => r.bump.new_version.to_string(),
                }
            })
            .collect();
        let versions: BTreeMap<&str, String> = self
            .releases
            .iter()
            .map(|r| (r.package.as_str(), r.bump.new_version.to_string()))
            .collect();
        let consignments: Vec<Value> = self
            .releases
            .iter()
            .flat_map(|r| &r.consignments)
            .map(|c| {
                context! {
                    id => c.id,
                    summary => c.summary,
                    change_type => c.change_type.as_str(),
                }
            })
            .collect();
        context! {
            packages => packages,
            versions => Value::from_serialize(&versions),
            consignments => consignments,
            date => self.date.format("%Y-%m-%d").to_string(),
            metadata => Value::from_serialize(&self.metadata),
        }
    }
}

/// Renders the release-wide tag template — the `versions`/`release-date`
/// builtins, or a configured override — against every package in
/// `release`, then parses the output through the same tag protocol as
/// [`render_tag`].
pub fn render_release_tag(
    renderer: &TemplateRenderer,
    fs: &dyn FileSystem,
    base_dir: &Path,
    source: &TemplateSource,
    release: &Release,
) -> Result<Tag, ChangelogError> {
    let rendered = renderer.render(source, fs, base_dir, release.context())?;
    Ok(parse_tag_protocol(&rendered)?)
}

/// Renders changelog entries for every release in `releases`, keyed by
/// package name. A failure on one package doesn't stop the others; all
/// failures are returned together.
pub fn render_batch(
    renderer: &TemplateRenderer,
    fs: &dyn FileSystem,
    base_dir: &Path,
    releases: &[(PackageRelease, TemplateSource)],
) -> (Vec<(String, String)>, Vec<(String, ChangelogError)>) {
    let mut rendered = Vec::new();
    let mut errors = Vec::new();
    for (release, source) in releases {
        match render_changelog(renderer, fs, base_dir, source, release) {
            Ok(text) => rendered.push((release.package.clone(), text)),
            Err(e) => {
                tracing::warn!(package = %release.package, error = %e, "changelog rendering failed");
                errors.push((release.package.clone(), e));
            }
        }
    }
    (rendered, errors)
}

/// A git tag resolved from a rendered tag template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// A plain `git tag <name>`.
    Lightweight { name: String },
    /// A `git tag -a <name> -m <message>`.
    Annotated { name: String, message: String },
}

impl Tag {
    pub fn name(&self) -> &str {
        match self {
            Tag::Lightweight { name } | Tag::Annotated { name, .. } => name,
        }
    }
}

/// Errors surfaced while parsing a rendered tag template's output.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TagProtocolError {
    #[error("rendered tag template produced no output")]
    Empty,
    #[error("rendered tag template has a second line that isn't blank; expected a blank line separating the tag name from its annotation message")]
    MissingBlankSeparator,
}

/// Parses a rendered tag template's output: a single line is a
/// lightweight tag; a first line, a blank line, then one or more
/// message lines is an annotated tag.
pub fn parse_tag_protocol(rendered: &str) -> Result<Tag, TagProtocolError> {
    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        return Err(TagProtocolError::Empty);
    }

    let mut lines = trimmed.split('\n');
    let name = lines.next().unwrap().to_string();
    let rest: Vec<&str> = lines.collect();

    if rest.is_empty() {
        return Ok(Tag::Lightweight { name });
    }

    if !rest[0].is_empty() {
        return Err(TagProtocolError::MissingBlankSeparator);
    }

    let message = rest[1..].join("\n");
    Ok(Tag::Annotated { name, message })
}

/// The change type most prominently represented in `consignments`, used
/// to choose which consignment to lead a release's summary with when a
/// caller wants a single headline entry.
pub fn headline_change_type(release: &PackageRelease) -> ChangeClass {
    release.bump.change_type
}
