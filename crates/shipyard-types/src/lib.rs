//! Shared domain types for the shipyard core.
//!
//! This crate holds the data model every other component agrees on:
//! [`Package`] and [`Dependency`] (the config-level description of a
//! monorepo's packages), [`Consignment`] (a pending change record),
//! [`VersionBump`] (the propagator's output), [`HistoryEntry`] (the
//! durable release record), and the heterogeneous [`MetadataValue`].
//!
//! It also defines the two ambient collaborator traits the core is driven
//! by: [`ClockSource`] (for UTC "now") and [`RandomSource`] (for
//! consignment ID suffixes). Neither crosses I/O boundaries on its own —
//! they exist purely so callers can inject determinism in tests.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shipyard_semver::{ChangeClass, Version};

/// A source of the current time, injected rather than read from
/// `Utc::now()` directly so consignment IDs and rendered dates are
/// deterministic under test.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A source of randomness, injected so consignment ID generation is
/// reproducible under test. `random_alphanumeric` must draw uniformly
/// from `[a-z0-9]`.
pub trait RandomSource: Send + Sync {
    fn random_alphanumeric(&self, len: usize) -> String;
}

/// The real system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn random_alphanumeric(&self, len: usize) -> String {
        use rand::Rng;
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::rng();
        (0..len)
            .map(|_| {
                let idx = rng.random_range(0..ALPHABET.len());
                ALPHABET[idx] as char
            })
            .collect()
    }
}

/// A heterogeneous, stably-ordered value for consignment metadata.
///
/// Modeled as a tagged variant rather than `serde_json::Value` or
/// `toml::Value` so the set of representable shapes stays closed and
/// deliberate (design note: heterogeneous metadata values). `Map` uses a
/// [`BTreeMap`] rather than a hash map so re-serialization is
/// byte-identical across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// The value as a string, if it holds one. Used by
    /// `groupByMetadataField`, which only string-valued fields populate.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::List(items) => {
                let joined: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", joined.join(", "))
            }
            MetadataValue::Map(map) => {
                let joined: Vec<String> =
                    map.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", joined.join(", "))
            }
        }
    }
}

/// A flat, string-keyed metadata bag. Both consignments and config-driven
/// metadata validation operate on this shape.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// How a dependency edge participates in version propagation.
///
/// Unknown strategies (e.g. a typo in config) deserialize to
/// [`DependencyStrategy::Fixed`] via [`DependencyStrategy::from_raw`],
/// so an unrecognized strategy blocks propagation rather than silently
/// defaulting to `linked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStrategy {
    Linked,
    Fixed,
}

impl<'de> Deserialize<'de> for DependencyStrategy {
    // Unlike a derived impl, an unrecognized string does not fail to
    // deserialize: it becomes `Fixed`.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(DependencyStrategy::from_raw(Some(&raw)))
    }
}

impl DependencyStrategy {
    /// An empty/absent strategy string becomes `linked` (the config-level
    /// default); anything else that isn't `"linked"` or `"fixed"` becomes
    /// `fixed`, so it blocks propagation rather than assuming intent.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            None | Some("") => DependencyStrategy::Linked,
            Some("linked") => DependencyStrategy::Linked,
            Some("fixed") => DependencyStrategy::Fixed,
            Some(_) => DependencyStrategy::Fixed,
        }
    }
}

impl Default for DependencyStrategy {
    fn default() -> Self {
        DependencyStrategy::Linked
    }
}

/// A declared dependency from one package onto another.
///
/// Edge direction, throughout the core, is dependent → dependency: a
/// `Dependency` living on package `p` targeting package `q` means "p
/// depends on q", and `q`'s bumps propagate to `p` when `strategy` is
/// [`DependencyStrategy::Linked`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub target_package: String,
    #[serde(default)]
    pub strategy: DependencyStrategy,
    /// Per-edge override converting an incoming change class to another
    /// when propagating to the dependent. Absent means pass-through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bump_mapping: Option<BTreeMap<ChangeClass, ChangeClass>>,
}

impl Dependency {
    pub fn linked(target_package: impl Into<String>) -> Self {
        Dependency {
            target_package: target_package.into(),
            strategy: DependencyStrategy::Linked,
            bump_mapping: None,
        }
    }

    /// Maps an incoming change class through `bump_mapping`, passing it
    /// through unchanged if the mapping is absent or doesn't cover it.
    pub fn map_incoming(&self, incoming: ChangeClass) -> ChangeClass {
        self.bump_mapping
            .as_ref()
            .and_then(|m| m.get(&incoming).copied())
            .unwrap_or(incoming)
    }
}

/// Marker for package version files that indicates the package's
/// authoritative version lives in the git tag, not a manifest on disk.
pub const TAG_ONLY: &str = "tag-only";

/// A single package known to the monorepo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecosystem: Option<String>,
    #[serde(default)]
    pub version_files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<PackageTemplates>,
}

impl Package {
    /// True if this package's authoritative version is the git tag rather
    /// than any manifest file.
    pub fn is_tag_only(&self) -> bool {
        self.version_files.iter().any(|f| f == TAG_ONLY)
    }
}

/// Per-package template source overrides, layered over the config-level
/// defaults in `templates.{changelog,tag_name,release_notes,commit_message}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackageTemplates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<TemplateSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<TemplateSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<TemplateSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<TemplateSource>,
}

/// A parsed `builtin:<name>` / `file:<relpath>` / `inline:<text>` template
/// address. Any other scheme prefix is a [`TemplateSourceParseError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TemplateSource {
    Builtin(String),
    File(String),
    Inline(String),
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized template source scheme in {0:?}, expected builtin:/file:/inline:")]
pub struct TemplateSourceParseError(String);

impl TemplateSource {
    pub fn parse(raw: &str) -> Result<TemplateSource, TemplateSourceParseError> {
        if let Some(name) = raw.strip_prefix("builtin:") {
            Ok(TemplateSource::Builtin(name.to_string()))
        } else if let Some(path) = raw.strip_prefix("file:") {
            Ok(TemplateSource::File(path.to_string()))
        } else if let Some(text) = raw.strip_prefix("inline:") {
            Ok(TemplateSource::Inline(text.to_string()))
        } else {
            Err(TemplateSourceParseError(raw.to_string()))
        }
    }
}

impl fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateSource::Builtin(name) => write!(f, "builtin:{name}"),
            TemplateSource::File(path) => write!(f, "file:{path}"),
            TemplateSource::Inline(text) => write!(f, "inline:{text}"),
        }
    }
}

impl TryFrom<String> for TemplateSource {
    type Error = TemplateSourceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TemplateSource::parse(&value)
    }
}

impl From<TemplateSource> for String {
    fn from(value: TemplateSource) -> Self {
        value.to_string()
    }
}

/// A pending change to one or more packages, recorded by an engineer (or
/// an external agent on their behalf) before a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consignment {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub packages: Vec<String>,
    pub change_type: ChangeClass,
    /// Markdown body, trimmed of leading/trailing whitespace.
    pub summary: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Consignment {
    pub fn touches(&self, package: &str) -> bool {
        self.packages.iter().any(|p| p == package)
    }
}

/// Where a [`VersionBump`] came from: directly consigned, propagated
/// along a linked edge, or unified across a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpSource {
    Direct,
    Propagated,
    Cycle,
}

/// The propagator's output for a single package: old and new version,
/// the change class applied, and where the bump came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionBump {
    pub package: String,
    pub old_version: Version,
    pub new_version: Version,
    pub change_type: ChangeClass,
    pub source: BumpSource,
}

/// A reference to a consignment as recorded in history, trimmed down to
/// what a changelog reader needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConsignmentRef {
    pub id: String,
    pub summary: String,
    pub change_type: ChangeClass,
}

/// One durable record of an applied release for a single package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: Version,
    pub package: String,
    pub tag: String,
    pub timestamp: DateTime<Utc>,
    pub consignments: Vec<HistoryConsignmentRef>,
}

/// The coercion target for a configured metadata field.
///
/// Accepts the alias synonyms documented in the config file format
/// (`str`/`string`, `integer`/`int`, `array`/`list`, `object`/`map`) via
/// [`FieldType::from_raw`]; `string` is the default when a field omits
/// `type` entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    List,
    Map,
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::String
    }
}

impl FieldType {
    pub fn from_raw(raw: &str) -> Option<FieldType> {
        match raw {
            "string" | "str" => Some(FieldType::String),
            "int" | "integer" => Some(FieldType::Int),
            "list" | "array" => Some(FieldType::List),
            "map" | "object" => Some(FieldType::Map),
            _ => None,
        }
    }
}

/// The item type for a `list`-typed metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListItemType {
    String,
    Int,
}

impl Default for ListItemType {
    fn default() -> Self {
        ListItemType::String
    }
}

/// One entry in the configured metadata field schema (`metadata.fields[]`).
///
/// Shared between the config model, which owns the schema, and the
/// metadata validator, which applies it — kept here so neither has to
/// depend on the other.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub item_type: ListItemType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_strategy_defaults_empty_to_linked() {
        assert_eq!(DependencyStrategy::from_raw(None), DependencyStrategy::Linked);
        assert_eq!(DependencyStrategy::from_raw(Some("")), DependencyStrategy::Linked);
    }

    #[test]
    fn dependency_strategy_unknown_value_becomes_fixed() {
        assert_eq!(DependencyStrategy::from_raw(Some("weak")), DependencyStrategy::Fixed);
    }

    #[test]
    fn dependency_deserialize_tolerates_unknown_strategy_string() {
        let dep: Dependency =
            serde_json::from_str(r#"{"target_package":"x","strategy":"weak"}"#).unwrap();
        assert_eq!(dep.strategy, DependencyStrategy::Fixed);
    }

    #[test]
    fn dependency_deserialize_defaults_missing_strategy_to_linked() {
        let dep: Dependency = serde_json::from_str(r#"{"target_package":"x"}"#).unwrap();
        assert_eq!(dep.strategy, DependencyStrategy::Linked);
    }

    #[test]
    fn bump_mapping_passes_through_unmapped_input() {
        let dep = Dependency {
            target_package: "api".into(),
            strategy: DependencyStrategy::Linked,
            bump_mapping: Some(BTreeMap::from([(ChangeClass::Major, ChangeClass::Patch)])),
        };
        assert_eq!(dep.map_incoming(ChangeClass::Minor), ChangeClass::Minor);
        assert_eq!(dep.map_incoming(ChangeClass::Major), ChangeClass::Patch);
    }

    #[test]
    fn package_is_tag_only_detects_sentinel() {
        let pkg = Package {
            name: "svc".into(),
            path: ".".into(),
            ecosystem: None,
            version_files: vec![TAG_ONLY.to_string()],
            dependencies: vec![],
            templates: None,
        };
        assert!(pkg.is_tag_only());
    }

    #[test]
    fn template_source_parses_all_three_schemes() {
        assert_eq!(
            TemplateSource::parse("builtin:default").unwrap(),
            TemplateSource::Builtin("default".into())
        );
        assert_eq!(
            TemplateSource::parse("file:changelog.md.tmpl").unwrap(),
            TemplateSource::File("changelog.md.tmpl".into())
        );
        assert_eq!(
            TemplateSource::parse("inline:{{ version }}").unwrap(),
            TemplateSource::Inline("{{ version }}".into())
        );
    }

    #[test]
    fn template_source_rejects_unknown_scheme() {
        assert!(TemplateSource::parse("http://example.com").is_err());
    }

    #[test]
    fn metadata_value_as_str_only_for_string_variant() {
        assert_eq!(MetadataValue::String("x".into()).as_str(), Some("x"));
        assert_eq!(MetadataValue::Int(3).as_str(), None);
    }

    #[test]
    fn field_type_accepts_documented_aliases() {
        assert_eq!(FieldType::from_raw("str"), Some(FieldType::String));
        assert_eq!(FieldType::from_raw("integer"), Some(FieldType::Int));
        assert_eq!(FieldType::from_raw("array"), Some(FieldType::List));
        assert_eq!(FieldType::from_raw("object"), Some(FieldType::Map));
        assert_eq!(FieldType::from_raw("nonsense"), None);
    }

    #[test]
    fn consignment_roundtrips_through_json() {
        let c = Consignment {
            id: "20260101-000000-abc123".into(),
            timestamp: Utc::now(),
            packages: vec!["core".into()],
            change_type: ChangeClass::Minor,
            summary: "Add feature".into(),
            metadata: Metadata::from([("author".into(), MetadataValue::String("alice".into()))]),
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: Consignment = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
