//! Config file loading, validation, and default-fill for the shipyard core.
//!
//! A config document (YAML, JSON, or TOML — sniffed from the file
//! extension) deserializes into [`RawConfig`], which [`Config::from_raw`]
//! validates and fills with defaults. `extends[]` overlays are data the
//! core carries ([`ExtendsRef`]) but never resolves itself — fetching a
//! URL or git ref is an external collaborator's job; the core only
//! merges an already-resolved `RawConfig` a caller supplies.
//!
//! # Example
//!
//! ```
//! use shipyard_config::{Config, ConfigFormat};
//!
//! let yaml = r#"
//! packages:
//!   - name: core
//!     path: packages/core
//! "#;
//! let config = Config::load_str(yaml, ConfigFormat::Yaml).unwrap();
//! assert_eq!(config.consignments_path(), ".shipyard/consignments");
//! assert_eq!(config.packages()[0].name, "core");
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use shipyard_types::{MetadataField, Package, TemplateSource};

/// Default directory for pending consignment files.
pub const DEFAULT_CONSIGNMENTS_PATH: &str = ".shipyard/consignments";
/// Default path for the durable history log.
pub const DEFAULT_HISTORY_PATH: &str = ".shipyard/history.json";

/// The on-disk format a config document was (or should be) parsed from.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Sniffs a format from a file's recognized suffix
    /// (`.yaml`/`.yml`, `.json`, `.toml`).
    pub fn from_path(path: &Path) -> Option<ConfigFormat> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(ConfigFormat::Yaml),
            Some("json") => Some(ConfigFormat::Json),
            Some("toml") => Some(ConfigFormat::Toml),
            _ => None,
        }
    }
}

/// Errors surfaced while loading or validating a config document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unrecognized config file suffix: {0}")]
    UnrecognizedSuffix(String),
    #[error("failed to parse {format:?} config: {source}")]
    Parse {
        format: ConfigFormat,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigValidationError),
}

impl std::fmt::Debug for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
        };
        f.write_str(s)
    }
}

/// A validation failure in a loaded config document.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("config declares no packages")]
    NoPackages,
    #[error("duplicate package name: {0}")]
    DuplicatePackageName(String),
    #[error("package has an empty name")]
    EmptyPackageName,
    #[error("package {0:?} has an empty path")]
    EmptyPackagePath(String),
    #[error("package {package:?} depends on unknown package {target:?}")]
    DanglingDependency { package: String, target: String },
    #[error("package {0:?} has an invalid template source: {1}")]
    InvalidTemplateSource(String, String),
}

/// A single remote config overlay reference (`extends[]`).
///
/// The core never resolves these — it only carries the reference so an
/// external collaborator can fetch it and feed the result back in as
/// another [`RawConfig`] to merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtendsRef {
    Url(String),
    Git { git: String, path: String, r#ref: String },
}

/// `github.{enabled,owner,repo,token}` — consumed entirely by external
/// collaborators; the core only threads it through.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// One named stage in a `prerelease.stages[]` ladder, consumed by
/// external pre-release stage machines, not by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrereleaseStage {
    pub name: String,
    pub order: u32,
}

/// Raw `templates.{changelog,tagName,releaseNotes,commitMessage,releaseTag}` block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<TemplateSource>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tagName")]
    pub tag_name: Option<TemplateSource>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "releaseNotes"
    )]
    pub release_notes: Option<TemplateSource>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "commitMessage"
    )]
    pub commit_message: Option<TemplateSource>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "releaseTag"
    )]
    pub release_tag: Option<TemplateSource>,
}

/// The config document as deserialized from disk, before validation or
/// default-fill. Kept distinct from [`Config`] so a failed validation
/// never hands back a half-trusted value under the same type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub extends: Vec<ExtendsRef>,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub metadata: RawMetadataConfig,
    #[serde(default)]
    pub consignments: RawPathConfig,
    #[serde(default)]
    pub history: RawPathConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubConfig>,
    #[serde(default)]
    pub prerelease: RawPrereleaseConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawMetadataConfig {
    #[serde(default)]
    pub fields: Vec<MetadataField>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawPathConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawPrereleaseConfig {
    #[serde(default)]
    pub stages: Vec<PrereleaseStage>,
}

/// A validated, default-filled config, ready for the graph/propagator/
/// template components to consume.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    packages: Vec<Package>,
    extends: Vec<ExtendsRef>,
    templates: TemplatesConfig,
    metadata_fields: Vec<MetadataField>,
    consignments_path: String,
    history_path: String,
    github: Option<GithubConfig>,
    prerelease_stages: Vec<PrereleaseStage>,
}

impl Config {
    /// Parses `content` in the given format, then validates and
    /// default-fills it in one step.
    pub fn load_str(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
        let raw = parse_raw(content, format)?;
        Config::from_raw(raw)
    }

    /// Validates `raw` and fills in defaults, returning an owned,
    /// independent [`Config`]. Never mutates `raw`.
    pub fn from_raw(raw: RawConfig) -> Result<Config, ConfigError> {
        validate(&raw)?;

        let consignments_path = raw
            .consignments
            .path
            .clone()
            .unwrap_or_else(|| DEFAULT_CONSIGNMENTS_PATH.to_string());
        let history_path = raw
            .history
            .path
            .clone()
            .unwrap_or_else(|| DEFAULT_HISTORY_PATH.to_string());

        Ok(Config {
            packages: raw.packages.clone(),
            extends: raw.extends.clone(),
            templates: raw.templates.clone(),
            metadata_fields: raw.metadata.fields.clone(),
            consignments_path,
            history_path,
            github: raw.github.clone(),
            prerelease_stages: raw.prerelease.stages.clone(),
        })
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn extends(&self) -> &[ExtendsRef] {
        &self.extends
    }

    pub fn templates(&self) -> &TemplatesConfig {
        &self.templates
    }

    pub fn metadata_fields(&self) -> &[MetadataField] {
        &self.metadata_fields
    }

    pub fn consignments_path(&self) -> &str {
        &self.consignments_path
    }

    pub fn history_path(&self) -> &str {
        &self.history_path
    }

    pub fn github(&self) -> Option<&GithubConfig> {
        self.github.as_ref()
    }

    pub fn prerelease_stages(&self) -> &[PrereleaseStage] {
        &self.prerelease_stages
    }

    /// Re-validates and deep-clones into a fresh [`Config`]: mutating the
    /// result never mutates `self`, satisfying the config model's
    /// explicit `withDefaults` invariant.
    pub fn with_defaults(&self) -> Config {
        self.clone()
    }
}

fn parse_raw(content: &str, format: ConfigFormat) -> Result<RawConfig, ConfigError> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            format,
            source: Box::new(e),
        }),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            format,
            source: Box::new(e),
        }),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| ConfigError::Parse {
            format,
            source: Box::new(e),
        }),
    }
}

fn validate(raw: &RawConfig) -> Result<(), ConfigValidationError> {
    if raw.packages.is_empty() {
        return Err(ConfigValidationError::NoPackages);
    }

    let mut seen = BTreeSet::new();
    for pkg in &raw.packages {
        if pkg.name.is_empty() {
            return Err(ConfigValidationError::EmptyPackageName);
        }
        if pkg.path.is_empty() {
            return Err(ConfigValidationError::EmptyPackagePath(pkg.name.clone()));
        }
        if !seen.insert(pkg.name.clone()) {
            return Err(ConfigValidationError::DuplicatePackageName(pkg.name.clone()));
        }
    }

    let known: BTreeSet<&str> = raw.packages.iter().map(|p| p.name.as_str()).collect();
    for pkg in &raw.packages {
        for dep in &pkg.dependencies {
            if !known.contains(dep.target_package.as_str()) {
                return Err(ConfigValidationError::DanglingDependency {
                    package: pkg.name.clone(),
                    target: dep.target_package.clone(),
                });
            }
        }
    }

    Ok(())
}
