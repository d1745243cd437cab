//! Semver parsing and change-class bump rules.
//!
//! This is the smallest component in the core: a thin, serde-friendly
//! wrapper around [`semver::Version`] plus the closed `ChangeClass` set
//! (`patch < minor < major`) that every other component reasons about.
//!
//! # Example
//!
//! ```
//! use shipyard_semver::{ChangeClass, Version};
//!
//! let v = Version::parse("1.2.3").unwrap();
//! assert_eq!(v.bump(ChangeClass::Minor).to_string(), "1.3.0");
//! assert_eq!(ChangeClass::max(ChangeClass::Patch, ChangeClass::Major), ChangeClass::Major);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A parsed semantic version.
///
/// Thin wrapper over [`semver::Version`] so the rest of the core can stay
/// agnostic of the parsing crate while still getting a battle-tested
/// parser and comparator underneath.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(semver::Version);

/// Error returned when a version string fails to parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid semver {raw:?}: {source}")]
pub struct VersionParseError {
    raw: String,
    #[source]
    source: semver::Error,
}

impl Version {
    /// Parses a version string, e.g. `"1.2.3"`, `"1.2.3-rc.1"`, `"1.2.3+build"`.
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        semver::Version::parse(raw)
            .map(Version)
            .map_err(|source| VersionParseError {
                raw: raw.to_string(),
                source,
            })
    }

    /// Constructs a version directly from its numeric components, with no
    /// prerelease or build metadata.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version(semver::Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    pub fn prerelease(&self) -> Option<&str> {
        if self.0.pre.is_empty() {
            None
        } else {
            Some(self.0.pre.as_str())
        }
    }

    pub fn build(&self) -> Option<&str> {
        if self.0.build.is_empty() {
            None
        } else {
            Some(self.0.build.as_str())
        }
    }

    /// Applies a [`ChangeClass`] bump, dropping any prerelease/build
    /// metadata on the result (a stable bump always yields a stable
    /// version).
    pub fn bump(&self, class: ChangeClass) -> Version {
        let (major, minor, patch) = match class {
            ChangeClass::Major => (self.0.major + 1, 0, 0),
            ChangeClass::Minor => (self.0.major, self.0.minor + 1, 0),
            ChangeClass::Patch => (self.0.major, self.0.minor, self.0.patch + 1),
        };
        Version(semver::Version::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Change-class severity, priority-ordered `patch < minor < major`.
///
/// This ordering is the canonical one used everywhere in the core:
/// cycle resolution, propagation priority merging, and
/// `highestChangeType` aggregation all defer to [`ChangeClass::max`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeClass {
    Patch = 1,
    Minor = 2,
    Major = 3,
}

/// Error returned when parsing a change class from an arbitrary string.
#[derive(Debug, thiserror::Error)]
#[error("invalid change class {0:?}, expected patch|minor|major")]
pub struct ChangeClassParseError(String);

impl ChangeClass {
    /// Numeric priority, `patch = 1 < minor = 2 < major = 3`.
    pub fn priority(self) -> u8 {
        self as u8
    }

    /// The higher-priority of the two classes.
    pub fn max(a: ChangeClass, b: ChangeClass) -> ChangeClass {
        if b.priority() > a.priority() { b } else { a }
    }

    /// Parses the exact lowercase strings `"patch"`, `"minor"`, `"major"`.
    pub fn parse(raw: &str) -> Result<ChangeClass, ChangeClassParseError> {
        match raw {
            "patch" => Ok(ChangeClass::Patch),
            "minor" => Ok(ChangeClass::Minor),
            "major" => Ok(ChangeClass::Major),
            other => Err(ChangeClassParseError(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeClass::Patch => "patch",
            ChangeClass::Minor => "minor",
            ChangeClass::Major => "major",
        }
    }
}

impl fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeClass {
    type Err = ChangeClassParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeClass::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_bump_increments_patch_only() {
        let v = Version::new(1, 2, 3);
        assert_eq!(v.bump(ChangeClass::Patch), Version::new(1, 2, 4));
    }

    #[test]
    fn minor_bump_zeroes_patch() {
        let v = Version::new(1, 2, 3);
        assert_eq!(v.bump(ChangeClass::Minor), Version::new(1, 3, 0));
    }

    #[test]
    fn major_bump_zeroes_minor_and_patch() {
        let v = Version::new(1, 2, 3);
        assert_eq!(v.bump(ChangeClass::Major), Version::new(2, 0, 0));
    }

    #[test]
    fn bump_drops_prerelease_and_build() {
        let v = Version::parse("1.2.3-rc.1+exp.sha.abc").unwrap();
        let bumped = v.bump(ChangeClass::Patch);
        assert_eq!(bumped.to_string(), "1.2.4");
        assert!(bumped.prerelease().is_none());
        assert!(bumped.build().is_none());
    }

    #[test]
    fn change_class_priority_ordering() {
        assert!(ChangeClass::Patch < ChangeClass::Minor);
        assert!(ChangeClass::Minor < ChangeClass::Major);
    }

    #[test]
    fn change_class_max_picks_higher_priority() {
        assert_eq!(ChangeClass::max(ChangeClass::Patch, ChangeClass::Major), ChangeClass::Major);
        assert_eq!(ChangeClass::max(ChangeClass::Minor, ChangeClass::Patch), ChangeClass::Minor);
        assert_eq!(ChangeClass::max(ChangeClass::Major, ChangeClass::Major), ChangeClass::Major);
    }

    #[test]
    fn change_class_parse_rejects_unknown_and_uppercase() {
        assert!(ChangeClass::parse("Patch").is_err());
        assert!(ChangeClass::parse("breaking").is_err());
    }

    #[test]
    fn version_roundtrips_through_serde_json() {
        let v = Version::parse("2.0.0-beta.1").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    proptest::proptest! {
        #[test]
        fn patch_bump_never_decreases_version(major in 0u64..50, minor in 0u64..50, patch in 0u64..50) {
            let v = Version::new(major, minor, patch);
            let bumped = v.bump(ChangeClass::Patch);
            proptest::prop_assert!(bumped > v);
        }
    }
}
