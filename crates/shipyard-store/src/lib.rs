//! Content-addressed, human-readable consignment store.
//!
//! A consignment is a Markdown file with a YAML front-matter block:
//! `id`, `timestamp`, `packages`, `changeType`, and optional
//! `metadata`, followed by a blank line and the summary body. This crate
//! owns reading, writing, deleting, and grouping these files; it never
//! reasons about dependency propagation or rendering.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shipyard_fs::{CancelSignal, FileSystem, NeverCancel};
use shipyard_semver::ChangeClass;
use shipyard_types::{ClockSource, Consignment, Metadata, RandomSource};

const DELIMITER: &str = "---";

/// Errors surfaced by consignment store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Fs(#[from] shipyard_fs::FsError),
    #[error("{path}: file is empty")]
    Empty { path: PathBuf },
    #[error("{path}: missing YAML front matter (file must start with a `---` line)")]
    MissingFrontMatter { path: PathBuf },
    #[error("{path}: front matter is never closed with a second `---` line")]
    UnclosedFrontMatter { path: PathBuf },
    #[error("{path}: front matter is not valid YAML: {reason}")]
    InvalidYaml { path: PathBuf, reason: String },
    #[error("{path}: missing required field {field:?}")]
    MissingField { path: PathBuf, field: &'static str },
    #[error("{path}: invalid changeType {value:?}, expected patch|minor|major")]
    InvalidChangeType { path: PathBuf, value: String },
    #[error("{path}: consignment has no packages")]
    EmptyPackages { path: PathBuf },
    #[error("{path}: summary body is empty")]
    EmptySummary { path: PathBuf },
    #[error("{} errors occurred deleting consignments", .0.len())]
    Multiple(Vec<StoreError>),
}

#[derive(Debug, Deserialize)]
struct RawFrontMatter {
    id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    packages: Option<Vec<String>>,
    #[serde(rename = "changeType")]
    change_type: Option<String>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Serialize)]
struct FrontMatter<'a> {
    id: &'a str,
    timestamp: DateTime<Utc>,
    packages: &'a [String],
    #[serde(rename = "changeType")]
    change_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
}

/// Serializes a consignment to the on-disk Markdown + YAML front-matter
/// format. Timestamps are always RFC3339 UTC with a `Z` suffix.
pub fn serialize(consignment: &Consignment) -> String {
    let metadata = if consignment.metadata.is_empty() {
        None
    } else {
        Some(&consignment.metadata)
    };
    let front = FrontMatter {
        id: &consignment.id,
        timestamp: consignment.timestamp,
        packages: &consignment.packages,
        change_type: consignment.change_type.as_str(),
        metadata,
    };
    let yaml = serde_yaml::to_string(&front).expect("front matter always serializes");
    let yaml = yaml.trim_end();
    format!(
        "{DELIMITER}\n{yaml}\n{DELIMITER}\n\n{}\n",
        consignment.summary.trim()
    )
}

/// Parses a consignment file's raw text. `path` is used only to build
/// informative errors; it does not need to exist on disk.
pub fn parse(content: &str, path: &Path) -> Result<Consignment, StoreError> {
    if content.trim().is_empty() {
        return Err(StoreError::Empty {
            path: path.to_path_buf(),
        });
    }

    let mut lines = content.lines();
    let first = lines.next().unwrap_or_default();
    if first.trim_end() != DELIMITER {
        return Err(StoreError::MissingFrontMatter {
            path: path.to_path_buf(),
        });
    }

    let mut yaml_lines = Vec::new();
    let mut closed = false;
    let mut body_lines = Vec::new();
    for line in lines.by_ref() {
        if line.trim_end() == DELIMITER {
            closed = true;
            break;
        }
        yaml_lines.push(line);
    }
    if !closed {
        return Err(StoreError::UnclosedFrontMatter {
            path: path.to_path_buf(),
        });
    }
    for line in lines {
        body_lines.push(line);
    }

    let yaml = yaml_lines.join("\n");
    let raw: RawFrontMatter =
        serde_yaml::from_str(&yaml).map_err(|e| StoreError::InvalidYaml {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let id = raw.id.ok_or(StoreError::MissingField {
        path: path.to_path_buf(),
        field: "id",
    })?;
    let timestamp = raw.timestamp.ok_or(StoreError::MissingField {
        path: path.to_path_buf(),
        field: "timestamp",
    })?;
    let packages = raw.packages.ok_or(StoreError::MissingField {
        path: path.to_path_buf(),
        field: "packages",
    })?;
    if packages.is_empty() {
        return Err(StoreError::EmptyPackages {
            path: path.to_path_buf(),
        });
    }
    let change_type_raw = raw.change_type.ok_or(StoreError::MissingField {
        path: path.to_path_buf(),
        field: "changeType",
    })?;
    let change_type = ChangeClass::parse(&change_type_raw).map_err(|_| {
        StoreError::InvalidChangeType {
            path: path.to_path_buf(),
            value: change_type_raw,
        }
    })?;

    let summary = body_lines.join("\n").trim().to_string();
    if summary.is_empty() {
        return Err(StoreError::EmptySummary {
            path: path.to_path_buf(),
        });
    }

    Ok(Consignment {
        id,
        timestamp,
        packages,
        change_type,
        summary,
        metadata: raw.metadata.unwrap_or_default(),
    })
}

/// Generates a consignment ID: UTC `YYYYMMDD-HHMMSS` plus a `-` and six
/// characters drawn uniformly from `[a-z0-9]`. This is the canonical
/// generator; [`new_consignment_id`] is a deprecated alias kept only for
/// source compatibility with older call sites (design note: the source
/// carried two identical generators, one marked deprecated — we expose
/// one and alias the other rather than keep both live).
pub fn generate_id(clock: &dyn ClockSource, random: &dyn RandomSource) -> String {
    let now = clock.now();
    let suffix = random.random_alphanumeric(6);
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), suffix)
}

#[deprecated(note = "use generate_id")]
pub fn new_consignment_id(clock: &dyn ClockSource, random: &dyn RandomSource) -> String {
    generate_id(clock, random)
}

/// The outcome of reading every consignment in a directory: successfully
/// parsed consignments, plus any per-file parse failures. The operation
/// itself only errors if the directory exists but cannot be listed at
/// all — per-file failures are reported, not propagated.
#[derive(Debug, Default)]
pub struct ReadAllOutcome {
    pub consignments: Vec<Consignment>,
    pub errors: Vec<(PathBuf, StoreError)>,
}

/// The consignment store: reads, writes, and deletes consignment files
/// through an injected [`FileSystem`].
pub struct ConsignmentStore<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> ConsignmentStore<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    /// Writes `consignment` as `<dir>/<id>.md`, creating `dir` if missing
    /// and atomically replacing any existing file with the same ID.
    pub fn write(&self, consignment: &Consignment, dir: &Path) -> Result<PathBuf, StoreError> {
        self.fs.create_dir_all(dir)?;
        let path = dir.join(format!("{}.md", consignment.id));
        let body = serialize(consignment);
        self.fs.atomic_write(&path, body.as_bytes(), 0o644)?;
        tracing::debug!(id = %consignment.id, path = %path.display(), "wrote consignment");
        Ok(path)
    }

    /// Reads and parses a single consignment file.
    pub fn read(&self, path: &Path) -> Result<Consignment, StoreError> {
        let bytes = self.fs.read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        parse(&content, path)
    }

    /// Reads every `*.md` entry directly inside `dir` (non-recursive),
    /// sorted by timestamp ascending with filename as a deterministic
    /// tiebreaker. A missing directory yields an empty, error-free result.
    pub fn read_all(&self, dir: &Path) -> Result<ReadAllOutcome, StoreError> {
        self.read_all_cancellable(dir, &NeverCancel)
    }

    /// As [`Self::read_all`], but checks `cancel` between files and stops
    /// early (discarding partial progress) when it reports cancellation.
    pub fn read_all_cancellable(
        &self,
        dir: &Path,
        cancel: &dyn CancelSignal,
    ) -> Result<ReadAllOutcome, StoreError> {
        let mut entries: Vec<PathBuf> = self
            .fs
            .read_dir(dir)?
            .into_iter()
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        entries.sort();

        let mut outcome = ReadAllOutcome::default();
        for path in entries {
            if cancel.is_cancelled() {
                return Ok(ReadAllOutcome::default());
            }
            match self.read(&path) {
                Ok(consignment) => outcome.consignments.push(consignment),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable consignment");
                    outcome.errors.push((path, e));
                }
            }
        }

        outcome
            .consignments
            .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(outcome)
    }

    /// As [`Self::read_all`], but keeps only consignments mentioning one
    /// of `package_filter`. An empty filter disables filtering entirely.
    pub fn read_all_filtered(
        &self,
        dir: &Path,
        package_filter: &[String],
    ) -> Result<ReadAllOutcome, StoreError> {
        let mut outcome = self.read_all(dir)?;
        if !package_filter.is_empty() {
            outcome
                .consignments
                .retain(|c| c.packages.iter().any(|p| package_filter.contains(p)));
        }
        Ok(outcome)
    }

    /// Deletes a single consignment file. Errors if `path` is a directory
    /// or does not exist.
    pub fn delete(&self, path: &Path) -> Result<(), StoreError> {
        self.fs.remove_file(path)?;
        tracing::debug!(path = %path.display(), "deleted consignment");
        Ok(())
    }

    /// Deletes every path in `paths`, continuing past individual
    /// failures and returning them joined in one [`StoreError::Multiple`].
    /// An empty input is a no-op success.
    pub fn delete_many(&self, paths: &[PathBuf]) -> Result<(), StoreError> {
        let errors: Vec<StoreError> = paths
            .iter()
            .filter_map(|p| self.delete(p).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Multiple(errors))
        }
    }
}

/// Pure, side-effect-free grouping and aggregation over a consignment
/// set. None of these take a store or touch disk.
pub mod grouping {
    use super::*;

    /// Buckets consignments by package; a consignment touching N
    /// packages appears in N buckets.
    pub fn group_by_package(consignments: &[Consignment]) -> BTreeMap<String, Vec<Consignment>> {
        let mut out: BTreeMap<String, Vec<Consignment>> = BTreeMap::new();
        for c in consignments {
            for pkg in &c.packages {
                out.entry(pkg.clone()).or_default().push(c.clone());
            }
        }
        out
    }

    /// Buckets consignments by change type.
    pub fn group_by_change_type(
        consignments: &[Consignment],
    ) -> BTreeMap<ChangeClass, Vec<Consignment>> {
        let mut out: BTreeMap<ChangeClass, Vec<Consignment>> = BTreeMap::new();
        for c in consignments {
            out.entry(c.change_type).or_default().push(c.clone());
        }
        out
    }

    /// Buckets consignments by a metadata field's string value. Only
    /// string-valued entries for `field` become keys; other types (and
    /// consignments missing the field) are dropped.
    pub fn group_by_metadata_field(
        consignments: &[Consignment],
        field: &str,
    ) -> BTreeMap<String, Vec<Consignment>> {
        let mut out: BTreeMap<String, Vec<Consignment>> = BTreeMap::new();
        for c in consignments {
            if let Some(value) = c.metadata.get(field).and_then(|v| v.as_str()) {
                out.entry(value.to_string()).or_default().push(c.clone());
            }
        }
        out
    }

    /// The highest-priority change class among `consignments`. An empty
    /// slice yields `patch`, the safest default.
    pub fn highest_change_type(consignments: &[Consignment]) -> ChangeClass {
        consignments
            .iter()
            .map(|c| c.change_type)
            .fold(ChangeClass::Patch, ChangeClass::max)
    }

    /// Every package named by any consignment, sorted ascending.
    pub fn unique_packages(consignments: &[Consignment]) -> Vec<String> {
        let mut set: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for c in consignments {
            set.extend(c.packages.iter().cloned());
        }
        set.into_iter().collect()
    }

    /// Filters consignments to an inclusive `[start, end]` timestamp
    /// range. Either bound may be omitted to leave that side unbounded.
    pub fn date_range<'a>(
        consignments: &'a [Consignment],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<&'a Consignment> {
        consignments
            .iter()
            .filter(|c| start.is_none_or(|s| c.timestamp >= s))
            .filter(|c| end.is_none_or(|e| c.timestamp <= e))
            .collect()
    }

    /// Flattens every consignment's metadata into one map; when the same
    /// key appears in more than one consignment, the last one (in input
    /// order) wins.
    pub fn aggregate_metadata(consignments: &[Consignment]) -> Metadata {
        let mut out = Metadata::new();
        for c in consignments {
            for (k, v) in &c.metadata {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_fs::RealFileSystem;
    use shipyard_types::MetadataValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FixedClock(DateTime<Utc>);
    impl ClockSource for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    struct SequentialRandom(AtomicUsize);
    impl RandomSource for SequentialRandom {
        fn random_alphanumeric(&self, len: usize) -> String {
            let n = self.0.fetch_add(1, Ordering::Relaxed);
            format!("{n:0>width$}", width = len)
                .chars()
                .take(len)
                .collect()
        }
    }

    fn sample(id: &str, packages: &[&str]) -> Consignment {
        Consignment {
            id: id.to_string(),
            timestamp: "2026-01-15T10:00:00Z".parse().unwrap(),
            packages: packages.iter().map(|s| s.to_string()).collect(),
            change_type: ChangeClass::Minor,
            summary: "Add a feature".to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn id_matches_documented_pattern() {
        let clock = FixedClock("2026-03-05T08:09:10Z".parse().unwrap());
        let random = SequentialRandom(AtomicUsize::new(0));
        let id = generate_id(&clock, &random);
        let re = regex_lite_check(&id);
        assert!(re, "id {id} does not match ^\\d{{8}}-\\d{{6}}-[a-z0-9]{{6}}$");
        assert!(id.starts_with("20260305-080910-"));
    }

    fn regex_lite_check(id: &str) -> bool {
        let bytes = id.as_bytes();
        if bytes.len() != 22 {
            return false;
        }
        bytes[..8].iter().all(u8::is_ascii_digit)
            && bytes[8] == b'-'
            && bytes[9..15].iter().all(u8::is_ascii_digit)
            && bytes[15] == b'-'
            && bytes[16..22]
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    }

    #[test]
    fn serialize_then_parse_roundtrips() {
        let mut c = sample("20260115-100000-ab12cd", &["core", "api"]);
        c.metadata
            .insert("author".into(), MetadataValue::String("alice".into()));
        let text = serialize(&c);
        let parsed = parse(&text, Path::new("x.md")).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn parse_rejects_empty_file() {
        let err = parse("   \n\n", Path::new("x.md")).unwrap_err();
        assert!(matches!(err, StoreError::Empty { .. }));
    }

    #[test]
    fn parse_rejects_missing_front_matter() {
        let err = parse("just a body", Path::new("x.md")).unwrap_err();
        assert!(matches!(err, StoreError::MissingFrontMatter { .. }));
    }

    #[test]
    fn parse_rejects_unclosed_front_matter() {
        let err = parse("---\nid: x\n", Path::new("x.md")).unwrap_err();
        assert!(matches!(err, StoreError::UnclosedFrontMatter { .. }));
    }

    #[test]
    fn parse_rejects_invalid_change_type() {
        let text = "---\nid: a\ntimestamp: 2026-01-01T00:00:00Z\npackages:\n  - core\nchangeType: huge\n---\n\nbody\n";
        let err = parse(text, Path::new("x.md")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidChangeType { .. }));
    }

    #[test]
    fn write_then_read_all_sorts_by_timestamp() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let store = ConsignmentStore::new(&fs);

        let mut later = sample("20260115-120000-aaaaaa", &["core"]);
        later.timestamp = "2026-01-15T12:00:00Z".parse().unwrap();
        let mut earlier = sample("20260115-080000-bbbbbb", &["core"]);
        earlier.timestamp = "2026-01-15T08:00:00Z".parse().unwrap();

        store.write(&later, dir.path()).unwrap();
        store.write(&earlier, dir.path()).unwrap();

        let outcome = store.read_all(dir.path()).unwrap();
        assert_eq!(outcome.consignments.len(), 2);
        assert_eq!(outcome.consignments[0].id, earlier.id);
        assert_eq!(outcome.consignments[1].id, later.id);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn read_all_on_missing_directory_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let store = ConsignmentStore::new(&fs);
        let outcome = store.read_all(&dir.path().join("nope")).unwrap();
        assert!(outcome.consignments.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn read_all_reports_parse_failures_without_failing_the_whole_call() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let store = ConsignmentStore::new(&fs);

        store.write(&sample("20260115-080000-aaaaaa", &["core"]), dir.path()).unwrap();
        std::fs::write(dir.path().join("broken.md"), "not front matter").unwrap();

        let outcome = store.read_all(dir.path()).unwrap();
        assert_eq!(outcome.consignments.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn read_all_filtered_keeps_only_matching_packages() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let store = ConsignmentStore::new(&fs);

        store.write(&sample("20260115-080000-aaaaaa", &["core"]), dir.path()).unwrap();
        store.write(&sample("20260115-090000-bbbbbb", &["web"]), dir.path()).unwrap();

        let outcome = store
            .read_all_filtered(dir.path(), &["core".to_string()])
            .unwrap();
        assert_eq!(outcome.consignments.len(), 1);
        assert_eq!(outcome.consignments[0].packages, vec!["core".to_string()]);
    }

    #[test]
    fn delete_many_is_partial_failure_tolerant() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let store = ConsignmentStore::new(&fs);
        let path = store
            .write(&sample("20260115-080000-aaaaaa", &["core"]), dir.path())
            .unwrap();
        let missing = dir.path().join("missing.md");

        let err = store
            .delete_many(&[path.clone(), missing.clone()])
            .unwrap_err();
        assert!(matches!(err, StoreError::Multiple(errs) if errs.len() == 1));
        assert!(!path.exists());
    }

    #[test]
    fn delete_many_on_empty_input_succeeds() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let store = ConsignmentStore::new(&fs);
        assert!(store.delete_many(&[]).is_ok());
        let _ = dir;
    }

    #[test]
    fn highest_change_type_of_empty_is_patch() {
        assert_eq!(grouping::highest_change_type(&[]), ChangeClass::Patch);
    }

    #[test]
    fn group_by_package_duplicates_multi_package_consignments() {
        let c = sample("x", &["core", "api"]);
        let groups = grouping::group_by_package(std::slice::from_ref(&c));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["core"].len(), 1);
        assert_eq!(groups["api"].len(), 1);
    }

    #[test]
    fn aggregate_metadata_last_value_wins() {
        let mut a = sample("a", &["core"]);
        a.metadata.insert("owner".into(), MetadataValue::String("alice".into()));
        let mut b = sample("b", &["core"]);
        b.metadata.insert("owner".into(), MetadataValue::String("bob".into()));
        let merged = grouping::aggregate_metadata(&[a, b]);
        assert_eq!(merged["owner"], MetadataValue::String("bob".into()));
    }

    #[test]
    fn unique_packages_is_sorted() {
        let a = sample("a", &["web", "core"]);
        let b = sample("b", &["api"]);
        assert_eq!(
            grouping::unique_packages(&[a, b]),
            vec!["api".to_string(), "core".to_string(), "web".to_string()]
        );
    }
}
