//! Durable, append-only release history.
//!
//! The history log is a single JSON array of [`HistoryEntry`] records,
//! persisted through [`FileSystem::atomic_write`] so a crash
//! mid-write can never leave a half-written file behind. Appending is a
//! read-modify-write: there is no concurrent-writer story beyond what
//! the atomic write itself buys, which matches a release process that
//! runs one release at a time.

use std::path::PathBuf;

use shipyard_fs::FileSystem;
use shipyard_types::HistoryEntry;

/// Errors surfaced by the history log.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Fs(#[from] shipyard_fs::FsError),
    #[error("history log at {path} is not a valid JSON array of entries: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// The durable release history log.
pub struct HistoryLog<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
}

impl<'a> HistoryLog<'a> {
    pub fn new(fs: &'a dyn FileSystem, path: impl Into<PathBuf>) -> Self {
        HistoryLog {
            fs,
            path: path.into(),
        }
    }

    /// Reads every entry. A missing log file is an empty history, not
    /// an error.
    pub fn read_all(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        if !self.fs.exists(&self.path) {
            return Ok(Vec::new());
        }
        let bytes = self.fs.read(&self.path)?;
        serde_json::from_slice(&bytes).map_err(|e| HistoryError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Reads every entry for a single package, oldest first (the order
    /// entries were appended in).
    pub fn read_for_package(&self, package: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.package == package)
            .collect())
    }

    /// The most recent entry for a package, if any have been recorded.
    pub fn latest_for_package(&self, package: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        Ok(self.read_for_package(package)?.into_iter().next_back())
    }

    /// Appends one entry, rewriting the whole log atomically.
    pub fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        self.append_many(std::slice::from_ref(&entry))
    }

    /// Appends every entry in `entries`, in order, as a single atomic
    /// rewrite of the log.
    pub fn append_many(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut all = self.read_all()?;
        all.extend(entries.iter().cloned());
        let bytes = serde_json::to_vec_pretty(&all).expect("history entries always serialize");
        self.fs.atomic_write(&self.path, &bytes, 0o644)?;
        tracing::debug!(path = %self.path.display(), total = all.len(), "appended to history log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_fs::RealFileSystem;
    use shipyard_semver::Version;
    use tempfile::tempdir;

    fn entry(package: &str, version: &str, ts: &str) -> HistoryEntry {
        HistoryEntry {
            version: Version::parse(version).unwrap(),
            package: package.to_string(),
            tag: format!("v{version}"),
            timestamp: ts.parse().unwrap(),
            consignments: vec![],
        }
    }

    #[test]
    fn read_all_on_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let log = HistoryLog::new(&fs, dir.path().join("history.json"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn append_then_read_all_roundtrips() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let log = HistoryLog::new(&fs, dir.path().join("history.json"));
        log.append(entry("core", "1.0.0", "2026-01-01T00:00:00Z")).unwrap();
        log.append(entry("core", "1.1.0", "2026-02-01T00:00:00Z")).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].version.to_string(), "1.0.0");
        assert_eq!(all[1].version.to_string(), "1.1.0");
    }

    #[test]
    fn read_for_package_filters_other_packages() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let log = HistoryLog::new(&fs, dir.path().join("history.json"));
        log.append(entry("core", "1.0.0", "2026-01-01T00:00:00Z")).unwrap();
        log.append(entry("web", "2.0.0", "2026-01-02T00:00:00Z")).unwrap();

        let core_only = log.read_for_package("core").unwrap();
        assert_eq!(core_only.len(), 1);
        assert_eq!(core_only[0].package, "core");
    }

    #[test]
    fn latest_for_package_is_the_most_recently_appended() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let log = HistoryLog::new(&fs, dir.path().join("history.json"));
        log.append(entry("core", "1.0.0", "2026-01-01T00:00:00Z")).unwrap();
        log.append(entry("core", "1.1.0", "2026-02-01T00:00:00Z")).unwrap();

        let latest = log.latest_for_package("core").unwrap().unwrap();
        assert_eq!(latest.version.to_string(), "1.1.0");
    }

    #[test]
    fn append_many_is_a_single_atomic_rewrite() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let log = HistoryLog::new(&fs, dir.path().join("history.json"));
        log.append_many(&[
            entry("core", "1.0.0", "2026-01-01T00:00:00Z"),
            entry("web", "1.0.0", "2026-01-01T00:00:00Z"),
        ])
        .unwrap();
        assert_eq!(log.read_all().unwrap().len(), 2);
    }
}
