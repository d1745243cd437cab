//! Atomic file I/O and a filesystem seam for the shipyard core.
//!
//! Every component that touches disk (the consignment store, the history
//! log, the template renderer's `file:` sources) goes through the
//! [`FileSystem`] trait rather than `std::fs` directly, so the core can be
//! driven by an in-memory filesystem in tests and by [`RealFileSystem`] in
//! production. The one concrete algorithm this crate owns is the
//! temp-then-rename atomic write described by the core's file I/O utility
//! component: write to `path.tmp`, then rename over `path`, removing the
//! temp file if the rename fails.
//!
//! # Example
//!
//! ```
//! use shipyard_fs::{FileSystem, RealFileSystem};
//! use tempfile::tempdir;
//!
//! let dir = tempdir().unwrap();
//! let fs = RealFileSystem;
//! let path = dir.path().join("out.txt");
//! fs.atomic_write(&path, b"hello", 0o644).unwrap();
//! assert_eq!(fs.read(&path).unwrap(), b"hello");
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors surfaced by filesystem operations.
///
/// Wraps the underlying I/O failure with the path that was being operated
/// on, so callers never have to parse an opaque message to find out what
/// went wrong.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("path is a directory: {0}")]
    IsDirectory(PathBuf),
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),
}

impl FsError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Abstract filesystem seam consumed by the core.
///
/// Production code uses [`RealFileSystem`]; tests can substitute
/// [`MemoryFileSystem`] or a hand-rolled implementation without touching
/// disk.
pub trait FileSystem: Send + Sync {
    /// Reads a whole file into memory.
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Atomically writes `bytes` to `path`: write to a `.tmp` sibling, then
    /// rename over `path`. `mode` is a Unix permission bitmask; ignored on
    /// platforms without POSIX permissions.
    fn atomic_write(&self, path: &Path, bytes: &[u8], mode: u32) -> Result<(), FsError>;

    /// Creates `dir` and all missing parents.
    fn create_dir_all(&self, dir: &Path) -> Result<(), FsError>;

    /// Lists the regular files directly inside `dir` (non-recursive).
    /// A missing directory yields an empty list, never an error.
    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError>;

    /// Removes a single file. Errors if `path` is a directory or absent.
    fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    /// True if `path` names an existing directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// True if `path` exists (file or directory).
    fn exists(&self, path: &Path) -> bool;

    /// Resolves `path` to an absolute, symlink-free form. Used to check
    /// that a path stays within an expected base directory before it's
    /// read.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf, FsError>;
}

/// [`FileSystem`] backed by the real OS filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        fs::read(path).map_err(|e| FsError::io(path, e))
    }

    fn atomic_write(&self, path: &Path, bytes: &[u8], mode: u32) -> Result<(), FsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                self.create_dir_all(parent)?;
            }
        }

        let tmp_path = tmp_sibling(path);
        fs::write(&tmp_path, bytes).map_err(|e| FsError::io(&tmp_path, e))?;
        set_permissions(&tmp_path, mode);

        if let Err(source) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(FsError::io(path, source));
        }

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "atomic write complete");
        Ok(())
    }

    fn create_dir_all(&self, dir: &Path) -> Result<(), FsError> {
        fs::create_dir_all(dir).map_err(|e| FsError::io(dir, e))
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| FsError::io(dir, e))? {
            let entry = entry.map_err(|e| FsError::io(dir, e))?;
            let path = entry.path();
            if path.is_file() {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        if path.is_dir() {
            return Err(FsError::IsDirectory(path.to_path_buf()));
        }
        if !path.exists() {
            return Err(FsError::NotFound(path.to_path_buf()));
        }
        fs::remove_file(path).map_err(|e| FsError::io(path, e))
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, FsError> {
        fs::canonicalize(path).map_err(|e| FsError::io(path, e))
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(mode);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) {}

/// Abstract cancellation signal, checked between files or between graph
/// nodes in long-running operations. Implementations are free to back this
/// with an atomic flag, a channel, or a ctrl-c handler; the core only ever
/// polls it.
pub trait CancelSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A [`CancelSignal`] that never cancels, used when the caller doesn't
/// need cooperative cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelSignal for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    #[test]
    fn atomic_write_creates_parent_and_file() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let path = dir.path().join("nested/deep/file.md");
        fs.atomic_write(&path, b"content", 0o644).unwrap();
        assert_eq!(fs.read(&path).unwrap(), b"content");
    }

    #[test]
    fn atomic_write_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let path = dir.path().join("f.md");
        fs.atomic_write(&path, b"first", 0o644).unwrap();
        fs.atomic_write(&path, b"second", 0o644).unwrap();
        assert_eq!(fs.read(&path).unwrap(), b"second");
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file_on_success() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let path = dir.path().join("f.md");
        fs.atomic_write(&path, b"x", 0o644).unwrap();
        assert!(!tmp_sibling(&path).exists());
    }

    #[test]
    fn read_dir_on_missing_directory_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let missing = dir.path().join("does-not-exist");
        assert_eq!(fs.read_dir(&missing).unwrap(), Vec::<PathBuf>::new());
    }

    #[test]
    fn remove_file_on_directory_errors() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let err = fs.remove_file(dir.path()).unwrap_err();
        assert!(matches!(err, FsError::IsDirectory(_)));
    }

    #[test]
    fn remove_file_on_missing_path_errors() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let missing = dir.path().join("nope.md");
        let err = fs.remove_file(&missing).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn canonicalize_resolves_an_existing_file() {
        let dir = tempdir().unwrap();
        let fs = RealFileSystem;
        let path = dir.path().join("f.md");
        fs.atomic_write(&path, b"x", 0o644).unwrap();
        let resolved = fs.canonicalize(&path).unwrap();
        assert!(resolved.starts_with(fs.canonicalize(dir.path()).unwrap()));
    }

    #[test]
    fn never_cancel_is_always_false() {
        let signal = NeverCancel;
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn flag_backed_cancel_signal() {
        struct Flag(AtomicBool);
        impl CancelSignal for Flag {
            fn is_cancelled(&self) -> bool {
                self.0.load(Ordering::Relaxed)
            }
        }
        let flag = Flag(AtomicBool::new(false));
        assert!(!flag.is_cancelled());
        flag.0.store(true, Ordering::Relaxed);
        assert!(flag.is_cancelled());
    }
}
