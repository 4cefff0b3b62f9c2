//! File system helpers for staging backups.

pub mod copy;

pub use copy::{copy_dir, copy_file};

use std::io;
use std::path::{Path, PathBuf};

/// Per-entry outcome of a best-effort batch operation
#[derive(Debug, Default)]
pub struct EntryReport {
    /// Entries handled successfully
    pub done: Vec<PathBuf>,

    /// Entries that failed, with the reason
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl EntryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Paths of the failed entries, for logging.
    pub fn failed_paths(&self) -> Vec<&Path> {
        self.failed.iter().map(|(p, _)| p.as_path()).collect()
    }
}

/// Report of a recursive copy; `done` holds paths relative to the source root.
pub type CopyReport = EntryReport;

/// Report of a bulk manifest move; `done` holds the moved file names.
pub type MoveReport = EntryReport;

/// True when `path` exists and is not a directory.
pub fn file_exists(path: &Path) -> bool {
    path.metadata().map(|m| !m.is_dir()).unwrap_or(false)
}
