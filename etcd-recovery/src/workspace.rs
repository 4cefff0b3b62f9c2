//! On-disk staging layout for a recovery run.
//!
//! Every step derives its paths from the workspace root; nothing is cached
//! between steps, so a re-run after a failure sees exactly what is on disk.

use crate::utils::errors::{RecoveryError, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fixed subdirectories created under the workspace root.
pub const SUBDIRS: [&str; 7] = ["bin", "tmp", "shared", "backup", "templates", "restore", "manifests"];

/// Directory that holds manifests moved out of the kubelet's watch directory.
pub const MANIFESTS_STOPPED: &str = "manifests-stopped";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// An empty root means the current directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            root
        };
        Self { root }
    }

    /// Create the fixed directory set. Existing directories are fine; any
    /// other failure aborts.
    pub fn init(&self) -> Result<()> {
        for dir in SUBDIRS {
            let path = self.root.join(dir);
            match std::fs::create_dir_all(&path) {
                Ok(()) => debug!("Workspace directory ready: {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {}
                Err(e) => return Err(RecoveryError::io(&path, e)),
            }
        }

        info!("Initialized recovery workspace at {}", self.root.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backup")
    }

    pub fn manifests_stopped_dir(&self) -> PathBuf {
        self.root.join(MANIFESTS_STOPPED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn listing(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_init_creates_layout() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(temp_dir.path().join("assets"));
        ws.init()?;

        for dir in SUBDIRS {
            assert!(ws.root().join(dir).is_dir(), "{} missing", dir);
        }
        Ok(())
    }

    #[test]
    fn test_init_is_idempotent() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(temp_dir.path());
        ws.init()?;
        let first = listing(temp_dir.path());

        ws.init()?;
        assert_eq!(listing(temp_dir.path()), first);
        Ok(())
    }

    #[test]
    fn test_init_fails_when_entry_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("backup"), b"not a dir").unwrap();

        let err = Workspace::new(temp_dir.path()).init().unwrap_err();
        assert_eq!(err.kind(), crate::utils::ErrorKind::Io);
    }

    #[test]
    fn test_empty_root_defaults_to_cwd() {
        assert_eq!(Workspace::new("").root(), Path::new("."));
    }
}
