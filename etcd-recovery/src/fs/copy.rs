//! File and directory copies that preserve Unix mode bits.
//!
//! Directory copies are best-effort: a failing entry is recorded in the
//! returned [`CopyReport`] and the walk continues with the next one.

use super::CopyReport;
use crate::utils::errors::{RecoveryError, Result};
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Copy a single file, then apply the source's permissions to the copy.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let bytes = fs::copy(src, dst).map_err(|e| RecoveryError::io(src, e))?;
    apply_mode(src, dst)?;
    Ok(bytes)
}

#[cfg(unix)]
fn apply_mode(src: &Path, dst: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(src)
        .map_err(|e| RecoveryError::io(src, e))?
        .permissions()
        .mode();
    fs::set_permissions(dst, fs::Permissions::from_mode(mode)).map_err(|e| RecoveryError::io(dst, e))
}

#[cfg(not(unix))]
fn apply_mode(_src: &Path, _dst: &Path) -> Result<()> {
    // fs::copy already carries the read-only flag
    Ok(())
}

/// Recursively copy `src` into `dst`.
///
/// Fails only when the source root cannot be read or the destination root
/// cannot be created; everything below that is collected in the report.
/// Directory modes are applied after the walk so that a read-only source
/// directory still receives its children.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<CopyReport> {
    let root_meta = fs::metadata(src).map_err(|e| RecoveryError::io(src, e))?;
    if !root_meta.is_dir() {
        return Err(RecoveryError::io(
            src,
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }
    fs::create_dir_all(dst).map_err(|e| RecoveryError::io(dst, e))?;

    let mut report = CopyReport::default();
    let mut dir_modes = vec![(dst.to_path_buf(), root_meta.permissions())];

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
                warn!("Skipping unreadable entry {}: {}", path.display(), e);
                report.failed.push((path, io::Error::from(e)));
                continue;
            }
        };

        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path()).to_path_buf();
        let target = dst.join(&relative);

        if entry.file_type().is_dir() {
            let created = entry
                .metadata()
                .map_err(io::Error::from)
                .and_then(|meta| fs::create_dir_all(&target).map(|_| meta.permissions()));
            match created {
                Ok(perms) => dir_modes.push((target, perms)),
                Err(e) => {
                    warn!("Failed to create {}: {}", target.display(), e);
                    report.failed.push((entry.path().to_path_buf(), e));
                }
            }
            continue;
        }

        match copy_entry(entry.path(), &target) {
            Ok(()) => report.done.push(relative),
            Err(e) => {
                warn!("Failed to copy {}: {}", entry.path().display(), e);
                report.failed.push((entry.path().to_path_buf(), e));
            }
        }
    }

    // deepest first, so a read-only parent is locked after its children
    for (dir, perms) in dir_modes.into_iter().rev() {
        if let Err(e) = fs::set_permissions(&dir, perms) {
            warn!("Failed to set mode on {}: {}", dir.display(), e);
            report.failed.push((dir, e));
        }
    }

    Ok(report)
}

fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    let perms = fs::metadata(src)?.permissions();
    fs::set_permissions(dst, perms)
}
