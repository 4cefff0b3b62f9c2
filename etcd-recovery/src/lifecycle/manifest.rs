//! Manifest moves between the active and stopped directories.
//!
//! A manifest lives in exactly one of the two directories. Each transition
//! is a single `rename`, so the kubelet never sees a half-written file.

use crate::fs::MoveReport;
use crate::utils::errors::{RecoveryError, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Manifest of the certificate-recovery agent.
pub const CERT_RECOVERY_MANIFEST: &str = "etcd-generate-certs.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestState {
    /// In the kubelet's manifest directory
    Active,
    /// Parked in the stopped directory
    Stopped,
}

/// Where `name` currently lives. `NotFound` if it is in neither directory.
pub fn manifest_state(active_dir: &Path, stopped_dir: &Path, name: &str) -> Result<ManifestState> {
    if active_dir.join(name).is_file() {
        Ok(ManifestState::Active)
    } else if stopped_dir.join(name).is_file() {
        Ok(ManifestState::Stopped)
    } else {
        Err(RecoveryError::NotFound(format!(
            "manifest {} in {} or {}",
            name,
            active_dir.display(),
            stopped_dir.display()
        )))
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_file() {
        return Err(RecoveryError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists as a file"),
        ));
    }
    fs::create_dir_all(dir).map_err(|e| RecoveryError::io(dir, e))
}

fn move_manifest(from_dir: &Path, to_dir: &Path, name: &str) -> Result<()> {
    let src = from_dir.join(name);
    let dst = to_dir.join(name);
    fs::rename(&src, &dst).map_err(|e| RecoveryError::io(&src, e))
}

/// Stop a static pod by moving its manifest into `stopped_dir`.
///
/// Fails if the manifest is not in `active_dir`; a missing manifest may mean
/// the pod was never running, which should not pass silently.
pub fn stop_manifest(active_dir: &Path, stopped_dir: &Path, name: &str) -> Result<()> {
    ensure_dir(stopped_dir)?;
    move_manifest(active_dir, stopped_dir, name)?;
    info!("Stopped static pod {} (manifest moved to {})", name, stopped_dir.display());
    Ok(())
}

/// Start a static pod by moving its manifest back into `active_dir`.
pub fn start_manifest(active_dir: &Path, stopped_dir: &Path, name: &str) -> Result<()> {
    move_manifest(stopped_dir, active_dir, name)?;
    info!("Started static pod {} (manifest restored to {})", name, active_dir.display());
    Ok(())
}

/// Move every regular file from `from_dir` to `to_dir`.
///
/// An unreadable `from_dir` fails before anything moves; after that each
/// entry is moved independently and failures are collected.
fn move_all(from_dir: &Path, to_dir: &Path) -> Result<MoveReport> {
    let entries = fs::read_dir(from_dir).map_err(|e| RecoveryError::io(from_dir, e))?;
    let mut report = MoveReport::default();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read entry in {}: {}", from_dir.display(), e);
                report.failed.push((from_dir.to_path_buf(), e));
                continue;
            }
        };

        match entry.file_type() {
            Ok(ft) if ft.is_dir() => continue,
            Ok(_) => {}
            Err(e) => {
                report.failed.push((entry.path(), e));
                continue;
            }
        }

        let name = entry.file_name();
        match fs::rename(entry.path(), to_dir.join(&name)) {
            Ok(()) => {
                debug!("Moved {} to {}", entry.path().display(), to_dir.display());
                report.done.push(name.into());
            }
            Err(e) => {
                warn!("Failed to move {}: {}", entry.path().display(), e);
                report.failed.push((entry.path(), e));
            }
        }
    }

    Ok(report)
}

/// Stop every static pod on the host.
pub fn stop_all(active_dir: &Path, stopped_dir: &Path) -> Result<MoveReport> {
    ensure_dir(stopped_dir)?;
    let report = move_all(active_dir, stopped_dir)?;
    info!(
        "Stopped {} static pods ({} failed)",
        report.done.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Start every parked static pod.
pub fn start_all(active_dir: &Path, stopped_dir: &Path) -> Result<MoveReport> {
    let report = move_all(stopped_dir, active_dir)?;
    info!(
        "Started {} static pods ({} failed)",
        report.done.len(),
        report.failed.len()
    );
    Ok(report)
}
