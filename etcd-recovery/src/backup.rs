//! Write-once backups of everything a recovery may need to put back.
//!
//! A destination that already exists counts as backed up and is never
//! refreshed: the current state of a broken member may be the corrupt one,
//! and the first copy taken is the one worth keeping.

use crate::config::TlsFiles;
use crate::discovery;
use crate::fs::{self, CopyReport, EntryReport};
use crate::utils::errors::{RecoveryError, Result};
use crate::workspace::Workspace;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MANIFEST_FILE: &str = "etcd-member.yaml";
pub const ETCD_CONF_FILE: &str = "etcd.conf";
pub const CA_BUNDLE_BACKUP: &str = "etcd-ca-bundle.crt";
pub const CLIENT_CERT_BACKUP: &str = "etcd-client.crt";
pub const CLIENT_KEY_BACKUP: &str = "etcd-client.key";
pub const DATA_DIR_BACKUP: &str = "etcd";

/// Written next to the data-dir backup once every entry has been copied.
pub const DATA_DIR_COMPLETE: &str = "etcd.complete";

/// etcd's backend database, relative to a data directory.
pub const SNAPSHOT_DB: &str = "member/snap/db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Manifest,
    EtcdConf,
    ClientCerts,
    EtcdCerts,
    DataDir,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupKind::Manifest => "etcd manifest",
            BackupKind::EtcdConf => "etcd.conf",
            BackupKind::ClientCerts => "etcd client certs",
            BackupKind::EtcdCerts => "etcd TLS certificates",
            BackupKind::DataDir => "etcd data-dir",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum BackupOutcome {
    /// Everything was copied
    Copied,

    /// A directory copy finished with per-entry failures
    Partial(CopyReport),

    /// The destination already existed; nothing was touched
    AlreadyBackedUp,

    /// There was nothing to back up
    Skipped,
}

impl BackupOutcome {
    pub fn is_complete(&self) -> bool {
        !matches!(self, BackupOutcome::Partial(_))
    }
}

/// Copy `src` to `dst` unless `dst` already exists.
pub fn backup(kind: BackupKind, src: &Path, dst: &Path) -> Result<BackupOutcome> {
    if dst.exists() {
        info!("{} already backed up at {}", kind, dst.display());
        return Ok(BackupOutcome::AlreadyBackedUp);
    }

    info!("Backing up {} from {} to {}", kind, src.display(), dst.display());

    if src.is_dir() {
        let report = fs::copy_dir(src, dst)?;
        if report.is_complete() {
            Ok(BackupOutcome::Copied)
        } else {
            warn!(
                "{} backup incomplete: {} of {} entries failed",
                kind,
                report.failed.len(),
                report.failed.len() + report.done.len()
            );
            Ok(BackupOutcome::Partial(report))
        }
    } else {
        fs::copy_file(src, dst)?;
        Ok(BackupOutcome::Copied)
    }
}

/// Back up `<manifest_dir>/etcd-member.yaml`.
pub fn backup_manifest(manifest_dir: &Path, ws: &Workspace) -> Result<BackupOutcome> {
    backup(
        BackupKind::Manifest,
        &manifest_dir.join(MANIFEST_FILE),
        &ws.backup_dir().join(MANIFEST_FILE),
    )
}

/// Back up the etcd service configuration file.
pub fn backup_etcd_conf(etcd_conf: &Path, ws: &Workspace) -> Result<BackupOutcome> {
    backup(BackupKind::EtcdConf, etcd_conf, &ws.backup_dir().join(ETCD_CONF_FILE))
}

/// Client TLS files inside the workspace backup directory.
pub fn backed_up_client_tls(ws: &Workspace) -> TlsFiles {
    let dir = ws.backup_dir();
    TlsFiles {
        ca: dir.join(CA_BUNDLE_BACKUP),
        cert: dir.join(CLIENT_CERT_BACKUP),
        key: dir.join(CLIENT_KEY_BACKUP),
    }
}

/// The backed-up client TLS files, if all three are present.
pub fn available_client_tls(ws: &Workspace) -> Option<TlsFiles> {
    let tls = backed_up_client_tls(ws);
    [&tls.ca, &tls.cert, &tls.key]
        .iter()
        .all(|p| fs::file_exists(p))
        .then_some(tls)
}

/// Back up the apiserver's etcd client bundle found under `config_dir`.
pub fn backup_client_certs(config_dir: &Path, ws: &Workspace) -> Result<BackupOutcome> {
    if available_client_tls(ws).is_some() {
        info!("etcd client certs already backed up in {}", ws.backup_dir().display());
        return Ok(BackupOutcome::AlreadyBackedUp);
    }

    let bundle = discovery::find_client_cert_bundle(config_dir)?;
    let tls = backed_up_client_tls(ws);

    for (src, dst) in [
        (&bundle.ca_bundle, &tls.ca),
        (&bundle.cert, &tls.cert),
        (&bundle.key, &tls.key),
    ] {
        backup(BackupKind::ClientCerts, src, dst)?;
    }

    Ok(BackupOutcome::Copied)
}

/// Back up every generated `system:etcd-*` resource. The set is write-once:
/// any existing certificate backup means the set was already taken.
pub fn backup_etcd_certs(static_resource_dir: &Path, ws: &Workspace) -> Result<BackupOutcome> {
    let backup_dir = ws.backup_dir();
    if !discovery::find_etcd_certs(&backup_dir)?.is_empty() {
        info!("etcd TLS certificate backups found in {}", backup_dir.display());
        return Ok(BackupOutcome::AlreadyBackedUp);
    }

    let resources = discovery::find_etcd_certs(static_resource_dir)?;
    if resources.is_empty() {
        warn!(
            "etcd TLS certificates not found in {}, backup skipped",
            static_resource_dir.display()
        );
        return Ok(BackupOutcome::Skipped);
    }

    let mut report = CopyReport::default();
    for src in resources {
        let Some(name) = src.file_name() else { continue };
        match backup(BackupKind::EtcdCerts, &src, &backup_dir.join(name))? {
            BackupOutcome::Partial(sub) => report.failed.extend(sub.failed),
            _ => report.done.push(PathBuf::from(name)),
        }
    }

    info!("Backed up {} etcd certificates", report.done.len());
    if report.is_complete() {
        Ok(BackupOutcome::Copied)
    } else {
        Ok(BackupOutcome::Partial(report))
    }
}

/// Take the one-shot backup of the etcd data directory.
///
/// Refuses when a completed data-dir backup already exists, and when the live
/// data directory has no backend database to preserve. A backup left behind
/// without its completion marker is discarded and taken again.
pub fn backup_data_dir(data_dir: &Path, ws: &Workspace) -> Result<BackupOutcome> {
    let dst = ws.backup_dir().join(DATA_DIR_BACKUP);
    let marker = ws.backup_dir().join(DATA_DIR_COMPLETE);

    if fs::file_exists(&marker) {
        return Err(RecoveryError::AlreadyExists(format!(
            "etcd data-dir backup found at {}",
            dst.display()
        )));
    }

    if !fs::file_exists(&data_dir.join(SNAPSHOT_DB)) {
        return Err(RecoveryError::Precondition(format!(
            "local etcd snapshot file {} not found, backup skipped",
            data_dir.join(SNAPSHOT_DB).display()
        )));
    }

    if dst.exists() {
        warn!("Discarding incomplete {} backup at {}", BackupKind::DataDir, dst.display());
        std::fs::remove_dir_all(&dst).map_err(|e| RecoveryError::io(&dst, e))?;
    }

    info!("Backing up {} from {} to {}", BackupKind::DataDir, data_dir.display(), dst.display());
    let report = fs::copy_dir(data_dir, &dst)?;
    if report.is_complete() {
        std::fs::write(&marker, b"").map_err(|e| RecoveryError::io(&marker, e))?;
        Ok(BackupOutcome::Copied)
    } else {
        warn!(
            "{} backup incomplete, failed entries: {:?}",
            BackupKind::DataDir,
            report.failed_paths()
        );
        Ok(BackupOutcome::Partial(report))
    }
}

/// Remove the member's data directory. A missing directory is not an error.
pub fn remove_data_dir(data_dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(data_dir) {
        Ok(()) => {
            info!("Removed etcd data-dir {}", data_dir.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RecoveryError::io(data_dir, e)),
    }
}

/// Remove every generated `system:etcd-*` resource so they can be regenerated.
pub fn remove_etcd_certs(static_resource_dir: &Path) -> Result<EntryReport> {
    let mut report = EntryReport::default();

    for path in discovery::find_etcd_certs(static_resource_dir)? {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => report.done.push(path),
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                report.failed.push((path, e));
            }
        }
    }

    info!(
        "Removed {} etcd certificates from {}",
        report.done.len(),
        static_resource_dir.display()
    );
    Ok(report)
}
