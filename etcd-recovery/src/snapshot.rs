//! Saving and restoring point-in-time snapshots of the etcd keyspace.
//!
//! A saved snapshot is streamed into `<dest>.part`, synced, and renamed into
//! place. The `.part` file is removed on every other exit, so `dest` either
//! does not exist or holds a complete, durable snapshot.

use crate::client::{ClusterAdmin, Connector};
use crate::config::{ClientConfig, RestoreSettings};
use crate::transfer::{format_bytes, ProgressStream, TransferStats};
use crate::utils::errors::{RecoveryError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const PART_SUFFIX: &str = ".part";

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Result of a successful snapshot save
#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub endpoint: String,
    pub bytes: u64,
}

/// Staging path for `dest`: the same name with `.part` appended.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Removes the staging file when dropped. After a successful rename there
/// is nothing left at the staging path and the removal is a no-op.
struct PartFileGuard {
    path: PathBuf,
}

impl Drop for PartFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial snapshot {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

async fn open_part_file(path: &Path) -> Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await.map_err(|e| RecoveryError::io(path, e))
}

/// Stream a snapshot from the single configured endpoint into `dest`.
///
/// More or fewer than one endpoint is refused: the snapshot has to come from
/// one identifiable member, not whichever one a balancer picks.
pub async fn save_snapshot<C: Connector>(
    connector: &C,
    config: &ClientConfig,
    dest: &Path,
) -> Result<SavedSnapshot> {
    if config.endpoints.len() != 1 {
        return Err(RecoveryError::Precondition(format!(
            "snapshot must be requested from exactly one endpoint, got {:?}",
            config.endpoints
        )));
    }
    let endpoint = config.endpoints[0].clone();

    let mut admin = connector.connect(config).await?;

    let part = part_path(dest);
    let _guard = PartFileGuard { path: part.clone() };
    let mut file = open_part_file(&part).await?;

    let mut stats = TransferStats::start();
    let chunks = admin.snapshot().await?;
    let progress_endpoint = endpoint.clone();
    let mut chunks = ProgressStream::new(
        chunks,
        PROGRESS_INTERVAL,
        Box::new(move |n| debug!("Received {} of snapshot from {}", format_bytes(n), progress_endpoint)),
    );

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(|e| RecoveryError::io(&part, e))?;
        stats.record(chunk.len());
    }

    file.flush().await.map_err(|e| RecoveryError::io(&part, e))?;
    file.sync_all().await.map_err(|e| RecoveryError::io(&part, e))?;
    drop(file);
    info!("Fetched snapshot from {}: {}", endpoint, stats.summary());

    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| RecoveryError::io(dest, e))?;
    info!("Saved snapshot to {}", dest.display());

    Ok(SavedSnapshot {
        path: dest.to_path_buf(),
        endpoint: admin.endpoint().to_string(),
        bytes: stats.bytes,
    })
}

/// Parameters for rebuilding a member's data directory from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreConfig {
    pub snapshot_path: PathBuf,
    pub name: String,
    pub data_dir: PathBuf,
    pub peer_urls: Vec<String>,
    /// `name=peerURL,...`; empty means a single-member cluster of this member
    pub initial_cluster: String,
    pub initial_cluster_token: String,
}

impl RestoreConfig {
    pub fn new(
        snapshot_path: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        settings: &RestoreSettings,
        peer_urls: Vec<String>,
    ) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            name: settings.name.clone(),
            data_dir: data_dir.into(),
            peer_urls,
            initial_cluster: settings.initial_cluster.clone(),
            initial_cluster_token: settings.initial_cluster_token.clone(),
        }
    }

    pub fn initial_cluster(&self) -> String {
        if !self.initial_cluster.is_empty() {
            return self.initial_cluster.clone();
        }
        self.peer_urls
            .iter()
            .map(|url| format!("{}={}", self.name, url))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Arguments for `etcdutl snapshot restore`.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "snapshot".into(),
            "restore".into(),
            self.snapshot_path.clone().into_os_string(),
            "--name".into(),
            self.name.clone().into(),
            "--data-dir".into(),
            self.data_dir.clone().into_os_string(),
            "--initial-advertise-peer-urls".into(),
            self.peer_urls.join(",").into(),
            "--initial-cluster".into(),
            self.initial_cluster().into(),
            "--initial-cluster-token".into(),
            self.initial_cluster_token.clone().into(),
        ]
    }

    fn validate(&self) -> Result<()> {
        if !crate::fs::file_exists(&self.snapshot_path) {
            return Err(RecoveryError::NotFound(format!(
                "snapshot file {}",
                self.snapshot_path.display()
            )));
        }
        if self.name.is_empty() || self.peer_urls.is_empty() {
            return Err(RecoveryError::Precondition(
                "restore needs a member name and at least one peer URL".to_string(),
            ));
        }
        if self.data_dir.exists() {
            return Err(RecoveryError::AlreadyExists(format!(
                "data directory {} (remove it before restoring)",
                self.data_dir.display()
            )));
        }
        Ok(())
    }
}

/// etcd's own restore routine.
#[async_trait]
pub trait SnapshotRestorer: Send + Sync {
    async fn restore(&self, config: &RestoreConfig) -> Result<()>;
}

/// Runs `etcdutl snapshot restore`.
#[derive(Debug, Clone)]
pub struct EtcdutlRestorer {
    program: String,
}

impl EtcdutlRestorer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl SnapshotRestorer for EtcdutlRestorer {
    async fn restore(&self, config: &RestoreConfig) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(config.args())
            .status()
            .await
            .map_err(|e| RecoveryError::io(&self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(RecoveryError::process(
                format!("{} snapshot restore {}", self.program, config.snapshot_path.display()),
                status,
            ))
        }
    }
}

/// Rebuild `config.data_dir` from `config.snapshot_path`.
pub async fn restore_snapshot<R: SnapshotRestorer + ?Sized>(restorer: &R, config: &RestoreConfig) -> Result<()> {
    config.validate()?;
    info!(
        "Restoring {} into {} as member {}",
        config.snapshot_path.display(),
        config.data_dir.display(),
        config.name
    );
    restorer.restore(config).await?;
    info!("Restored etcd data-dir {}", config.data_dir.display());
    Ok(())
}
