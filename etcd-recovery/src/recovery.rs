//! Top-level recovery procedures.
//!
//! Each procedure runs its steps in order and stops at the first failure.
//! Nothing is rolled back: the workspace is the checkpoint, and every step
//! either is idempotent or checks whether an earlier run already did it.

use crate::backup::{self, BackupOutcome, MANIFEST_FILE};
use crate::client::{Connector, Member};
use crate::config::{ClientConfig, Config};
use crate::discovery;
use crate::fs::MoveReport;
use crate::lifecycle::{self, ManifestState, ServiceSupervisor, CERT_RECOVERY_MANIFEST};
use crate::membership;
use crate::snapshot::{self, RestoreConfig, SavedSnapshot, SnapshotRestorer};
use crate::utils::errors::{ErrorKind, RecoveryError, Result};
use crate::workspace::Workspace;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// etcd client port on every control-plane host.
pub const CLIENT_PORT: u16 = 2379;

/// Log a failed step by name and pass the error through unchanged.
fn step<T>(name: &str, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Recovery step '{}' failed: {}", name, e);
            Err(e)
        }
    }
}

fn require_complete(name: &str, outcome: BackupOutcome) -> Result<BackupOutcome> {
    match outcome {
        BackupOutcome::Partial(report) => Err(RecoveryError::Precondition(format!(
            "{} incomplete, failed entries: {:?}",
            name,
            report.failed_paths()
        ))),
        other => Ok(other),
    }
}

pub struct Recovery<C, S, R> {
    config: Config,
    connector: C,
    supervisor: S,
    restorer: R,
}

impl<C, S, R> Recovery<C, S, R>
where
    C: Connector,
    S: ServiceSupervisor,
    R: SnapshotRestorer,
{
    pub fn new(config: Config, connector: C, supervisor: S, restorer: R) -> Self {
        Self {
            config,
            connector,
            supervisor,
            restorer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.config.paths.asset_dir)
    }

    /// Client settings for `endpoints`, using the backed-up TLS bundle when
    /// configured and present.
    fn client_config(&self, endpoints: Vec<String>) -> ClientConfig {
        let mut client = self.config.client.with_endpoints(endpoints);
        if client.use_backup_certs && client.tls.is_none() {
            client.tls = backup::available_client_tls(&self.workspace());
        }
        client
    }

    /// Stop etcd unless an earlier run already did.
    fn ensure_etcd_stopped(&self, ws: &Workspace) -> Result<()> {
        let active = &self.config.paths.manifest_dir;
        let stopped = ws.manifests_stopped_dir();

        match lifecycle::manifest_state(active, &stopped, MANIFEST_FILE)? {
            ManifestState::Active => lifecycle::stop_manifest(active, &stopped, MANIFEST_FILE),
            ManifestState::Stopped => {
                info!("etcd already stopped ({} in {})", MANIFEST_FILE, stopped.display());
                Ok(())
            }
        }
    }

    /// Prepare this host and announce it to the surviving cluster at `peer_ip`.
    pub async fn add_member(&self, peer_ip: &str, name: &str, peer_urls: &[String]) -> Result<Member> {
        let paths = &self.config.paths;
        let ws = self.workspace();
        info!("Adding member {} via {}", name, peer_ip);

        step("init", ws.init())?;
        step("backup manifest", backup::backup_manifest(&paths.manifest_dir, &ws))?;
        step("backup etcd.conf", backup::backup_etcd_conf(&paths.etcd_conf, &ws))?;
        step("backup client certs", backup::backup_client_certs(&paths.config_dir, &ws))?;
        step("stop etcd", self.ensure_etcd_stopped(&ws))?;

        let client = self.client_config(vec![format!("https://{}:{}", peer_ip, CLIENT_PORT)]);
        step(
            "member add",
            membership::add_member(&self.connector, &client, peer_urls).await,
        )
    }

    /// Remove `name` from the cluster reachable at `endpoints`.
    pub async fn remove_member(&self, name: &str, endpoints: Vec<String>) -> Result<u64> {
        let ws = self.workspace();

        step("init", ws.init())?;
        step(
            "backup client certs",
            backup::backup_client_certs(&self.config.paths.config_dir, &ws),
        )?;

        let client = self.client_config(endpoints);
        step(
            "member remove",
            membership::remove_member(&self.connector, &client, name).await,
        )
    }

    /// Save a snapshot from the single endpoint in `endpoints` to `dest`.
    pub async fn save_snapshot(&self, dest: &Path, endpoints: Vec<String>) -> Result<SavedSnapshot> {
        let client = self.client_config(endpoints);
        step(
            "save snapshot",
            snapshot::save_snapshot(&self.connector, &client, dest).await,
        )
    }

    /// Replace this member's data with `snapshot_path` and start it again.
    pub async fn restore(&self, snapshot_path: &Path, peer_urls: Vec<String>) -> Result<()> {
        let paths = &self.config.paths;
        let ws = self.workspace();
        let restore = RestoreConfig::new(snapshot_path, &paths.data_dir, &self.config.restore, peer_urls);

        step("init", ws.init())?;
        step("backup manifest", backup::backup_manifest(&paths.manifest_dir, &ws))?;
        step("stop etcd", self.ensure_etcd_stopped(&ws))?;

        // the directory backed up here is the one removed below
        match backup::backup_data_dir(&restore.data_dir, &ws) {
            Ok(outcome) => {
                step("backup data-dir", require_complete("data-dir backup", outcome))?;
            }
            Err(e) if matches!(e.kind(), ErrorKind::Precondition | ErrorKind::AlreadyExists) => {
                warn!("{}; continuing", e);
            }
            Err(e) => return step("backup data-dir", Err(e)),
        }

        step("remove data-dir", backup::remove_data_dir(&restore.data_dir))?;
        step(
            "restore snapshot",
            snapshot::restore_snapshot(&self.restorer, &restore).await,
        )?;

        let stopped = ws.manifests_stopped_dir();
        step(
            "start etcd",
            lifecycle::start_manifest(&paths.manifest_dir, &stopped, MANIFEST_FILE),
        )
    }

    /// Regenerate the `system:etcd-*` certificates with the recovery agent.
    ///
    /// The agent's manifest is expected in the stopped-manifests directory.
    /// When an earlier run left the agent running, its certificates are kept
    /// and the wait resumes. A cancelled wait parks the agent again.
    pub async fn recover_certs(&self, cancel: &CancellationToken) -> Result<usize> {
        let paths = &self.config.paths;
        let certs = &self.config.certs;
        let ws = self.workspace();
        let stopped = ws.manifests_stopped_dir();

        step("init", ws.init())?;

        let agent = step(
            "locate cert recovery",
            lifecycle::manifest_state(&paths.manifest_dir, &stopped, CERT_RECOVERY_MANIFEST),
        )?;
        match agent {
            ManifestState::Stopped => {
                step(
                    "backup certs",
                    backup::backup_etcd_certs(&paths.static_resource_dir, &ws)
                        .and_then(|o| require_complete("certificate backup", o)),
                )?;

                let removed = step("remove certs", backup::remove_etcd_certs(&paths.static_resource_dir))?;
                if !removed.is_complete() {
                    return step(
                        "remove certs",
                        Err(RecoveryError::Precondition(format!(
                            "could not remove {:?}",
                            removed.failed_paths()
                        ))),
                    );
                }

                step(
                    "start cert recovery",
                    lifecycle::start_manifest(&paths.manifest_dir, &stopped, CERT_RECOVERY_MANIFEST),
                )?;
            }
            ManifestState::Active => {
                info!("Certificate recovery agent already running, resuming wait");
            }
        }

        step(
            "start kubelet",
            lifecycle::start_supervised_service(&self.supervisor, &self.config.supervisor.unit),
        )?;

        let waited = discovery::wait_for_certificate_quorum(
            &paths.static_resource_dir,
            certs.quorum_threshold,
            certs.poll_interval(),
            cancel,
        )
        .await;
        if matches!(&waited, Err(e) if e.kind() == ErrorKind::Cancelled) {
            if let Err(e) = lifecycle::stop_manifest(&paths.manifest_dir, &stopped, CERT_RECOVERY_MANIFEST) {
                warn!("Could not park the certificate recovery agent: {}", e);
            }
        }
        let count = step("wait for certs", waited)?;

        step(
            "stop cert recovery",
            lifecycle::stop_manifest(&paths.manifest_dir, &stopped, CERT_RECOVERY_MANIFEST),
        )?;
        info!("Certificate recovery complete: {} resources", count);
        Ok(count)
    }

    /// Park every static pod on the host and stop the kubelet.
    pub fn stop_static_pods(&self) -> Result<MoveReport> {
        let ws = self.workspace();
        step("init", ws.init())?;
        let report = step(
            "stop static pods",
            lifecycle::stop_all(&self.config.paths.manifest_dir, &ws.manifests_stopped_dir()),
        )?;
        step(
            "stop kubelet",
            lifecycle::stop_supervised_service(&self.supervisor, &self.config.supervisor.unit),
        )?;
        Ok(report)
    }

    /// Start the kubelet and bring every parked static pod back.
    pub fn start_static_pods(&self) -> Result<MoveReport> {
        let ws = self.workspace();
        let report = step(
            "start static pods",
            lifecycle::start_all(&self.config.paths.manifest_dir, &ws.manifests_stopped_dir()),
        )?;
        step(
            "start kubelet",
            lifecycle::start_supervised_service(&self.supervisor, &self.config.supervisor.unit),
        )?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::FakeConnector;
    use async_trait::async_trait;
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeSupervisor {
        calls: RefCell<Vec<String>>,
    }

    impl ServiceSupervisor for FakeSupervisor {
        fn stop(&self, unit: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("stop {}", unit));
            Ok(())
        }

        fn reload(&self) -> Result<()> {
            self.calls.borrow_mut().push("daemon-reload".to_string());
            Ok(())
        }

        fn start(&self, unit: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("start {}", unit));
            Ok(())
        }
    }

    /// Writes the snapshot bytes as the restored backend database.
    #[derive(Default)]
    struct CopyRestorer {
        restored: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl SnapshotRestorer for CopyRestorer {
        async fn restore(&self, config: &RestoreConfig) -> Result<()> {
            let db = config.data_dir.join(backup::SNAPSHOT_DB);
            fs::create_dir_all(db.parent().unwrap()).unwrap();
            fs::copy(&config.snapshot_path, &db).unwrap();
            self.restored.lock().unwrap().push(config.data_dir.clone());
            Ok(())
        }
    }

    struct Host {
        _temp_dir: TempDir,
        config: Config,
    }

    /// A control-plane host with a running etcd and apiserver client certs.
    fn host() -> Host {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let mut config = Config::default();
        config.paths.asset_dir = root.join("assets");
        config.paths.manifest_dir = root.join("etc/kubernetes/manifests");
        config.paths.config_dir = root.join("etc/kubernetes");
        config.paths.etcd_conf = root.join("etc/etcd/etcd.conf");
        config.paths.data_dir = root.join("var/lib/etcd");
        config.paths.static_resource_dir = root.join("etc/kubernetes/static-pod-resources/etcd-member");
        config.restore.name = "master-1".to_string();
        config.certs.poll_interval_secs = 0;

        fs::create_dir_all(&config.paths.manifest_dir).unwrap();
        fs::write(config.paths.manifest_dir.join(MANIFEST_FILE), b"kind: Pod").unwrap();
        fs::create_dir_all(root.join("etc/etcd")).unwrap();
        fs::write(&config.paths.etcd_conf, b"ETCD_NAME=master-1").unwrap();

        let revision = config
            .paths
            .config_dir
            .join("static-pod-resources/kube-apiserver-pod-3");
        fs::create_dir_all(revision.join("configmaps/etcd-serving-ca")).unwrap();
        fs::create_dir_all(revision.join("secrets/etcd-client")).unwrap();
        fs::write(revision.join("configmaps/etcd-serving-ca/ca-bundle.crt"), b"ca").unwrap();
        fs::write(revision.join("secrets/etcd-client/tls.crt"), b"crt").unwrap();
        fs::write(revision.join("secrets/etcd-client/tls.key"), b"key").unwrap();

        let db = config.paths.data_dir.join(backup::SNAPSHOT_DB);
        fs::create_dir_all(db.parent().unwrap()).unwrap();
        fs::write(&db, b"old-db").unwrap();

        Host {
            _temp_dir: temp_dir,
            config,
        }
    }

    fn recovery(
        config: &Config,
        connector: FakeConnector,
    ) -> Recovery<FakeConnector, FakeSupervisor, CopyRestorer> {
        Recovery::new(
            config.clone(),
            connector,
            FakeSupervisor::default(),
            CopyRestorer::default(),
        )
    }

    fn peer_urls() -> Vec<String> {
        vec!["https://10.0.0.2:2380".to_string()]
    }

    #[tokio::test]
    async fn test_add_member_stages_and_stops_etcd() -> Result<()> {
        let host = host();
        let connector = FakeConnector::with_members(&[("master-0", 7)]);
        let recovery = recovery(&host.config, connector.clone());

        let member = recovery.add_member("10.0.0.1", "master-1", &peer_urls()).await?;

        let backup = recovery.workspace().backup_dir();
        assert!(backup.join("etcd-member.yaml").is_file());
        assert!(backup.join("etcd.conf").is_file());
        assert!(backup.join("etcd-client.key").is_file());
        assert!(!host.config.paths.manifest_dir.join(MANIFEST_FILE).exists());
        assert_eq!(member.peer_urls, peer_urls());
        assert_eq!(connector.state.lock().unwrap().members.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_member_rerun_after_protocol_failure() -> Result<()> {
        let host = host();
        let connector = FakeConnector::with_members(&[("master-0", 7)]);
        connector.state.lock().unwrap().fail_rpc = true;
        let recovery = recovery(&host.config, connector.clone());

        let err = recovery
            .add_member("10.0.0.1", "master-1", &peer_urls())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        // etcd stays stopped and backups stay in place; the re-run picks up from there
        connector.state.lock().unwrap().fail_rpc = false;
        recovery.add_member("10.0.0.1", "master-1", &peer_urls()).await?;
        assert_eq!(connector.state.lock().unwrap().connects, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_member_halts_before_contacting_cluster() {
        let host = host();
        fs::remove_file(host.config.paths.manifest_dir.join(MANIFEST_FILE)).unwrap();
        let connector = FakeConnector::default();
        let recovery = recovery(&host.config, connector.clone());

        let err = recovery
            .add_member("10.0.0.1", "master-1", &peer_urls())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(connector.state.lock().unwrap().connects, 0);
    }

    #[tokio::test]
    async fn test_remove_member() -> Result<()> {
        let host = host();
        let connector = FakeConnector::with_members(&[("master-0", 7), ("master-1", 8)]);
        let recovery = recovery(&host.config, connector.clone());

        let id = recovery
            .remove_member("master-1", vec!["https://10.0.0.1:2379".to_string()])
            .await?;
        assert_eq!(id, 8);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_uses_backed_up_tls() -> Result<()> {
        let host = host();
        let recovery = recovery(&host.config, FakeConnector::default());
        recovery.remove_member("x", vec![]).await.ok();

        let client = recovery.client_config(vec!["https://10.0.0.1:2379".to_string()]);
        let tls = client.tls.expect("tls from backup");
        assert_eq!(tls, backup::backed_up_client_tls(&recovery.workspace()));
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_replaces_data_and_restarts() -> Result<()> {
        let host = host();
        let snapshot = host.config.paths.asset_dir.with_file_name("snapshot.db");
        fs::write(&snapshot, b"new-db").unwrap();
        let recovery = recovery(&host.config, FakeConnector::default());

        recovery.restore(&snapshot, peer_urls()).await?;

        let ws = recovery.workspace();
        let data_db = host.config.paths.data_dir.join(backup::SNAPSHOT_DB);
        assert_eq!(fs::read(&data_db).unwrap(), b"new-db");
        assert_eq!(
            fs::read(ws.backup_dir().join("etcd").join(backup::SNAPSHOT_DB)).unwrap(),
            b"old-db"
        );
        assert!(host.config.paths.manifest_dir.join(MANIFEST_FILE).is_file());
        assert!(!ws.manifests_stopped_dir().join(MANIFEST_FILE).exists());
        assert_eq!(
            *recovery.restorer.restored.lock().unwrap(),
            vec![host.config.paths.data_dir.clone()]
        );
        assert!(ws.backup_dir().join(backup::DATA_DIR_COMPLETE).is_file());
        Ok(())
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_restore_keeps_live_data_while_backup_is_incomplete() {
        use std::os::unix::net::UnixListener;

        let host = host();
        let wal = host.config.paths.data_dir.join("member/wal");
        fs::create_dir_all(&wal).unwrap();
        let _listener = UnixListener::bind(wal.join("sock")).unwrap();
        let snapshot = host.config.paths.asset_dir.with_file_name("snapshot.db");
        fs::write(&snapshot, b"new-db").unwrap();
        let recovery = recovery(&host.config, FakeConnector::default());

        for _ in 0..2 {
            let err = recovery.restore(&snapshot, peer_urls()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Precondition);
        }

        let data_db = host.config.paths.data_dir.join(backup::SNAPSHOT_DB);
        assert_eq!(fs::read(&data_db).unwrap(), b"old-db");
        assert!(recovery.restorer.restored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_certs() -> Result<()> {
        let host = host();
        let paths = &host.config.paths;
        let ws = Workspace::new(&paths.asset_dir);
        fs::create_dir_all(ws.manifests_stopped_dir()).unwrap();
        fs::write(ws.manifests_stopped_dir().join(CERT_RECOVERY_MANIFEST), b"kind: Pod").unwrap();
        fs::create_dir_all(&paths.static_resource_dir).unwrap();
        fs::write(paths.static_resource_dir.join("system:etcd-peer:old.crt"), b"old").unwrap();

        // stands in for the recovery agent; runs once the quorum wait yields
        let resources = paths.static_resource_dir.clone();
        let agent = tokio::spawn(async move {
            for i in 0..discovery::DEFAULT_CERT_QUORUM {
                fs::write(resources.join(format!("system:etcd-new-{}.crt", i)), b"new").unwrap();
            }
        });

        let recovery = recovery(&host.config, FakeConnector::default());
        let count = recovery.recover_certs(&CancellationToken::new()).await?;
        agent.await.unwrap();

        assert_eq!(count, discovery::DEFAULT_CERT_QUORUM);
        assert!(ws.backup_dir().join("system:etcd-peer:old.crt").is_file());
        assert!(!paths.static_resource_dir.join("system:etcd-peer:old.crt").exists());
        assert!(ws.manifests_stopped_dir().join(CERT_RECOVERY_MANIFEST).is_file());
        assert_eq!(
            *recovery.supervisor.calls.borrow(),
            vec!["daemon-reload".to_string(), "start kubelet.service".to_string()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_recover_certs_rerun_after_cancel() -> Result<()> {
        let host = host();
        let paths = &host.config.paths;
        let ws = Workspace::new(&paths.asset_dir);
        fs::create_dir_all(ws.manifests_stopped_dir()).unwrap();
        fs::write(ws.manifests_stopped_dir().join(CERT_RECOVERY_MANIFEST), b"kind: Pod").unwrap();
        fs::create_dir_all(&paths.static_resource_dir).unwrap();
        fs::write(paths.static_resource_dir.join("system:etcd-peer:old.crt"), b"old").unwrap();

        let recovery = recovery(&host.config, FakeConnector::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = recovery.recover_certs(&cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(ws.manifests_stopped_dir().join(CERT_RECOVERY_MANIFEST).is_file());
        assert!(!paths.manifest_dir.join(CERT_RECOVERY_MANIFEST).exists());

        // what the agent managed before it was interrupted
        for i in 0..3 {
            fs::write(paths.static_resource_dir.join(format!("system:etcd-partial-{}.crt", i)), b"p").unwrap();
        }
        let resources = paths.static_resource_dir.clone();
        let agent = tokio::spawn(async move {
            for i in 0..discovery::DEFAULT_CERT_QUORUM {
                fs::write(resources.join(format!("system:etcd-new-{}.crt", i)), b"new").unwrap();
            }
        });

        let count = recovery.recover_certs(&CancellationToken::new()).await?;
        agent.await.unwrap();

        assert_eq!(count, discovery::DEFAULT_CERT_QUORUM);
        assert_eq!(fs::read(ws.backup_dir().join("system:etcd-peer:old.crt")).unwrap(), b"old");
        assert!(!paths.static_resource_dir.join("system:etcd-partial-0.crt").exists());
        assert!(ws.manifests_stopped_dir().join(CERT_RECOVERY_MANIFEST).is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_recover_certs_resumes_running_agent() -> Result<()> {
        let host = host();
        let paths = &host.config.paths;
        let ws = Workspace::new(&paths.asset_dir);
        fs::write(paths.manifest_dir.join(CERT_RECOVERY_MANIFEST), b"kind: Pod").unwrap();
        fs::create_dir_all(&paths.static_resource_dir).unwrap();
        for i in 0..discovery::DEFAULT_CERT_QUORUM {
            fs::write(paths.static_resource_dir.join(format!("system:etcd-new-{}.crt", i)), b"new").unwrap();
        }

        let recovery = recovery(&host.config, FakeConnector::default());
        let count = recovery.recover_certs(&CancellationToken::new()).await?;

        assert_eq!(count, discovery::DEFAULT_CERT_QUORUM);
        // generated certs are kept, not removed and backed up again
        assert!(paths.static_resource_dir.join("system:etcd-new-0.crt").is_file());
        assert!(!ws.backup_dir().join("system:etcd-new-0.crt").exists());
        assert!(ws.manifests_stopped_dir().join(CERT_RECOVERY_MANIFEST).is_file());
        Ok(())
    }

    #[test]
    fn test_static_pods_round_trip() -> Result<()> {
        let host = host();
        fs::write(host.config.paths.manifest_dir.join("kube-apiserver-pod.yaml"), b"a").unwrap();
        let recovery = recovery(&host.config, FakeConnector::default());

        let stopped = recovery.stop_static_pods()?;
        assert_eq!(stopped.done.len(), 2);
        assert!(fs::read_dir(&host.config.paths.manifest_dir).unwrap().next().is_none());

        let started = recovery.start_static_pods()?;
        assert_eq!(started.done.len(), 2);
        assert_eq!(
            *recovery.supervisor.calls.borrow(),
            vec![
                "stop kubelet.service".to_string(),
                "daemon-reload".to_string(),
                "start kubelet.service".to_string()
            ]
        );
        Ok(())
    }
}
