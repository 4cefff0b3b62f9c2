//! Locating dynamically named resources on the host.
//!
//! The kube-apiserver static pod keeps numbered revisions of its resources
//! (`kube-apiserver-pod-<N>`), and the certificate-recovery agent drops one
//! `system:etcd-*` file per generated certificate. Neither name is fixed, so
//! both are found by pattern matching.

use crate::utils::errors::{RecoveryError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Numbered apiserver revisions, relative to the Kubernetes config dir.
pub const APISERVER_POD_GLOB: &str = "static-pod-resources/kube-apiserver-pod-[0-9]*";

/// Generated etcd certificates and keys.
pub const ETCD_CERT_GLOB: &str = "system:etcd-*";

/// Resources expected once certificate generation has finished.
pub const DEFAULT_CERT_QUORUM: usize = 9;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const CA_BUNDLE: &str = "configmaps/etcd-serving-ca/ca-bundle.crt";
const CLIENT_CERT: &str = "secrets/etcd-client/tls.crt";
const CLIENT_KEY: &str = "secrets/etcd-client/tls.key";

/// Client TLS material found in one apiserver revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertBundle {
    pub ca_bundle: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl ClientCertBundle {
    /// Bundle paths under an apiserver revision directory, if all three exist.
    fn in_revision(dir: &Path) -> Option<Self> {
        let bundle = Self {
            ca_bundle: dir.join(CA_BUNDLE),
            cert: dir.join(CLIENT_CERT),
            key: dir.join(CLIENT_KEY),
        };
        let complete = [&bundle.ca_bundle, &bundle.cert, &bundle.key]
            .iter()
            .all(|p| crate::fs::file_exists(p));
        complete.then_some(bundle)
    }
}

/// Expand `pattern` under `dir`. The directory part is escaped so only the
/// file-name pattern is interpreted.
pub fn glob_in(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let full_pattern = format!("{}/{}", escaped, pattern);

    let paths = glob::glob(&full_pattern).map_err(|e| {
        RecoveryError::io(dir, io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    })?;

    let mut matches = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => matches.push(path),
            Err(e) => {
                let path = e.path().to_path_buf();
                return Err(RecoveryError::io(path, e.into_error()));
            }
        }
    }
    Ok(matches)
}

/// Revision number of a `kube-apiserver-pod-<N>` directory.
fn revision_of(path: &Path) -> u64 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Find the client certificate bundle in the newest apiserver revision that
/// has a complete set, trying older revisions in turn.
pub fn find_client_cert_bundle(config_dir: &Path) -> Result<ClientCertBundle> {
    let mut candidates: Vec<PathBuf> = glob_in(config_dir, APISERVER_POD_GLOB)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    candidates.sort_by_key(|p| std::cmp::Reverse(revision_of(p)));

    for dir in &candidates {
        if let Some(bundle) = ClientCertBundle::in_revision(dir) {
            info!("etcd client certs found in {}", dir.display());
            return Ok(bundle);
        }
        debug!("{} does not contain etcd client certs, trying next", dir.display());
    }

    Err(RecoveryError::NotFound(format!(
        "no etcd client certs under {} ({} candidate directories)",
        config_dir.join(APISERVER_POD_GLOB).display(),
        candidates.len()
    )))
}

/// All `system:etcd-*` resources in `dir`.
pub fn find_etcd_certs(dir: &Path) -> Result<Vec<PathBuf>> {
    glob_in(dir, ETCD_CERT_GLOB)
}

/// Poll `count` until it reports at least `threshold`.
///
/// The first poll happens immediately, then once per `interval`. Returns the
/// final count, or `Cancelled` as soon as `cancel` fires.
pub async fn wait_for_quorum<F>(
    mut count: F,
    threshold: usize,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<usize>
where
    F: FnMut() -> Result<usize>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(RecoveryError::Cancelled("certificate quorum wait".to_string()));
        }

        let observed = count()?;
        if observed >= threshold {
            return Ok(observed);
        }
        info!("Waiting for certs to generate ({}/{})", observed, threshold);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                return Err(RecoveryError::Cancelled(format!(
                    "certificate quorum wait at {}/{}",
                    observed, threshold
                )));
            }
        }
    }
}

/// Block until `dir` holds `threshold` generated etcd certificates.
pub async fn wait_for_certificate_quorum(
    dir: &Path,
    threshold: usize,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<usize> {
    wait_for_quorum(|| find_etcd_certs(dir).map(|c| c.len()), threshold, interval, cancel).await
}
