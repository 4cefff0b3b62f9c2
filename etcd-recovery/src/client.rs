//! Administrative client for the etcd cluster.
//!
//! Recovery code talks to the cluster only through [`Connector`] and
//! [`ClusterAdmin`], so the wire client can be swapped for an in-memory one.

use crate::config::{ClientConfig, TlsFiles};
use crate::utils::errors::{RecoveryError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{Certificate, Client, ConnectOptions, Identity, TlsOptions};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tracing::debug;

/// A cluster member as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub name: String,
    /// Assigned by the cluster; 0 never identifies a member
    pub id: u64,
    pub peer_urls: Vec<String>,
    pub client_urls: Vec<String>,
}

impl From<&etcd_client::Member> for Member {
    fn from(m: &etcd_client::Member) -> Self {
        Self {
            name: m.name().to_string(),
            id: m.id(),
            peer_urls: m.peer_urls().to_vec(),
            client_urls: m.client_urls().to_vec(),
        }
    }
}

/// Raw snapshot bytes, in order, from a single member.
pub type SnapshotStream = BoxStream<'static, Result<Bytes>>;

/// Operations of an open administrative connection
#[async_trait]
pub trait ClusterAdmin: Send {
    /// Endpoint(s) this connection was opened against, for error messages.
    fn endpoint(&self) -> &str;

    async fn snapshot(&mut self) -> Result<SnapshotStream>;

    async fn add_member(&mut self, peer_urls: &[String]) -> Result<Member>;

    async fn list_members(&mut self) -> Result<Vec<Member>>;

    async fn remove_member(&mut self, id: u64) -> Result<()>;
}

/// Opens administrative connections.
#[async_trait]
pub trait Connector: Send + Sync {
    type Admin: ClusterAdmin;

    async fn connect(&self, config: &ClientConfig) -> Result<Self::Admin>;
}

/// Connector for a real etcd cluster over gRPC.
#[derive(Debug, Clone, Default)]
pub struct EtcdConnector;

pub struct EtcdAdmin {
    client: Client,
    endpoint: String,
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| RecoveryError::io(path, e))
}

fn tls_options(tls: &TlsFiles) -> Result<TlsOptions> {
    let ca = read_pem(&tls.ca)?;
    let cert = read_pem(&tls.cert)?;
    let key = read_pem(&tls.key)?;

    Ok(TlsOptions::new()
        .ca_certificate(Certificate::from_pem(ca))
        .identity(Identity::from_pem(cert, key)))
}

#[async_trait]
impl Connector for EtcdConnector {
    type Admin = EtcdAdmin;

    async fn connect(&self, config: &ClientConfig) -> Result<EtcdAdmin> {
        let endpoint = config.endpoint_label();
        if config.endpoints.is_empty() {
            return Err(RecoveryError::Config("no etcd endpoints configured".to_string()));
        }

        let mut options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout())
            .with_timeout(config.command_timeout());
        if let Some(tls) = &config.tls {
            options = options.with_tls(tls_options(tls)?);
        }

        debug!("Connecting to etcd at {}", endpoint);
        let client = Client::connect(config.endpoints.clone(), Some(options))
            .await
            .map_err(|e| RecoveryError::protocol(endpoint.clone(), e))?;

        Ok(EtcdAdmin { client, endpoint })
    }
}

#[async_trait]
impl ClusterAdmin for EtcdAdmin {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn snapshot(&mut self) -> Result<SnapshotStream> {
        let endpoint = self.endpoint.clone();
        let streaming = self
            .client
            .snapshot()
            .await
            .map_err(|e| RecoveryError::protocol(endpoint.clone(), e))?;

        let chunks = stream::unfold(Some(streaming), move |state| {
            let endpoint = endpoint.clone();
            async move {
                let Some(mut streaming) = state else {
                    return None;
                };
                match streaming.message().await {
                    Ok(Some(resp)) => Some((Ok(Bytes::copy_from_slice(resp.blob())), Some(streaming))),
                    Ok(None) => None,
                    // end the stream after reporting the error
                    Err(e) => Some((Err(RecoveryError::protocol(endpoint, e)), None)),
                }
            }
        });

        Ok(chunks.boxed())
    }

    async fn add_member(&mut self, peer_urls: &[String]) -> Result<Member> {
        let resp = self
            .client
            .member_add(peer_urls.to_vec(), None)
            .await
            .map_err(|e| RecoveryError::protocol(self.endpoint.clone(), e))?;

        resp.member().map(Member::from).ok_or_else(|| {
            RecoveryError::protocol(self.endpoint.clone(), "member add response carried no member")
        })
    }

    async fn list_members(&mut self) -> Result<Vec<Member>> {
        let resp = self
            .client
            .member_list()
            .await
            .map_err(|e| RecoveryError::protocol(self.endpoint.clone(), e))?;

        Ok(resp.members().iter().map(Member::from).collect())
    }

    async fn remove_member(&mut self, id: u64) -> Result<()> {
        self.client
            .member_remove(id)
            .await
            .map_err(|e| RecoveryError::protocol(self.endpoint.clone(), e))?;
        Ok(())
    }
}
