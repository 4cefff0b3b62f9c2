//! Configuration management for the recovery tool.
//!
//! Loads configuration from a TOML file; command-line flags override
//! individual values before the config is handed to each operation.

use crate::discovery;
use crate::utils::errors::{RecoveryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub certs: CertsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub restore: RestoreSettings,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the recovery workspace
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,

    /// Directory the kubelet watches for static pod manifests
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,

    /// Kubernetes configuration root (holds static-pod-resources)
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// etcd service configuration file
    #[serde(default = "default_etcd_conf")]
    pub etcd_conf: PathBuf,

    /// Live etcd data directory; also the target of a snapshot restore
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory holding the generated `system:etcd-*` certificates
    #[serde(default = "default_static_resource_dir")]
    pub static_resource_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client endpoints (e.g. https://10.0.0.1:2379)
    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,

    /// Per-request timeout
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Load TLS material from the workspace backup directory when present
    #[serde(default = "default_true")]
    pub use_backup_certs: bool,

    #[serde(skip)]
    pub tls: Option<TlsFiles>,
}

/// PEM files used for mutual TLS against the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertsConfig {
    /// Number of `system:etcd-*` resources that make a complete set
    #[serde(default = "default_quorum_threshold")]
    pub quorum_threshold: usize,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Optional deadline for the quorum wait; unset waits until cancelled
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_supervisor_program")]
    pub program: String,

    #[serde(default = "default_supervisor_unit")]
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreSettings {
    /// Tool that performs the snapshot restore
    #[serde(default = "default_restore_program")]
    pub program: String,

    /// Member name; defaults to the host name
    #[serde(default = "default_member_name")]
    pub name: String,

    /// Initial cluster descriptor (name=peerURL,...)
    #[serde(default)]
    pub initial_cluster: String,

    #[serde(default = "default_initial_cluster_token")]
    pub initial_cluster_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_asset_dir() -> PathBuf {
    PathBuf::from("./assets")
}

fn default_manifest_dir() -> PathBuf {
    PathBuf::from("/etc/kubernetes/manifests")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/kubernetes")
}

fn default_etcd_conf() -> PathBuf {
    PathBuf::from("/etc/etcd/etcd.conf")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/etcd")
}

fn default_static_resource_dir() -> PathBuf {
    PathBuf::from("/etc/kubernetes/static-pod-resources/etcd-member")
}

fn default_dial_timeout_secs() -> u64 {
    5
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_quorum_threshold() -> usize {
    discovery::DEFAULT_CERT_QUORUM
}

fn default_poll_interval_secs() -> u64 {
    discovery::DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_supervisor_program() -> String {
    "systemctl".to_string()
}

fn default_supervisor_unit() -> String {
    "kubelet.service".to_string()
}

fn default_restore_program() -> String {
    "etcdutl".to_string()
}

fn default_member_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "etcd-member".to_string())
}

fn default_initial_cluster_token() -> String {
    "etcd-cluster".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            asset_dir: default_asset_dir(),
            manifest_dir: default_manifest_dir(),
            config_dir: default_config_dir(),
            etcd_conf: default_etcd_conf(),
            data_dir: default_data_dir(),
            static_resource_dir: default_static_resource_dir(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            dial_timeout_secs: default_dial_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            use_backup_certs: true,
            tls: None,
        }
    }
}

impl Default for CertsConfig {
    fn default() -> Self {
        Self {
            quorum_threshold: default_quorum_threshold(),
            poll_interval_secs: default_poll_interval_secs(),
            wait_timeout_secs: None,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: default_supervisor_program(),
            unit: default_supervisor_unit(),
        }
    }
}

impl Default for RestoreSettings {
    fn default() -> Self {
        Self {
            program: default_restore_program(),
            name: default_member_name(),
            initial_cluster: String::new(),
            initial_cluster_token: default_initial_cluster_token(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            paths: PathsConfig::default(),
            client: ClientConfig::default(),
            certs: CertsConfig::default(),
            supervisor: SupervisorConfig::default(),
            restore: RestoreSettings::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RecoveryError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| RecoveryError::Config(format!("{}: {}", path.display(), e)))
    }
}

impl ClientConfig {
    /// Client settings for an explicit endpoint list, inheriting timeouts and TLS.
    pub fn with_endpoints(&self, endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..self.clone()
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Human-readable endpoint list for error messages.
    pub fn endpoint_label(&self) -> String {
        if self.endpoints.is_empty() {
            "<no endpoints>".to_string()
        } else {
            self.endpoints.join(",")
        }
    }
}

impl CertsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

/// Split a comma-separated flag value, dropping empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
