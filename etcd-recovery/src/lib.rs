//! etcd disaster-recovery library
//!
//! Stages backups, stops and starts the static-pod etcd member, streams
//! snapshots, and reconciles cluster membership for a broken control-plane
//! host.

pub mod backup;
pub mod client;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod fs;
pub mod lifecycle;
pub mod membership;
pub mod recovery;
pub mod snapshot;
pub mod transfer;
pub mod utils;
pub mod workspace;

// Re-export commonly used types
pub use config::Config;
pub use recovery::Recovery;
pub use utils::errors::{ErrorKind, RecoveryError};
pub use workspace::Workspace;
pub type Result<T> = std::result::Result<T, RecoveryError>;
