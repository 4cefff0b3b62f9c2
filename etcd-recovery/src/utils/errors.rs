//! Error taxonomy for the recovery tool.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;

/// Coarse error classes surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Protocol,
    Precondition,
    NotFound,
    AlreadyExists,
    Config,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` failed: {status}")]
    Process { command: String, status: String },

    #[error("Protocol error ({endpoint}): {message}")]
    Protocol { endpoint: String, message: String },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl RecoveryError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        RecoveryError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn protocol(endpoint: impl Into<String>, message: impl ToString) -> Self {
        RecoveryError::Protocol {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// A child process ran but exited unsuccessfully.
    pub fn process(command: impl Into<String>, status: ExitStatus) -> Self {
        RecoveryError::Process {
            command: command.into(),
            status: status.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RecoveryError::Io { .. } | RecoveryError::Process { .. } => ErrorKind::Io,
            RecoveryError::Protocol { .. } => ErrorKind::Protocol,
            RecoveryError::Precondition(_) => ErrorKind::Precondition,
            RecoveryError::NotFound(_) => ErrorKind::NotFound,
            RecoveryError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            RecoveryError::Config(_) => ErrorKind::Config,
            RecoveryError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_path() {
        let err = RecoveryError::io(
            "/etc/kubernetes/manifests/etcd-member.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("etcd-member.yaml"));
    }

    #[test]
    fn test_protocol_error_names_endpoint() {
        let err = RecoveryError::protocol("https://10.0.0.1:2379", "connection refused");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("https://10.0.0.1:2379"));
    }
}
