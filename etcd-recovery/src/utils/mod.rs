//! Utility modules for the recovery tool.

pub mod errors;
pub mod logger;

pub use errors::{ErrorKind, RecoveryError, Result};
