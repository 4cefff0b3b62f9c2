//! Process-level signal handling.

pub mod shutdown;

pub use shutdown::ShutdownWatcher;
