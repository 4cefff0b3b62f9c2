//! Snapshot transfer accounting.

pub mod progress;
pub mod progress_stream;

pub use progress::{format_bytes, TransferStats};
pub use progress_stream::ProgressStream;
