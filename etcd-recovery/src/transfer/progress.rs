//! Byte accounting for snapshot transfers.
//!
//! A snapshot's size is unknown until the stream ends, so progress is
//! reported as bytes received and throughput rather than a percentage.

use std::time::{Duration, Instant};

/// Running totals for one transfer
#[derive(Debug, Clone)]
pub struct TransferStats {
    started: Instant,

    /// Bytes received so far
    pub bytes: u64,

    /// Chunks received so far
    pub chunks: u64,
}

impl TransferStats {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            bytes: 0,
            chunks: 0,
        }
    }

    pub fn record(&mut self, chunk_len: usize) {
        self.bytes += chunk_len as u64;
        self.chunks += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average speed since start, in bytes/second
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} in {} ({})",
            format_bytes(self.bytes),
            format_duration(self.elapsed().as_secs()),
            format_speed(self.average_speed())
        )
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
