//! Storage layer for librag
//!
//! Durable JSONL(.gz) persistence of index records with append, atomic
//! rewrite and compaction.

pub mod store;

pub use store::{compact_records, CompactReport, IndexFileStore, LoadReport, ReadResult};

/// Format a byte count as a human-readable string
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
