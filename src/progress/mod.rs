//! Progress reporting module
//!
//! Provides real-time progress visualization for backup and restore
//! transfers, with file and byte bars and throughput display.

mod reporter;

pub use reporter::*;
