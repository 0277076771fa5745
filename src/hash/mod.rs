//! Hash computation and integrity verification module
//!
//! Provides BLAKE3 and SHA-256 digests with streaming support.

mod integrity;

pub use integrity::*;
