//! File system module
//!
//! Provides the directory scanner that turns a tree into a manifest,
//! and the atomic file writer used by restore.

mod scanner;
mod writer;

pub use scanner::*;
pub use writer::*;
