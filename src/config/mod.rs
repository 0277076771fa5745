//! Configuration module for backup_manager
//!
//! Provides CLI arguments, environment fallbacks and runtime settings.

mod settings;

pub use settings::*;
