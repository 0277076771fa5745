//! Manifest and drift model
//!
//! Provides the dataset manifest, its JSON form, and the drift
//! comparison shared by the verifier and the backup pre-check.

mod drift;
mod manifest;

pub use drift::*;
pub use manifest::*;
