//! Utility modules for the harness.

pub mod errors;
pub mod logger;

pub use errors::{HarnessError, RestoreError, Result};
