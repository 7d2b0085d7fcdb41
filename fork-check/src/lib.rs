//! Fork validation harness.
//!
//! Temporarily repoints a dependency manifest at a candidate fork, builds and
//! tests the project, and always puts the manifest back.

pub mod candidate;
pub mod config;
pub mod harness;
pub mod invoker;
pub mod manifest;
pub mod shutdown;
pub mod utils;

// Re-export commonly used types
pub use candidate::Candidate;
pub use config::Config;
pub use harness::{Harness, RunOutcome, RunReport};
pub use utils::errors::{HarnessError, RestoreError};
pub type Result<T> = std::result::Result<T, HarnessError>;
