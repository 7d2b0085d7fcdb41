//! Error types for the fork validation harness.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("Failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Restoring the manifest failed: the repository is left pointing at the
/// candidate fork. Carries the original content so it can be put back by hand.
#[derive(Error, Debug)]
#[error("Failed to restore {}: {source}", path.display())]
pub struct RestoreError {
    pub path: PathBuf,
    pub original: String,
    #[source]
    pub source: std::io::Error,
}

pub type Result<T> = std::result::Result<T, HarnessError>;
