//! Configuration management for the harness.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`FORK_CHECK__BUILD__TIMEOUT_SECS=600` sets `build.timeout_secs`).

use crate::invoker::StageCommand;
use crate::manifest::ManifestFields;
use crate::utils::errors::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "FORK_CHECK";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manifest: ManifestConfig,

    #[serde(default)]
    pub build: StageConfig,

    #[serde(default)]
    pub test: StageConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Path to the dependency manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Key holding the dependency source URL
    #[serde(default = "default_source_key")]
    pub source_key: String,

    /// Key holding the branch name
    #[serde(default = "default_branch_key")]
    pub branch_key: String,

    /// Restrict the search to the table of this dependency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,

    /// Ref used when the candidate branch is left empty
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Program to run (looked up on PATH)
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments; the stage's own default (`build` / `test`) when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Working directory (default: the manifest's directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Wall-clock limit in seconds, 0 disables it
    #[serde(default)]
    pub timeout_secs: u64,

    /// Seconds between SIGTERM and SIGKILL when stopping the tool
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_source_key() -> String {
    "source".to_string()
}

fn default_branch_key() -> String {
    "branch".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_program() -> String {
    "cargo".to_string()
}

fn default_kill_grace_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            path: None,
            source_key: default_source_key(),
            branch_key: default_branch_key(),
            dependency: None,
            default_branch: default_branch(),
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: None,
            working_dir: None,
            timeout_secs: 0,
            kill_grace_secs: default_kill_grace_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Toml));
        }
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HarnessError::Config(e.to_string()))
    }

    pub fn manifest_path(&self) -> Result<&Path> {
        self.manifest
            .path
            .as_deref()
            .ok_or_else(|| HarnessError::Config("no manifest path given (--manifest or manifest.path)".into()))
    }

    pub fn manifest_fields(&self) -> ManifestFields {
        ManifestFields {
            source_key: self.manifest.source_key.clone(),
            branch_key: self.manifest.branch_key.clone(),
            dependency: self.manifest.dependency.clone(),
        }
    }

    pub fn build_command(&self) -> Result<StageCommand> {
        self.build.command("build", &["build"], self.manifest_path()?)
    }

    pub fn test_command(&self) -> Result<StageCommand> {
        self.test.command("test", &["test"], self.manifest_path()?)
    }
}

impl StageConfig {
    fn command(&self, name: &str, default_args: &[&str], manifest: &Path) -> Result<StageCommand> {
        if self.program.trim().is_empty() {
            return Err(HarnessError::Config(format!("{name}.program is empty")));
        }

        let args = match &self.args {
            Some(args) => args.clone(),
            None => default_args.iter().map(|a| a.to_string()).collect(),
        };

        let working_dir = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => manifest_dir(manifest),
        };

        Ok(StageCommand {
            name: name.to_string(),
            program: self.program.clone(),
            args,
            working_dir,
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            kill_grace: Duration::from_secs(self.kill_grace_secs),
        })
    }
}

/// Directory containing the manifest; `.` only for a bare relative file name.
fn manifest_dir(manifest: &Path) -> PathBuf {
    match manifest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
