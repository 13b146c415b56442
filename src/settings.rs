//! Runtime settings for the provisioning pipeline.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What to do with the remote sandbox when a pipeline fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// Leave the sandbox running for inspection.
    #[default]
    Retain,
    /// Delete the sandbox once, best effort.
    Delete,
}

/// Pipeline settings, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Delay between polls of a pending pipeline.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Default whole-pipeline timeout, measured from start.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base directory inside the sandbox; repositories clone beneath it.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    /// File name inline bootstrap scripts are uploaded as.
    #[serde(default = "default_bootstrap_script_name")]
    pub bootstrap_script_name: String,
    /// Env-var secret binding used as the clone credential.
    #[serde(default = "default_git_token_secret")]
    pub git_token_secret: String,
    /// Username sent alongside the clone credential.
    #[serde(default = "default_git_username")]
    pub git_username: String,
    /// Maximum characters of command output quoted in failure messages.
    #[serde(default = "default_log_excerpt_chars")]
    pub log_excerpt_chars: usize,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_base_dir() -> String {
    "/home/sandbox".to_string()
}

fn default_bootstrap_script_name() -> String {
    ".bootstrap.sh".to_string()
}

fn default_git_token_secret() -> String {
    "GIT_TOKEN".to_string()
}

fn default_git_username() -> String {
    "x-access-token".to_string()
}

fn default_log_excerpt_chars() -> usize {
    500
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
            base_dir: default_base_dir(),
            bootstrap_script_name: default_bootstrap_script_name(),
            git_token_secret: default_git_token_secret(),
            git_username: default_git_username(),
            log_excerpt_chars: default_log_excerpt_chars(),
            cleanup: CleanupPolicy::default(),
        }
    }
}

impl Settings {
    /// Parses settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse settings: {}", e)))
    }

    /// Loads settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Returns the poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Absolute path inline bootstrap scripts are uploaded to.
    pub fn bootstrap_script_path(&self) -> String {
        format!(
            "{}/{}",
            self.base_dir.trim_end_matches('/'),
            self.bootstrap_script_name
        )
    }

    /// Resolves a sandbox path; relative paths land under `base_dir`.
    pub fn sandbox_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.base_dir.trim_end_matches('/'), path)
        }
    }
}
