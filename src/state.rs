//! Persisted pipeline state.
//!
//! [`PipelineState`] is the only thing that survives between invocations.
//! It is encoded as JSON and handed to the state store as opaque bytes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::{BootstrapSource, SecretBinding};

/// Persisted pipeline stage. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for the sandbox to start; then injects secrets and clones.
    PreparingSandbox,
    /// Waiting for the bootstrap command to exit.
    Bootstrapping,
    Done,
}

impl Stage {
    /// Human-readable stage name for messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::PreparingSandbox => "preparing sandbox",
            Stage::Bootstrapping => "bootstrapping",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Outcome of the clone step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneRecord {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Where the bootstrap script comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapKind {
    Inline,
    File,
}

/// Bootstrap step progress. Absent from state when no bootstrap was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapRecord {
    pub source: BootstrapKind,
    /// Script body for inline bootstraps.
    #[serde(default)]
    pub script: Option<String>,
    /// Declared repository path, or the upload path once an inline script is
    /// uploaded.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Set exactly once, when the command is issued.
    #[serde(default)]
    pub command_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Command output captured when the command exited.
    #[serde(default)]
    pub result: Option<String>,
}

impl BootstrapRecord {
    /// Pending record for a validated bootstrap source.
    pub fn new(source: &BootstrapSource) -> Self {
        let (kind, script, path) = match source {
            BootstrapSource::Inline { script } => (BootstrapKind::Inline, Some(script.clone()), None),
            BootstrapSource::File { path } => (BootstrapKind::File, None, Some(path.clone())),
        };
        Self {
            source: kind,
            script,
            path,
            session_id: None,
            command_id: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
            result: None,
        }
    }
}

/// Classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The global deadline passed before Done.
    Timeout,
    /// The remote service reported the sandbox failed to start.
    SandboxError,
    /// A secret could not be resolved or injected.
    Secret,
    /// The clone call failed.
    Clone,
    /// Uploading, session creation or command execution failed.
    Bootstrap,
    /// The bootstrap command exited non-zero.
    ExitCode,
}

/// Terminal failure recorded alongside the frozen state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Always `"error"`.
    pub category: String,
    pub kind: FailureKind,
    /// Stage the pipeline was in when it failed.
    pub stage: Stage,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, stage: Stage, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            category: "error".to_string(),
            kind,
            stage,
            message: message.into(),
            failed_at: at,
        }
    }
}

/// Continuation context for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub pipeline_id: String,
    pub stage: Stage,
    pub sandbox_id: String,
    pub started_at: DateTime<Utc>,
    /// Whole-pipeline budget, measured from `started_at`.
    pub timeout_secs: u64,
    pub repository: String,
    /// Absolute clone directory, derived once at start.
    pub target_directory: String,
    /// Bindings only; values are resolved per invocation and never stored.
    #[serde(default)]
    pub secrets: Vec<SecretBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone: Option<CloneRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
}

impl PipelineState {
    /// Returns true once the pipeline is Done or has failed.
    pub fn is_terminal(&self) -> bool {
        self.stage == Stage::Done || self.failure.is_some()
    }

    /// Returns true if `now` is past the pipeline deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.started_at).num_seconds();
        elapsed > 0 && elapsed.unsigned_abs() > self.timeout_secs
    }

    /// Records a terminal failure. The stage is left where it was.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> FailureRecord {
        let record = FailureRecord::new(kind, self.stage, message, at);
        self.failure = Some(record.clone());
        record
    }

    /// Encodes the state for the store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes a stored state.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
