//! Remote sandbox client trait and types.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::ProvisioningRequest;

/// Label carrying the owning pipeline id on created sandboxes.
pub const PIPELINE_LABEL: &str = "sandbox-provisioner/pipeline";

/// Parameters for creating a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Base image or snapshot reference.
    pub snapshot: String,
    pub region: Option<String>,
    /// Minutes of inactivity before auto-stop; 0 disables it.
    pub auto_stop_interval: u64,
    /// Plain environment variables for every process in the sandbox.
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl SandboxSpec {
    /// Builds the creation spec for a validated request.
    pub fn from_request(request: &ProvisioningRequest, pipeline_id: &str) -> Self {
        Self {
            snapshot: request.snapshot.clone(),
            region: request.region.clone(),
            auto_stop_interval: request.auto_stop_interval.max(0).unsigned_abs(),
            env: request
                .env
                .iter()
                .map(|var| (var.name.clone(), var.value.clone()))
                .collect(),
            labels: BTreeMap::from([(PIPELINE_LABEL.to_string(), pipeline_id.to_string())]),
        }
    }
}

/// Handle returned by sandbox creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub id: String,
}

/// Lifecycle state reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Creating,
    Starting,
    /// Ready to accept file, git and session calls.
    Started,
    Stopping,
    Stopped,
    /// The service gave up starting the sandbox.
    Error,
    #[serde(other)]
    Unknown,
}

/// Result of a sandbox status probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub id: String,
    pub state: SandboxState,
    /// Service-provided reason when `state` is `Error`.
    #[serde(default)]
    pub error_reason: Option<String>,
}

/// Parameters for cloning a repository into a sandbox.
#[derive(Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub url: String,
    /// Absolute destination directory.
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CloneRequest {
    /// Unauthenticated clone.
    pub fn public(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            username: None,
            password: None,
        }
    }

    /// Adds credentials to the clone.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Returns true if the clone carries credentials.
    pub fn is_authenticated(&self) -> bool {
        self.password.is_some()
    }
}

// Credentials stay out of logs.
impl fmt::Debug for CloneRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneRequest")
            .field("url", &self.url)
            .field("path", &self.path)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A command issued within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCommand {
    pub id: String,
    #[serde(default)]
    pub command: String,
    /// Present once the command has exited.
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// A remote command-execution session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub commands: Vec<SessionCommand>,
}

impl Session {
    /// Looks up a command by id.
    pub fn command(&self, command_id: &str) -> Option<&SessionCommand> {
        self.commands.iter().find(|c| c.id == command_id)
    }
}

/// Client for the remote sandbox service.
///
/// Each method is one remote call. Implementations enforce their own network
/// timeouts; the pipeline never retries a call within one invocation.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Creates a sandbox and returns its id.
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle>;

    /// Fetches the current state of a sandbox.
    async fn get(&self, sandbox_id: &str) -> Result<SandboxInfo>;

    /// Writes a file inside the sandbox.
    async fn upload_file(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()>;

    /// Clones a repository inside the sandbox.
    async fn clone_repository(&self, sandbox_id: &str, request: &CloneRequest) -> Result<()>;

    /// Opens a command session with a caller-chosen id.
    async fn create_session(&self, sandbox_id: &str, session_id: &str) -> Result<()>;

    /// Starts a command asynchronously and returns its command id.
    async fn execute_session_command(
        &self,
        sandbox_id: &str,
        session_id: &str,
        command: &str,
    ) -> Result<String>;

    /// Fetches a session and the commands issued in it.
    async fn get_session(&self, sandbox_id: &str, session_id: &str) -> Result<Session>;

    /// Fetches the combined output of a command.
    async fn get_session_command_logs(
        &self,
        sandbox_id: &str,
        session_id: &str,
        command_id: &str,
    ) -> Result<String>;

    /// Deletes a sandbox.
    async fn delete(&self, sandbox_id: &str) -> Result<()>;
}
