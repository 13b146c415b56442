//! In-memory collaborators for exercising pipelines without a remote service.
//!
//! Used by the test suites and by the CLI `simulate` command.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::request::SecretRef;
use crate::sandbox::{
    CloneRequest, SandboxClient, SandboxHandle, SandboxInfo, SandboxSpec, SandboxState, Session,
    SessionCommand,
};
use crate::scheduler::Scheduler;
use crate::secrets::SecretResolver;

/// A remote call observed by [`FakeSandboxClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(SandboxSpec),
    Get(String),
    UploadFile {
        sandbox_id: String,
        path: String,
        contents: Vec<u8>,
    },
    CloneRepository {
        sandbox_id: String,
        request: CloneRequest,
    },
    CreateSession {
        sandbox_id: String,
        session_id: String,
    },
    ExecuteSessionCommand {
        sandbox_id: String,
        session_id: String,
        command: String,
    },
    GetSession {
        sandbox_id: String,
        session_id: String,
    },
    GetSessionCommandLogs {
        sandbox_id: String,
        session_id: String,
        command_id: String,
    },
    Delete(String),
}

#[derive(Debug)]
struct FakeInner {
    calls: Vec<Call>,
    next_id: u64,
    create_error: Option<String>,
    /// Scripted probe results; `Started` once exhausted.
    probes: VecDeque<std::result::Result<SandboxState, String>>,
    upload_error: Option<String>,
    clone_error: Option<String>,
    session_error: Option<String>,
    execute_error: Option<String>,
    /// Failing session lookups before the session becomes visible.
    session_lookup_failures: usize,
    /// Polls that report the command still running.
    running_polls: usize,
    exit_code: i32,
    logs: std::result::Result<String, String>,
    sessions: HashMap<String, Vec<SessionCommand>>,
}

/// Scriptable in-memory [`SandboxClient`] that records every call.
#[derive(Debug)]
pub struct FakeSandboxClient {
    inner: Mutex<FakeInner>,
}

impl FakeSandboxClient {
    /// A client whose sandboxes start immediately and whose commands exit 0.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FakeInner {
                calls: Vec::new(),
                next_id: 0,
                create_error: None,
                probes: VecDeque::new(),
                upload_error: None,
                clone_error: None,
                session_error: None,
                execute_error: None,
                session_lookup_failures: 0,
                running_polls: 0,
                exit_code: 0,
                logs: Ok(String::new()),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Scripts the results of successive status probes.
    pub fn with_probes(
        mut self,
        probes: impl IntoIterator<Item = std::result::Result<SandboxState, String>>,
    ) -> Self {
        self.inner.get_mut().probes = probes.into_iter().collect();
        self
    }

    pub fn with_create_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().create_error = Some(message.into());
        self
    }

    pub fn with_upload_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().upload_error = Some(message.into());
        self
    }

    pub fn with_clone_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().clone_error = Some(message.into());
        self
    }

    pub fn with_session_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().session_error = Some(message.into());
        self
    }

    pub fn with_execute_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().execute_error = Some(message.into());
        self
    }

    /// Makes the first `n` session lookups fail.
    pub fn with_session_lookup_failures(mut self, n: usize) -> Self {
        self.inner.get_mut().session_lookup_failures = n;
        self
    }

    /// Makes the command report no exit code for the first `n` lookups.
    pub fn with_running_polls(mut self, n: usize) -> Self {
        self.inner.get_mut().running_polls = n;
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.inner.get_mut().exit_code = code;
        self
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.inner.get_mut().logs = Ok(logs.into());
        self
    }

    pub fn with_logs_error(mut self, message: impl Into<String>) -> Self {
        self.inner.get_mut().logs = Err(message.into());
        self
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub async fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.inner.lock().await.calls.iter().filter(|c| predicate(c)).count()
    }
}

impl Default for FakeSandboxClient {
    fn default() -> Self {
        Self::new()
    }
}

fn fail<T>(operation: &str, message: &Option<String>) -> Result<T> {
    Err(Error::remote(operation, message.clone().unwrap_or_default()))
}

#[async_trait]
impl SandboxClient for FakeSandboxClient {
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Create(spec.clone()));
        if inner.create_error.is_some() {
            return fail("create sandbox", &inner.create_error);
        }
        inner.next_id += 1;
        Ok(SandboxHandle {
            id: format!("sandbox-{}", inner.next_id),
        })
    }

    async fn get(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Get(sandbox_id.to_string()));
        match inner.probes.pop_front() {
            Some(Err(message)) => Err(Error::remote("get sandbox", message)),
            Some(Ok(state)) => Ok(SandboxInfo {
                id: sandbox_id.to_string(),
                state,
                error_reason: (state == SandboxState::Error)
                    .then(|| "image pull failed".to_string()),
            }),
            None => Ok(SandboxInfo {
                id: sandbox_id.to_string(),
                state: SandboxState::Started,
                error_reason: None,
            }),
        }
    }

    async fn upload_file(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::UploadFile {
            sandbox_id: sandbox_id.to_string(),
            path: path.to_string(),
            contents: contents.to_vec(),
        });
        match inner.upload_error {
            Some(_) => fail("upload file", &inner.upload_error),
            None => Ok(()),
        }
    }

    async fn clone_repository(&self, sandbox_id: &str, request: &CloneRequest) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::CloneRepository {
            sandbox_id: sandbox_id.to_string(),
            request: request.clone(),
        });
        match inner.clone_error {
            Some(_) => fail("clone repository", &inner.clone_error),
            None => Ok(()),
        }
    }

    async fn create_session(&self, sandbox_id: &str, session_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::CreateSession {
            sandbox_id: sandbox_id.to_string(),
            session_id: session_id.to_string(),
        });
        if inner.session_error.is_some() {
            return fail("create session", &inner.session_error);
        }
        inner.sessions.insert(session_id.to_string(), Vec::new());
        Ok(())
    }

    async fn execute_session_command(
        &self,
        sandbox_id: &str,
        session_id: &str,
        command: &str,
    ) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::ExecuteSessionCommand {
            sandbox_id: sandbox_id.to_string(),
            session_id: session_id.to_string(),
            command: command.to_string(),
        });
        if inner.execute_error.is_some() {
            return fail("execute session command", &inner.execute_error);
        }
        inner.next_id += 1;
        let command_id = format!("cmd-{}", inner.next_id);
        let commands = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::remote("execute session command", "session not found"))?;
        commands.push(SessionCommand {
            id: command_id.clone(),
            command: command.to_string(),
            exit_code: None,
        });
        Ok(command_id)
    }

    async fn get_session(&self, sandbox_id: &str, session_id: &str) -> Result<Session> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::GetSession {
            sandbox_id: sandbox_id.to_string(),
            session_id: session_id.to_string(),
        });
        if inner.session_lookup_failures > 0 {
            inner.session_lookup_failures -= 1;
            return Err(Error::remote("get session", "session not ready"));
        }

        let running = inner.running_polls > 0;
        if running {
            inner.running_polls -= 1;
        }
        let exit_code = inner.exit_code;
        let commands = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::remote("get session", "session not found"))?;
        if !running {
            for command in commands.iter_mut() {
                command.exit_code.get_or_insert(exit_code);
            }
        }

        Ok(Session {
            session_id: session_id.to_string(),
            commands: commands.clone(),
        })
    }

    async fn get_session_command_logs(
        &self,
        sandbox_id: &str,
        session_id: &str,
        command_id: &str,
    ) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::GetSessionCommandLogs {
            sandbox_id: sandbox_id.to_string(),
            session_id: session_id.to_string(),
            command_id: command_id.to_string(),
        });
        inner
            .logs
            .clone()
            .map_err(|message| Error::remote("get command logs", message))
    }

    async fn delete(&self, sandbox_id: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .calls
            .push(Call::Delete(sandbox_id.to_string()));
        Ok(())
    }
}

/// Secret resolver over a fixed map.
#[derive(Debug, Default)]
pub struct StaticSecretResolver {
    values: HashMap<SecretRef, Vec<u8>>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret value.
    pub fn with(mut self, store: &str, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.values.insert(SecretRef::new(store, key), value.into());
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, secret: &SecretRef) -> Result<Vec<u8>> {
        self.values.get(secret).cloned().ok_or_else(|| Error::Secret {
            reference: secret.to_string(),
            reason: "no such secret".to_string(),
        })
    }
}

/// Scheduler that only records requests.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    requests: Mutex<Vec<(String, Duration)>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<(String, Duration)> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule(&self, pipeline_id: &str, delay: Duration) -> Result<()> {
        self.requests
            .lock()
            .await
            .push((pipeline_id.to_string(), delay));
        Ok(())
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}
