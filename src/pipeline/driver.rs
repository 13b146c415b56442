//! Stage driver.
//!
//! One call to [`Driver::advance`] is one poll: it checks the deadline, makes
//! the remote calls the current stage needs, and mutates the state in place.
//! It never waits; "not yet" is reported as [`Step::Wait`].

use crate::clock::Clock;
use crate::error::Result;
use crate::sandbox::{CloneRequest, SandboxClient, SandboxState};
use crate::secrets::{ResolvedSecrets, SecretResolver};
use crate::settings::Settings;
use crate::state::{CloneRecord, FailureKind, FailureRecord, PipelineState, Stage};

use super::bootstrap;

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing terminal happened; poll again later.
    Wait,
    /// The pipeline reached Done during this poll.
    Done,
    /// The pipeline failed during this poll.
    Failed(FailureRecord),
    /// The state was already terminal; nothing was done.
    Noop,
}

/// Decides and performs the next action for a pipeline.
pub struct Driver<'a> {
    client: &'a dyn SandboxClient,
    resolver: &'a dyn SecretResolver,
    clock: &'a dyn Clock,
    settings: &'a Settings,
}

impl<'a> Driver<'a> {
    pub fn new(
        client: &'a dyn SandboxClient,
        resolver: &'a dyn SecretResolver,
        clock: &'a dyn Clock,
        settings: &'a Settings,
    ) -> Self {
        Self {
            client,
            resolver,
            clock,
            settings,
        }
    }

    /// Runs one poll against `state`.
    pub async fn advance(&self, state: &mut PipelineState) -> Step {
        if state.is_terminal() {
            return Step::Noop;
        }

        let now = self.clock.now();
        if state.is_expired(now) {
            let message = format!(
                "pipeline timed out after {}s while {}",
                state.timeout_secs, state.stage
            );
            return Step::Failed(state.fail(FailureKind::Timeout, message, now));
        }

        match state.stage {
            Stage::PreparingSandbox => self.prepare_sandbox(state).await,
            Stage::Bootstrapping => self.await_bootstrap(state).await,
            Stage::Done => Step::Noop,
        }
    }

    async fn prepare_sandbox(&self, state: &mut PipelineState) -> Step {
        let info = match self.client.get(&state.sandbox_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    pipeline_id = %state.pipeline_id,
                    sandbox_id = %state.sandbox_id,
                    error = %e,
                    "sandbox status probe failed, retrying"
                );
                return Step::Wait;
            }
        };

        match info.state {
            SandboxState::Started => {}
            SandboxState::Error => {
                let reason = info.error_reason.as_deref().unwrap_or("no reason given");
                let message = format!("sandbox {} failed to start: {}", state.sandbox_id, reason);
                return self.fail(state, FailureKind::SandboxError, message);
            }
            other => {
                tracing::debug!(
                    pipeline_id = %state.pipeline_id,
                    sandbox_id = %state.sandbox_id,
                    state = ?other,
                    "sandbox not started yet"
                );
                return Step::Wait;
            }
        }

        tracing::info!(
            pipeline_id = %state.pipeline_id,
            sandbox_id = %state.sandbox_id,
            "sandbox started"
        );

        let secrets = match self.inject_secrets(state).await {
            Ok(secrets) => secrets,
            Err(e) => {
                return self.fail(state, FailureKind::Secret, format!("secret injection failed: {}", e))
            }
        };

        if let Err(message) = self.clone_repository(state, &secrets).await {
            return self.fail(state, FailureKind::Clone, message);
        }

        if state.bootstrap.is_none() {
            return self.finish(state);
        }

        let now = self.clock.now();
        match bootstrap::launch(self.client, self.settings, state, &secrets, now).await {
            Ok(()) => {
                state.stage = Stage::Bootstrapping;
                tracing::info!(
                    pipeline_id = %state.pipeline_id,
                    sandbox_id = %state.sandbox_id,
                    "bootstrap command issued"
                );
                Step::Wait
            }
            Err(e) => {
                let message = format!("bootstrap could not be started: {}", secrets.redact(&e.to_string()));
                self.fail(state, FailureKind::Bootstrap, message)
            }
        }
    }

    /// Resolves every binding and uploads file secrets.
    async fn inject_secrets(&self, state: &PipelineState) -> Result<ResolvedSecrets> {
        let secrets = ResolvedSecrets::resolve_all(&state.secrets, self.resolver).await?;
        for (path, contents) in secrets.files() {
            let path = self.settings.sandbox_path(path);
            self.client
                .upload_file(&state.sandbox_id, &path, contents)
                .await?;
        }
        if !secrets.is_empty() {
            tracing::info!(
                pipeline_id = %state.pipeline_id,
                env = secrets.env().len(),
                files = secrets.files().len(),
                "secrets injected"
            );
        }
        Ok(secrets)
    }

    /// Issues the clone and records its outcome; `Err` carries the failure
    /// message.
    async fn clone_repository(
        &self,
        state: &mut PipelineState,
        secrets: &ResolvedSecrets,
    ) -> std::result::Result<(), String> {
        if state.clone.is_some() {
            return Err("repository clone was already attempted".to_string());
        }

        let mut request = CloneRequest::public(&state.repository, &state.target_directory);
        if let Some(token) = secrets.git_credential(&self.settings.git_token_secret) {
            request = request.with_credentials(&self.settings.git_username, token);
        }

        tracing::info!(
            pipeline_id = %state.pipeline_id,
            repository = %state.repository,
            path = %state.target_directory,
            authenticated = request.is_authenticated(),
            "cloning repository"
        );

        let mut record = CloneRecord {
            started_at: self.clock.now(),
            finished_at: None,
            error: None,
        };
        let result = self
            .client
            .clone_repository(&state.sandbox_id, &request)
            .await;
        record.finished_at = Some(self.clock.now());

        let outcome = match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let error = secrets.redact(&e.to_string());
                record.error = Some(error.clone());
                Err(format!("clone of {} failed: {}", state.repository, error))
            }
        };
        state.clone = Some(record);
        outcome
    }

    async fn await_bootstrap(&self, state: &mut PipelineState) -> Step {
        let (session_id, command_id) = match state.bootstrap.as_ref().map(|b| {
            (b.session_id.clone(), b.command_id.clone())
        }) {
            Some((Some(session_id), Some(command_id))) => (session_id, command_id),
            _ => {
                let message = "bootstrapping without an issued bootstrap command".to_string();
                return self.fail(state, FailureKind::Bootstrap, message);
            }
        };

        let session = match self.client.get_session(&state.sandbox_id, &session_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    pipeline_id = %state.pipeline_id,
                    session_id = %session_id,
                    error = %e,
                    "session lookup failed, retrying"
                );
                return Step::Wait;
            }
        };

        let Some(exit_code) = session.command(&command_id).and_then(|c| c.exit_code) else {
            tracing::debug!(
                pipeline_id = %state.pipeline_id,
                command_id = %command_id,
                "bootstrap command still running"
            );
            return Step::Wait;
        };

        let output = match self
            .client
            .get_session_command_logs(&state.sandbox_id, &session_id, &command_id)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    pipeline_id = %state.pipeline_id,
                    command_id = %command_id,
                    error = %e,
                    "could not fetch bootstrap output"
                );
                String::new()
            }
        };

        // Exported secrets can show up in the output.
        let secrets = match ResolvedSecrets::resolve_all(&state.secrets, self.resolver).await {
            Ok(secrets) => secrets,
            Err(e) => {
                return self.fail(state, FailureKind::Secret, format!("secret resolution failed: {}", e))
            }
        };
        let output = secrets.redact(&output);

        if let Some(record) = state.bootstrap.as_mut() {
            record.exit_code = Some(exit_code);
            record.finished_at = Some(self.clock.now());
            record.result = Some(output.clone());
        }

        if exit_code == 0 {
            self.finish(state)
        } else {
            let message = format!(
                "bootstrap command exited with code {}: {}",
                exit_code,
                excerpt(&output, self.settings.log_excerpt_chars)
            );
            self.fail(state, FailureKind::ExitCode, message)
        }
    }

    fn finish(&self, state: &mut PipelineState) -> Step {
        state.stage = Stage::Done;
        tracing::info!(
            pipeline_id = %state.pipeline_id,
            sandbox_id = %state.sandbox_id,
            "pipeline done"
        );
        Step::Done
    }

    fn fail(&self, state: &mut PipelineState, kind: FailureKind, message: String) -> Step {
        tracing::error!(
            pipeline_id = %state.pipeline_id,
            sandbox_id = %state.sandbox_id,
            stage = %state.stage,
            kind = ?kind,
            message = %message,
            "pipeline failed"
        );
        Step::Failed(state.fail(kind, message, self.clock.now()))
    }
}

/// Last `max_chars` characters of `output`, marked when cut.
pub fn excerpt(output: &str, max_chars: usize) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return "(no output)".to_string();
    }

    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }

    let tail: String = trimmed.chars().skip(count - max_chars).collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::BootstrapSource;
    use crate::state::BootstrapRecord;
    use crate::testing::{Call, FakeSandboxClient, ManualClock, StaticSecretResolver};
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_767_225_600, 0).unwrap()
    }

    fn state() -> PipelineState {
        PipelineState {
            pipeline_id: "p".to_string(),
            stage: Stage::PreparingSandbox,
            sandbox_id: "sb".to_string(),
            started_at: start(),
            timeout_secs: 60,
            repository: "https://github.com/acme/widget.git".to_string(),
            target_directory: "/home/sandbox/widget".to_string(),
            secrets: vec![],
            clone: None,
            bootstrap: None,
            failure: None,
        }
    }

    #[tokio::test]
    async fn deadline_fails_pending_stage_without_remote_calls() {
        let client = FakeSandboxClient::new();
        let resolver = StaticSecretResolver::new();
        let clock = ManualClock::new(start());
        clock.advance(Duration::from_secs(61));
        let settings = Settings::default();
        let driver = Driver::new(&client, &resolver, &clock, &settings);

        let mut s = state();
        s.stage = Stage::Bootstrapping;
        let step = driver.advance(&mut s).await;

        let failure = match step {
            Step::Failed(failure) => failure,
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.message.contains("bootstrapping"));
        assert!(client.calls().await.is_empty());
    }

    #[tokio::test]
    async fn terminal_state_is_left_alone() {
        let client = FakeSandboxClient::new();
        let resolver = StaticSecretResolver::new();
        let clock = ManualClock::new(start());
        let settings = Settings::default();
        let driver = Driver::new(&client, &resolver, &clock, &settings);

        let mut s = state();
        s.stage = Stage::Done;
        let before = s.clone();

        assert_eq!(driver.advance(&mut s).await, Step::Noop);
        assert_eq!(s, before);
        assert!(client.calls().await.is_empty());
    }

    #[tokio::test]
    async fn sandbox_error_state_fails_immediately() {
        let client = FakeSandboxClient::new().with_probes([Ok(SandboxState::Error)]);
        let resolver = StaticSecretResolver::new();
        let clock = ManualClock::new(start());
        let settings = Settings::default();
        let driver = Driver::new(&client, &resolver, &clock, &settings);

        let mut s = state();
        let step = driver.advance(&mut s).await;

        assert!(matches!(step, Step::Failed(ref f) if f.kind == FailureKind::SandboxError));
        assert!(s.clone.is_none());
    }

    #[tokio::test]
    async fn still_starting_waits() {
        let client = FakeSandboxClient::new().with_probes([Ok(SandboxState::Starting)]);
        let resolver = StaticSecretResolver::new();
        let clock = ManualClock::new(start());
        let settings = Settings::default();
        let driver = Driver::new(&client, &resolver, &clock, &settings);

        let mut s = state();
        assert_eq!(driver.advance(&mut s).await, Step::Wait);
        assert_eq!(s, state());
    }

    #[tokio::test]
    async fn missing_secret_fails_before_clone() {
        let client = FakeSandboxClient::new();
        let resolver = StaticSecretResolver::new();
        let clock = ManualClock::new(start());
        let settings = Settings::default();
        let driver = Driver::new(&client, &resolver, &clock, &settings);

        let mut s = state();
        s.secrets.push(crate::request::SecretBinding::env(
            "GIT_TOKEN",
            crate::request::SecretRef::new("vault", "missing"),
        ));
        let step = driver.advance(&mut s).await;

        assert!(matches!(step, Step::Failed(ref f) if f.kind == FailureKind::Secret));
        assert_eq!(
            client
                .count(|c| matches!(c, Call::CloneRepository { .. }))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn nonzero_exit_records_result_and_fails() {
        let client = FakeSandboxClient::new()
            .with_exit_code(2)
            .with_logs("installing...\nerror: missing toolchain\n");
        let resolver = StaticSecretResolver::new();
        let clock = ManualClock::new(start());
        let settings = Settings::default();
        let driver = Driver::new(&client, &resolver, &clock, &settings);

        let mut s = state();
        s.bootstrap = Some(BootstrapRecord::new(&BootstrapSource::File {
            path: "setup.sh".to_string(),
        }));

        assert_eq!(driver.advance(&mut s).await, Step::Wait);
        assert_eq!(s.stage, Stage::Bootstrapping);

        let step = driver.advance(&mut s).await;
        let failure = match step {
            Step::Failed(failure) => failure,
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(failure.kind, FailureKind::ExitCode);
        assert!(failure.message.contains("code 2"));
        assert!(failure.message.contains("missing toolchain"));
        assert_eq!(s.bootstrap.as_ref().and_then(|b| b.exit_code), Some(2));
        assert_eq!(s.stage, Stage::Bootstrapping);
    }

    #[tokio::test]
    async fn log_fetch_failure_does_not_block_done() {
        let client = FakeSandboxClient::new().with_logs_error("gone");
        let resolver = StaticSecretResolver::new();
        let clock = ManualClock::new(start());
        let settings = Settings::default();
        let driver = Driver::new(&client, &resolver, &clock, &settings);

        let mut s = state();
        s.bootstrap = Some(BootstrapRecord::new(&BootstrapSource::File {
            path: "setup.sh".to_string(),
        }));

        assert_eq!(driver.advance(&mut s).await, Step::Wait);
        assert_eq!(driver.advance(&mut s).await, Step::Done);
        assert_eq!(s.bootstrap.and_then(|b| b.result).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn unresolvable_secret_after_exit_fails_without_recording_output() {
        let client = FakeSandboxClient::new().with_logs("API_KEY=s3cr3t\n");
        let resolver = StaticSecretResolver::new().with("vault", "api", "s3cr3t");
        let clock = ManualClock::new(start());
        let settings = Settings::default();

        let mut s = state();
        s.secrets.push(crate::request::SecretBinding::env(
            "API_KEY",
            crate::request::SecretRef::new("vault", "api"),
        ));
        s.bootstrap = Some(BootstrapRecord::new(&BootstrapSource::File {
            path: "setup.sh".to_string(),
        }));
        let driver = Driver::new(&client, &resolver, &clock, &settings);
        assert_eq!(driver.advance(&mut s).await, Step::Wait);

        // The secret disappears between polls.
        let empty = StaticSecretResolver::new();
        let driver = Driver::new(&client, &empty, &clock, &settings);
        let step = driver.advance(&mut s).await;

        assert!(matches!(step, Step::Failed(ref f) if f.kind == FailureKind::Secret));
        let record = s.bootstrap.unwrap();
        assert!(record.result.is_none());
        assert!(record.exit_code.is_none());
    }

    #[test]
    fn excerpt_keeps_tail() {
        assert_eq!(excerpt("  short \n", 100), "short");
        assert_eq!(excerpt("", 10), "(no output)");
        assert_eq!(excerpt("abcdefghij", 4), "...ghij");
        assert_eq!(excerpt("ééééé", 2), "...éé");
    }
}
