//! Provisioning pipeline host.
//!
//! [`Pipeline`] wires the [`Driver`] to its collaborators. [`Pipeline::start`]
//! validates a request, creates the sandbox and persists the initial state;
//! every later [`Pipeline::poll`] loads the state, advances it by one step,
//! persists it if anything changed, and either schedules the next poll or
//! reports the terminal outcome.

mod bootstrap;
mod driver;

pub use bootstrap::normalize_script;
pub use driver::{excerpt, Driver, Step};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::{Clock, SystemClock};
use crate::config::validate_start;
use crate::error::{Error, Result};
use crate::repo;
use crate::request::ProvisioningRequest;
use crate::sandbox::{SandboxClient, SandboxSpec};
use crate::scheduler::Scheduler;
use crate::secrets::SecretResolver;
use crate::settings::{CleanupPolicy, Settings};
use crate::state::{BootstrapRecord, FailureRecord, PipelineState, Stage};
use crate::store::StateStore;

/// What a poll produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not finished; the next poll was scheduled after `delay`.
    Scheduled { delay: Duration },
    /// Reached Done. Carries the frozen state as the output payload.
    Done(PipelineState),
    /// Failed during this poll.
    Failed(FailureRecord),
    /// The pipeline was already terminal; nothing happened.
    Unchanged,
}

impl Outcome {
    /// Returns true if no further polls will follow.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Scheduled { .. })
    }
}

/// Resumable sandbox provisioning pipeline.
pub struct Pipeline {
    client: Arc<dyn SandboxClient>,
    resolver: Arc<dyn SecretResolver>,
    store: Arc<dyn StateStore>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn SandboxClient>,
        resolver: Arc<dyn SecretResolver>,
        store: Arc<dyn StateStore>,
        scheduler: Arc<dyn Scheduler>,
        settings: Settings,
    ) -> Self {
        Self {
            client,
            resolver,
            store,
            scheduler,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validates `request`, creates the sandbox and schedules the first poll.
    ///
    /// Invalid requests fail here without any remote call.
    pub async fn start(&self, request: &ProvisioningRequest) -> Result<PipelineState> {
        let warnings = validate_start(request, &self.settings).into_result()?;
        for warning in &warnings {
            tracing::warn!(warning = %warning, "provisioning request warning");
        }

        let bootstrap = request
            .bootstrap
            .as_ref()
            .map(|descriptor| descriptor.resolve())
            .transpose()?;
        let target_directory = repo::target_directory(&self.settings.base_dir, &request.repository)?;

        let pipeline_id = uuid::Uuid::new_v4().to_string();
        let started_at = self.clock.now();

        let handle = self
            .client
            .create(&SandboxSpec::from_request(request, &pipeline_id))
            .await?;

        let state = PipelineState {
            pipeline_id: pipeline_id.clone(),
            stage: Stage::PreparingSandbox,
            sandbox_id: handle.id,
            started_at,
            timeout_secs: request.timeout_secs.unwrap_or(self.settings.timeout_secs),
            repository: request.repository.clone(),
            target_directory,
            secrets: request.secrets.clone(),
            clone: None,
            bootstrap: bootstrap.as_ref().map(BootstrapRecord::new),
            failure: None,
        };

        if let Err(e) = self.store.save(&pipeline_id, &state.to_bytes()?).await {
            self.compensate(&state).await;
            return Err(e);
        }

        tracing::info!(
            pipeline_id = %pipeline_id,
            sandbox_id = %state.sandbox_id,
            target_directory = %state.target_directory,
            timeout_secs = state.timeout_secs,
            "pipeline started"
        );

        self.scheduler
            .schedule(&pipeline_id, self.settings.poll_interval())
            .await?;
        Ok(state)
    }

    /// Loads the persisted state of a pipeline.
    pub async fn load(&self, pipeline_id: &str) -> Result<PipelineState> {
        let bytes = self
            .store
            .load(pipeline_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pipeline {}", pipeline_id)))?;
        PipelineState::from_bytes(&bytes)
    }

    /// Runs one poll of a pipeline.
    pub async fn poll(&self, pipeline_id: &str) -> Result<Outcome> {
        let before = self.load(pipeline_id).await?;
        if before.is_terminal() {
            tracing::debug!(pipeline_id = %pipeline_id, "pipeline already finished, ignoring poll");
            return Ok(Outcome::Unchanged);
        }

        let mut state = before.clone();
        let driver = Driver::new(
            self.client.as_ref(),
            self.resolver.as_ref(),
            self.clock.as_ref(),
            &self.settings,
        );
        let step = driver.advance(&mut state).await;

        if state != before {
            self.store.save(pipeline_id, &state.to_bytes()?).await?;
        }

        match step {
            Step::Wait => {
                let delay = self.settings.poll_interval();
                self.scheduler.schedule(pipeline_id, delay).await?;
                Ok(Outcome::Scheduled { delay })
            }
            Step::Done => Ok(Outcome::Done(state)),
            Step::Failed(failure) => {
                self.compensate(&state).await;
                Ok(Outcome::Failed(failure))
            }
            Step::Noop => Ok(Outcome::Unchanged),
        }
    }

    /// Polls `pipeline_id` each time its id arrives on `wakeups` until the
    /// pipeline finishes. Ids of other pipelines are ignored.
    pub async fn run_local(
        &self,
        wakeups: &mut mpsc::Receiver<String>,
        pipeline_id: &str,
    ) -> Result<Outcome> {
        while let Some(id) = wakeups.recv().await {
            if id != pipeline_id {
                continue;
            }
            let outcome = self.poll(&id).await?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
        }
        Err(Error::Schedule(format!(
            "wake-up channel closed before pipeline {} finished",
            pipeline_id
        )))
    }

    /// Applies the cleanup policy to a failed pipeline's sandbox.
    async fn compensate(&self, state: &PipelineState) {
        if self.settings.cleanup != CleanupPolicy::Delete {
            return;
        }
        match self.client.delete(&state.sandbox_id).await {
            Ok(()) => tracing::info!(
                pipeline_id = %state.pipeline_id,
                sandbox_id = %state.sandbox_id,
                "deleted sandbox of failed pipeline"
            ),
            Err(e) => tracing::warn!(
                pipeline_id = %state.pipeline_id,
                sandbox_id = %state.sandbox_id,
                error = %e,
                "could not delete sandbox of failed pipeline"
            ),
        }
    }
}
