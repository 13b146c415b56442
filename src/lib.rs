//! Sandbox Provisioner - resumable remote sandbox provisioning
//!
//! This library drives a sandbox from creation to a cloned, bootstrapped
//! workspace as a persisted state machine: each poll performs at most a few
//! remote calls, saves the state and asks a scheduler to come back later.

pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod repo;
pub mod request;
pub mod sandbox;
pub mod scheduler;
pub mod secrets;
pub mod settings;
pub mod shell;
pub mod state;
pub mod store;
pub mod testing;

pub use error::{Error, Result};

pub use clock::{Clock, SystemClock};
pub use config::{validate_start, Validate, ValidationResult};
pub use pipeline::{Driver, Outcome, Pipeline, Step};
pub use request::{
    BootstrapDescriptor, BootstrapSource, EnvVar, ProvisioningRequest, SecretBinding, SecretKind,
    SecretRef,
};
pub use sandbox::{SandboxClient, SandboxSpec, SandboxState};
pub use scheduler::{LocalScheduler, Scheduler};
pub use secrets::{LocalSecretResolver, ResolvedSecrets, SecretResolver};
pub use settings::{CleanupPolicy, Settings};
pub use state::{FailureKind, FailureRecord, PipelineState, Stage};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
