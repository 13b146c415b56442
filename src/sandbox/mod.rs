//! Remote sandbox service surface.
//!
//! The pipeline reaches the remote side only through [`SandboxClient`].

mod provider;

pub use provider::{
    CloneRequest, SandboxClient, SandboxHandle, SandboxInfo, SandboxSpec, SandboxState, Session,
    SessionCommand, PIPELINE_LABEL,
};
