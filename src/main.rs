//! Sandbox Provisioner CLI
//!
//! Validates provisioning requests, simulates pipelines against an in-memory
//! sandbox service, and inspects persisted pipeline state.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use sandbox_provisioner::sandbox::SandboxState;
use sandbox_provisioner::testing::FakeSandboxClient;
use sandbox_provisioner::{
    repo, validate_start, FileStateStore, LocalScheduler, LocalSecretResolver, Outcome, Pipeline,
    PipelineState, ProvisioningRequest, Settings, StateStore,
};

const USAGE: &str = "\
Usage:
  sandbox-provisioner validate <request.yaml|request.json>
  sandbox-provisioner simulate <request> [settings.toml]
  sandbox-provisioner show <state-dir> <pipeline-id>";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let result = match args.get(1).map(String::as_str) {
        Some("validate") if args.len() == 3 => validate(&args[2]),
        Some("simulate") if args.len() == 3 || args.len() == 4 => {
            simulate(&args[2], args.get(3).map(String::as_str)).await
        }
        Some("show") if args.len() == 4 => show(&args[2], &args[3]).await,
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Log filter from `RUST_LOG` directives, `info` when unset or unparsable.
fn env_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Checks a request and prints what the pipeline would derive from it.
fn validate(path: &str) -> sandbox_provisioner::Result<bool> {
    let request = ProvisioningRequest::load(path)?;
    let settings = Settings::default();
    let result = validate_start(&request, &settings);

    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    if !result.is_valid() {
        for error in &result.errors {
            println!("error: {}", error);
        }
        return Ok(false);
    }

    let target = repo::target_directory(&settings.base_dir, &request.repository)?;
    println!("valid: clone target {}", target);
    Ok(true)
}

/// Drives a request to completion against the in-memory sandbox service.
async fn simulate(request_path: &str, settings_path: Option<&str>) -> sandbox_provisioner::Result<bool> {
    let request = ProvisioningRequest::load(request_path)?;
    let settings = match settings_path {
        Some(path) => Settings::load(path)?,
        None => Settings {
            poll_interval_secs: 1,
            ..Settings::default()
        },
    };

    let state_dir = std::env::temp_dir().join("sandbox-provisioner-state");
    let client = FakeSandboxClient::new()
        .with_probes([Ok(SandboxState::Creating), Ok(SandboxState::Starting)])
        .with_running_polls(1)
        .with_logs("bootstrap finished\n");
    let (scheduler, mut wakeups) = LocalScheduler::new(16);

    let pipeline = Pipeline::new(
        Arc::new(client),
        Arc::new(LocalSecretResolver),
        Arc::new(FileStateStore::new(state_dir.clone())),
        Arc::new(scheduler),
        settings,
    );

    let state = pipeline.start(&request).await?;
    tracing::info!(
        pipeline_id = %state.pipeline_id,
        state_dir = %state_dir.display(),
        "simulating pipeline"
    );

    match pipeline.run_local(&mut wakeups, &state.pipeline_id).await? {
        Outcome::Done(state) => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(true)
        }
        Outcome::Failed(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Ok(false)
        }
        other => {
            eprintln!("pipeline ended without a result: {:?}", other);
            Ok(false)
        }
    }
}

/// Prints a persisted pipeline state.
async fn show(state_dir: &str, pipeline_id: &str) -> sandbox_provisioner::Result<bool> {
    let store = FileStateStore::new(PathBuf::from(state_dir));
    let Some(bytes) = store.load(pipeline_id).await? else {
        eprintln!("no pipeline {} in {}", pipeline_id, state_dir);
        return Ok(false);
    };

    let state = PipelineState::from_bytes(&bytes)?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(state.failure.is_none())
}
