//! Bootstrap launch: upload, session, command.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::sandbox::SandboxClient;
use crate::secrets::ResolvedSecrets;
use crate::settings::Settings;
use crate::shell;
use crate::state::{BootstrapKind, PipelineState};

/// Normalizes a script body to end with exactly one newline.
pub fn normalize_script(script: &str) -> String {
    format!("{}\n", script.trim_end_matches(['\n', '\r']))
}

/// Issues the bootstrap command for `state`.
///
/// Inline scripts are uploaded to the configured script path first and the
/// record's path is rewritten to it. On success the record carries the
/// session id, command id and start time.
pub(crate) async fn launch(
    client: &dyn SandboxClient,
    settings: &Settings,
    state: &mut PipelineState,
    secrets: &ResolvedSecrets,
    now: DateTime<Utc>,
) -> Result<()> {
    let sandbox_id = state.sandbox_id.as_str();
    let record = state
        .bootstrap
        .as_mut()
        .ok_or_else(|| Error::Command("no bootstrap step recorded".to_string()))?;

    if record.command_id.is_some() {
        return Err(Error::Command("bootstrap command already issued".to_string()));
    }

    let script_path = match record.source {
        BootstrapKind::Inline => {
            let script = normalize_script(record.script.as_deref().unwrap_or_default());
            let path = settings.bootstrap_script_path();
            client
                .upload_file(sandbox_id, &path, script.as_bytes())
                .await?;
            record.path = Some(path.clone());
            path
        }
        BootstrapKind::File => record
            .path
            .clone()
            .ok_or_else(|| Error::Command("file bootstrap has no path".to_string()))?,
    };

    let command = shell::bootstrap_command(&state.target_directory, &script_path, secrets.env())?;

    let session_id = format!("bootstrap-{}", uuid::Uuid::new_v4());
    client.create_session(sandbox_id, &session_id).await?;
    record.session_id = Some(session_id.clone());

    tracing::info!(
        sandbox_id = %sandbox_id,
        session_id = %session_id,
        command = %secrets.redact(&command),
        "issuing bootstrap command"
    );
    let command_id = client
        .execute_session_command(sandbox_id, &session_id, &command)
        .await?;

    record.command_id = Some(command_id);
    record.started_at = Some(now);
    Ok(())
}
