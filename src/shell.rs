//! Shell command composition.
//!
//! Every value interpolated into a command string goes through [`quote`];
//! nothing is concatenated raw.

use std::borrow::Cow;

use crate::config::is_env_name;
use crate::error::{Error, Result};

/// Quotes a single word for POSIX `sh`.
///
/// Fails only for values containing a NUL byte, which no shell word can hold.
pub fn quote(value: &str) -> Result<Cow<'_, str>> {
    shlex::try_quote(value)
        .map_err(|e| Error::Command(format!("cannot quote {:?}: {}", value, e)))
}

/// Builds `cd <dir> && sh <script>`, prefixed with `export` of `env` when
/// non-empty so the script process sees those variables.
pub fn bootstrap_command(
    target_dir: &str,
    script_path: &str,
    env: &[(String, String)],
) -> Result<String> {
    let run = format!("cd {} && sh {}", quote(target_dir)?, quote(script_path)?);
    if env.is_empty() {
        return Ok(run);
    }

    let mut exports = Vec::with_capacity(env.len());
    for (name, value) in env {
        if !is_env_name(name) {
            return Err(Error::Command(format!(
                "'{}' is not a valid environment variable name",
                name
            )));
        }
        exports.push(format!("{}={}", name, quote(value)?));
    }

    Ok(format!("export {} && {}", exports.join(" "), run))
}
