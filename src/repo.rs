//! Repository address handling.
//!
//! Derives the directory a `git clone` of a repository URL produces, for the
//! two address families git accepts: URIs (`https://host/owner/repo.git`)
//! and SCP-style addresses (`git@host:owner/repo.git`).

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Error, Result};

/// Returns the directory name a clone of `repository` creates.
pub fn directory_name(repository: &str) -> Result<String> {
    let repository = repository.trim();
    if repository.is_empty() {
        return Err(Error::Validation("repository must not be empty".to_string()));
    }

    let segment = if repository.contains("://") {
        let url = Url::parse(repository).map_err(|e| {
            Error::Validation(format!("invalid repository URL '{}': {}", repository, e))
        })?;
        let raw = last_segment(url.path());
        percent_decode_str(raw)
            .decode_utf8()
            .map_err(|e| {
                Error::Validation(format!("invalid repository URL '{}': {}", repository, e))
            })?
            .into_owned()
    } else {
        match repository.split_once(':') {
            Some((_, rest)) if repository.contains('@') => last_segment(rest).to_string(),
            _ => {
                return Err(Error::Validation(format!(
                    "unsupported repository address '{}': expected scheme://... or user@host:path",
                    repository
                )))
            }
        }
    };

    let name = segment.strip_suffix(".git").unwrap_or(&segment);
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::Validation(format!(
            "cannot derive a directory name from repository '{}'",
            repository
        )));
    }

    Ok(name.to_string())
}

/// Joins the clone directory name under the sandbox base directory.
pub fn target_directory(base_dir: &str, repository: &str) -> Result<String> {
    let name = directory_name(repository)?;
    Ok(format!("{}/{}", base_dir.trim_end_matches('/'), name))
}

fn last_segment(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
