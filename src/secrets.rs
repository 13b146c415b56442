//! Secret resolution and injection.
//!
//! Secrets are resolved when the sandbox has started, handed to the sandbox
//! as files or exported environment variables, and redacted from anything
//! the pipeline logs. Resolved values are never persisted.

use std::env;
use std::fmt;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::request::{SecretBinding, SecretKind, SecretRef};

/// Store id served from the local process environment.
pub const ENV_STORE: &str = "env";
/// Store id served from the local filesystem.
pub const FILE_STORE: &str = "file";

/// Resolves secret references to their values.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Returns the secret value for `secret`.
    async fn resolve(&self, secret: &SecretRef) -> Result<Vec<u8>>;
}

/// Resolves secrets from the local environment and filesystem.
///
/// Store `env` reads the environment variable named by the key; store `file`
/// reads the file at the key path, trimming trailing whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSecretResolver;

#[async_trait]
impl SecretResolver for LocalSecretResolver {
    async fn resolve(&self, secret: &SecretRef) -> Result<Vec<u8>> {
        match secret.store.as_str() {
            ENV_STORE => env::var(&secret.key)
                .map(String::into_bytes)
                .map_err(|_| Error::Secret {
                    reference: secret.to_string(),
                    reason: format!("environment variable '{}' not set", secret.key),
                }),
            FILE_STORE => {
                let mut bytes = tokio::fs::read(&secret.key).await.map_err(|e| Error::Secret {
                    reference: secret.to_string(),
                    reason: format!("cannot read file '{}': {}", secret.key, e),
                })?;
                let trimmed = bytes
                    .iter()
                    .rposition(|b| !b.is_ascii_whitespace())
                    .map_or(0, |i| i + 1);
                bytes.truncate(trimmed);
                Ok(bytes)
            }
            other => Err(Error::Secret {
                reference: secret.to_string(),
                reason: format!("unknown secret store '{}'", other),
            }),
        }
    }
}

/// Secret values resolved for one pipeline invocation.
pub struct ResolvedSecrets {
    /// Env-var bindings in declaration order.
    env: Vec<(String, String)>,
    /// File bindings: (path, contents).
    files: Vec<(String, Vec<u8>)>,
    /// (name, value), longest value first.
    redaction_patterns: Vec<(String, String)>,
}

impl ResolvedSecrets {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            env: Vec::new(),
            files: Vec::new(),
            redaction_patterns: Vec::new(),
        }
    }

    /// Resolves every binding; the first failure aborts.
    pub async fn resolve_all(
        bindings: &[SecretBinding],
        resolver: &dyn SecretResolver,
    ) -> Result<Self> {
        let mut resolved = Self::new();
        for binding in bindings {
            let value = resolver.resolve(&binding.secret).await?;
            resolved.insert(binding, value)?;
        }
        Ok(resolved)
    }

    /// Adds one resolved binding.
    pub fn insert(&mut self, binding: &SecretBinding, value: Vec<u8>) -> Result<()> {
        match binding.kind {
            SecretKind::EnvVar => {
                let value = String::from_utf8(value).map_err(|_| Error::Secret {
                    reference: binding.secret.to_string(),
                    reason: format!("value for '{}' is not valid UTF-8", binding.name),
                })?;
                self.add_redaction(&binding.name, &value);
                self.env.push((binding.name.clone(), value));
            }
            SecretKind::File => {
                if let Ok(text) = std::str::from_utf8(&value) {
                    self.add_redaction(&binding.name, text.trim());
                }
                self.files.push((binding.name.clone(), value));
            }
        }
        Ok(())
    }

    fn add_redaction(&mut self, name: &str, value: &str) {
        if value.is_empty() || self.redaction_patterns.iter().any(|(_, v)| v == value) {
            return;
        }
        self.redaction_patterns
            .push((name.to_string(), value.to_string()));
        self.redaction_patterns
            .sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    }

    /// Env-var secrets to export, in declaration order.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// File secrets to upload.
    pub fn files(&self) -> &[(String, Vec<u8>)] {
        &self.files
    }

    /// Returns the clone credential: the value of the first env-var binding
    /// named `token_name`, if that value is non-empty.
    pub fn git_credential(&self, token_name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == token_name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Redacts all known secret values from a string.
    ///
    /// Secret values are replaced with `[REDACTED:<name>]`.
    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (name, value) in &self.redaction_patterns {
            result = result.replace(value, &format!("[REDACTED:{}]", name));
        }
        result
    }

    /// Returns true if no secrets were resolved.
    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.files.is_empty()
    }
}

impl Default for ResolvedSecrets {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("env", &self.env.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("files", &self.files.iter().map(|(p, _)| p).collect::<Vec<_>>())
            .finish()
    }
}
