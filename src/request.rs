//! Provisioning request types.
//!
//! A [`ProvisioningRequest`] is the immutable input to a pipeline. It is
//! authored as YAML or JSON and validated through [`crate::config::Validate`]
//! before any remote call is made.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Input describing the sandbox to create and what to run inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    /// Base image or snapshot the sandbox is created from.
    pub snapshot: String,

    /// Target region, if the remote service supports placement.
    #[serde(default)]
    pub region: Option<String>,

    /// Minutes of inactivity before the sandbox stops; 0 disables auto-stop.
    #[serde(default)]
    pub auto_stop_interval: i64,

    /// Plain environment variables set on the sandbox at creation.
    #[serde(default)]
    pub env: Vec<EnvVar>,

    /// Secrets resolved and injected once the sandbox has started.
    #[serde(default)]
    pub secrets: Vec<SecretBinding>,

    /// Repository URL to clone (URI or SCP style).
    pub repository: String,

    /// Optional script to run inside the cloned repository.
    #[serde(default)]
    pub bootstrap: Option<BootstrapDescriptor>,

    /// Overrides the configured pipeline timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProvisioningRequest {
    /// Creates a request for the given snapshot and repository.
    pub fn new(snapshot: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            region: None,
            auto_stop_interval: 0,
            env: Vec::new(),
            secrets: Vec::new(),
            repository: repository.into(),
            bootstrap: None,
            timeout_secs: None,
        }
    }

    /// Adds a plain environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a secret binding.
    pub fn with_secret(mut self, binding: SecretBinding) -> Self {
        self.secrets.push(binding);
        self
    }

    /// Sets the bootstrap descriptor.
    pub fn with_bootstrap(mut self, bootstrap: BootstrapDescriptor) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// Sets the pipeline timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Loads a request from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse request: {}", e))),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse request: {}", e))),
            _ => Err(Error::Config(format!(
                "unsupported request file '{}': expected .json, .yaml or .yml",
                path.display()
            ))),
        }
    }
}

/// A plain environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// How a resolved secret is delivered into the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// Exported as an environment variable named by the binding.
    EnvVar,
    /// Written to the file path named by the binding.
    File,
}

/// Location of a secret in an external store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    /// Store identifier.
    pub store: String,
    /// Key within the store.
    pub key: String,
}

impl SecretRef {
    pub fn new(store: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.key)
    }
}

/// Binds a stored secret to a name inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretBinding {
    pub kind: SecretKind,
    /// Environment variable name or file path, depending on `kind`.
    pub name: String,
    pub secret: SecretRef,
}

impl SecretBinding {
    /// Binds a secret to an environment variable.
    pub fn env(name: impl Into<String>, secret: SecretRef) -> Self {
        Self {
            kind: SecretKind::EnvVar,
            name: name.into(),
            secret,
        }
    }

    /// Binds a secret to a file path.
    pub fn file(path: impl Into<String>, secret: SecretRef) -> Self {
        Self {
            kind: SecretKind::File,
            name: path.into(),
            secret,
        }
    }
}

/// Bootstrap step as written by the caller.
///
/// `source` stays a free-form string so that unknown kinds reach validation
/// instead of failing deserialization; [`BootstrapDescriptor::resolve`]
/// turns it into a typed [`BootstrapSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapDescriptor {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl BootstrapDescriptor {
    /// Descriptor for a script body uploaded by the pipeline.
    pub fn inline(script: impl Into<String>) -> Self {
        Self {
            source: Some("inline".to_string()),
            script: Some(script.into()),
            path: None,
        }
    }

    /// Descriptor for a script already present in the repository.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            source: Some("file".to_string()),
            script: None,
            path: Some(path.into()),
        }
    }

    /// Checks the descriptor and returns its typed form.
    pub fn resolve(&self) -> Result<BootstrapSource> {
        let source = self
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Validation("bootstrap source must be declared".to_string()))?;

        match source {
            "inline" => match self.script.as_deref() {
                Some(script) if !script.trim().is_empty() => Ok(BootstrapSource::Inline {
                    script: script.to_string(),
                }),
                _ => Err(Error::Validation(
                    "inline bootstrap requires a non-empty script".to_string(),
                )),
            },
            "file" => match self.path.as_deref().map(str::trim) {
                Some(path) if !path.is_empty() => Ok(BootstrapSource::File {
                    path: path.to_string(),
                }),
                _ => Err(Error::Validation(
                    "file bootstrap requires a non-empty path".to_string(),
                )),
            },
            other => Err(Error::Validation(format!(
                "unknown bootstrap source '{}': expected 'inline' or 'file'",
                other
            ))),
        }
    }
}

/// Validated bootstrap source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapSource {
    /// Script text uploaded into the sandbox before running.
    Inline { script: String },
    /// Script path relative to the cloned repository.
    File { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_from_yaml() {
        let yaml = r#"
snapshot: ubuntu-22.04
region: eu
auto_stop_interval: 15
env:
  - name: RUST_LOG
    value: debug
secrets:
  - kind: env_var
    name: GIT_TOKEN
    secret:
      store: vault
      key: github
repository: https://github.com/acme/widget.git
bootstrap:
  source: inline
  script: "echo hi"
"#;
        let request: ProvisioningRequest = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(request.snapshot, "ubuntu-22.04");
        assert_eq!(request.auto_stop_interval, 15);
        assert_eq!(request.env[0].name, "RUST_LOG");
        assert_eq!(request.secrets[0].kind, SecretKind::EnvVar);
        assert_eq!(request.secrets[0].secret.to_string(), "vault/github");
        assert_eq!(
            request.bootstrap.unwrap().resolve().unwrap(),
            BootstrapSource::Inline {
                script: "echo hi".to_string()
            }
        );
    }

    #[test]
    fn request_defaults_optional_fields() {
        let json = r#"{"snapshot": "base", "repository": "git@github.com:acme/widget.git"}"#;
        let request: ProvisioningRequest = serde_json::from_str(json).unwrap();

        assert!(request.env.is_empty());
        assert!(request.secrets.is_empty());
        assert!(request.bootstrap.is_none());
        assert_eq!(request.auto_stop_interval, 0);
    }

    #[test]
    fn request_loads_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(&path, r#"{"snapshot": "base", "repository": "https://x/y.git"}"#)
            .unwrap();

        let request = ProvisioningRequest::load(&path).unwrap();
        assert_eq!(request.repository, "https://x/y.git");

        let bad = dir.path().join("request.txt");
        std::fs::write(&bad, "").unwrap();
        assert!(matches!(
            ProvisioningRequest::load(&bad),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn bootstrap_requires_source() {
        let descriptor = BootstrapDescriptor {
            source: None,
            script: Some("echo hi".to_string()),
            path: None,
        };
        assert!(matches!(descriptor.resolve(), Err(Error::Validation(_))));
    }

    #[test]
    fn bootstrap_inline_requires_script() {
        let descriptor = BootstrapDescriptor::inline("   ");
        assert!(descriptor.resolve().is_err());
    }

    #[test]
    fn bootstrap_file_requires_path() {
        let descriptor = BootstrapDescriptor {
            source: Some("file".to_string()),
            script: Some("echo ignored".to_string()),
            path: None,
        };
        assert!(descriptor.resolve().is_err());
    }

    #[test]
    fn bootstrap_file_resolves() {
        assert_eq!(
            BootstrapDescriptor::file("scripts/setup.sh").resolve().unwrap(),
            BootstrapSource::File {
                path: "scripts/setup.sh".to_string()
            }
        );
    }

    #[test]
    fn bootstrap_rejects_unknown_source() {
        let descriptor = BootstrapDescriptor {
            source: Some("url".to_string()),
            script: None,
            path: Some("https://example.com/setup.sh".to_string()),
        };
        let err = descriptor.resolve().unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn secret_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SecretKind::EnvVar).unwrap(),
            "\"env_var\""
        );
        assert_eq!(serde_json::to_string(&SecretKind::File).unwrap(), "\"file\"");
    }
}
