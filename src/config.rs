//! Validation for provisioning requests and settings.
//!
//! Validation is synchronous and side-effect free; it runs before the first
//! remote call so malformed input never creates a sandbox.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::repo;
use crate::request::{ProvisioningRequest, SecretKind};
use crate::settings::Settings;

static ENV_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"));

/// Returns true if `name` is usable as a shell environment variable name.
pub fn is_env_name(name: &str) -> bool {
    ENV_NAME.is_match(name)
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Validation(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for ProvisioningRequest {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.repository.trim().is_empty() {
            result.add_error("repository cannot be empty");
        } else if let Err(e) = repo::directory_name(&self.repository) {
            result.add_error(e.to_string());
        }

        if self.snapshot.trim().is_empty() {
            result.add_warning("no snapshot given - the service default image will be used");
        }

        if self.auto_stop_interval < 0 {
            result.add_error(format!(
                "auto_stop_interval must be >= 0, got {}",
                self.auto_stop_interval
            ));
        }

        if self.timeout_secs == Some(0) {
            result.add_error("timeout_secs must be greater than 0");
        }

        let mut seen = HashSet::new();
        for var in &self.env {
            if !is_env_name(&var.name) {
                result.add_error(format!("invalid environment variable name '{}'", var.name));
            } else if !seen.insert(var.name.as_str()) {
                result.add_warning(format!(
                    "environment variable '{}' is set more than once; the last value wins",
                    var.name
                ));
            }
        }

        for (index, binding) in self.secrets.iter().enumerate() {
            if binding.secret.store.trim().is_empty() || binding.secret.key.trim().is_empty() {
                result.add_error(format!(
                    "secret binding {} must name both a store and a key",
                    index
                ));
            }
            match binding.kind {
                SecretKind::EnvVar if !is_env_name(&binding.name) => {
                    result.add_error(format!(
                        "secret binding {} has invalid environment variable name '{}'",
                        index, binding.name
                    ));
                }
                SecretKind::File if binding.name.trim().is_empty() || binding.name.contains('\0') => {
                    result.add_error(format!("secret binding {} has an invalid file path", index));
                }
                _ => {}
            }
        }

        if let Some(bootstrap) = &self.bootstrap {
            match bootstrap.resolve() {
                Ok(_) => {
                    if bootstrap.path.as_deref().is_some_and(|p| p.starts_with('/')) {
                        result.add_warning(
                            "bootstrap path is absolute - it is not resolved inside the repository",
                        );
                    }
                }
                Err(Error::Validation(msg)) => result.add_error(msg),
                Err(e) => result.add_error(e.to_string()),
            }
        }

        result
    }
}

impl Validate for Settings {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.poll_interval_secs == 0 {
            result.add_error("poll_interval_secs must be at least 1");
        }

        if self.timeout_secs == 0 {
            result.add_error("timeout_secs must be greater than 0");
        } else if self.timeout_secs < self.poll_interval_secs {
            result.add_warning("timeout_secs is shorter than one poll interval");
        }

        if !self.base_dir.starts_with('/') {
            result.add_error(format!("base_dir '{}' must be absolute", self.base_dir));
        }

        if self.bootstrap_script_name.is_empty()
            || self.bootstrap_script_name.contains('/')
            || self.bootstrap_script_name == ".."
        {
            result.add_error("bootstrap_script_name must be a bare file name");
        }

        if !is_env_name(&self.git_token_secret) {
            result.add_error(format!(
                "git_token_secret '{}' is not a valid environment variable name",
                self.git_token_secret
            ));
        }

        if self.log_excerpt_chars == 0 {
            result.add_warning("log_excerpt_chars = 0 drops command output from failure messages");
        }

        result
    }
}

/// Validates both request and settings for a pipeline start.
pub fn validate_start(request: &ProvisioningRequest, settings: &Settings) -> ValidationResult {
    let mut result = ValidationResult::default();
    result.merge(settings.validate());
    result.merge(request.validate());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BootstrapDescriptor, SecretBinding, SecretRef};

    fn request() -> ProvisioningRequest {
        ProvisioningRequest::new("base", "https://github.com/acme/widget.git")
    }

    // ========================================
    // ProvisioningRequest validation tests
    // ========================================

    #[test]
    fn minimal_request_passes() {
        let result = request().validate();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn empty_repository_fails() {
        let result = ProvisioningRequest::new("base", "").validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("repository")));
    }

    #[test]
    fn unresolvable_repository_fails() {
        let result = ProvisioningRequest::new("base", "not a url").validate();
        assert!(!result.is_valid());
    }

    #[test]
    fn bad_env_name_fails() {
        let result = request().with_env("1ABC", "x").validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("1ABC")));
    }

    #[test]
    fn duplicate_env_name_warns() {
        let result = request().with_env("A", "1").with_env("A", "2").validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("more than once")));
    }

    #[test]
    fn negative_auto_stop_fails() {
        let mut req = request();
        req.auto_stop_interval = -1;
        assert!(!req.validate().is_valid());
    }

    #[test]
    fn zero_timeout_fails() {
        assert!(!request().with_timeout_secs(0).validate().is_valid());
    }

    #[test]
    fn secret_binding_without_key_fails() {
        let req = request().with_secret(SecretBinding::env("TOKEN", SecretRef::new("vault", "")));
        let result = req.validate();
        assert!(result.errors.iter().any(|e| e.contains("store and a key")));
    }

    #[test]
    fn env_secret_with_bad_name_fails() {
        let req = request().with_secret(SecretBinding::env("MY-TOKEN", SecretRef::new("env", "T")));
        assert!(!req.validate().is_valid());
    }

    #[test]
    fn file_secret_with_empty_path_fails() {
        let req = request().with_secret(SecretBinding::file("", SecretRef::new("env", "T")));
        assert!(!req.validate().is_valid());
    }

    #[test]
    fn bootstrap_errors_surface() {
        let req = request().with_bootstrap(BootstrapDescriptor {
            source: Some("remote".to_string()),
            ..Default::default()
        });
        let result = req.validate();
        assert!(result.errors.iter().any(|e| e.contains("remote")));
    }

    #[test]
    fn absolute_bootstrap_path_warns() {
        let req = request().with_bootstrap(BootstrapDescriptor::file("/opt/setup.sh"));
        let result = req.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("absolute")));
    }

    // ========================================
    // Settings validation tests
    // ========================================

    #[test]
    fn default_settings_valid() {
        assert!(Settings::default().validate().is_valid());
    }

    #[test]
    fn zero_poll_interval_fails() {
        let settings = Settings {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(!settings.validate().is_valid());
    }

    #[test]
    fn relative_base_dir_fails() {
        let settings = Settings {
            base_dir: "workspace".to_string(),
            ..Default::default()
        };
        assert!(!settings.validate().is_valid());
    }

    #[test]
    fn script_name_with_slash_fails() {
        let settings = Settings {
            bootstrap_script_name: "bin/setup.sh".to_string(),
            ..Default::default()
        };
        assert!(!settings.validate().is_valid());
    }

    // ========================================
    // Combined validation tests
    // ========================================

    #[test]
    fn validate_start_combines_results() {
        let settings = Settings {
            poll_interval_secs: 0,
            ..Default::default()
        };
        let result = validate_start(&ProvisioningRequest::new("base", ""), &settings);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn into_result_joins_errors() {
        let mut result = ValidationResult::default();
        result.add_error("first");
        result.add_error("second");
        let err = result.into_result().unwrap_err();
        assert_eq!(err.to_string(), "invalid request: first; second");
    }

    #[test]
    fn env_name_pattern() {
        assert!(is_env_name("_A1"));
        assert!(is_env_name("path"));
        assert!(!is_env_name(""));
        assert!(!is_env_name("9LIVES"));
        assert!(!is_env_name("A-B"));
    }
}
