//! Layered configuration for the bootstrap engine.
//!
//! Values merge from defaults, configuration files, and `MOOR_`-prefixed
//! environment variables via `ortho-config`; CLI flags override individual
//! fields afterwards. Validation reports the first problem with the
//! variable name to set.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::repo::CommitAuthor;

/// Default branch holding the desired state.
pub const DEFAULT_BRANCH: &str = "main";
/// Default reconciliation interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
/// Default delay between readiness probes in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Default readiness deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Bootstrap settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "MOOR")]
pub struct BootstrapConfig {
    /// Base URL of the target environment's API.
    #[ortho_config(default = String::new())]
    pub environment_url: String,
    /// Bearer token for the environment API.
    pub environment_token: Option<String>,
    /// Branch holding the desired state.
    #[ortho_config(default = DEFAULT_BRANCH.to_owned())]
    pub branch: String,
    /// Logical namespace receiving the components.
    #[ortho_config(default = "moor-system".to_owned())]
    pub namespace: String,
    /// Comma-separated component agents to deploy.
    #[ortho_config(default = "source-agent,apply-agent".to_owned())]
    pub components: String,
    /// Container registry the component images are pulled from.
    #[ortho_config(default = "ghcr.io/moor-cd".to_owned())]
    pub registry: String,
    /// Image tag shared by all components.
    #[ortho_config(default = "latest".to_owned())]
    pub image_tag: String,
    /// Author name stamped on generated commits.
    #[ortho_config(default = "moor".to_owned())]
    pub author_name: String,
    /// Author email stamped on generated commits.
    #[ortho_config(default = "moor@localhost".to_owned())]
    pub author_email: String,
    /// Reconciliation interval in seconds.
    #[ortho_config(default = DEFAULT_INTERVAL_SECS)]
    pub interval_secs: u64,
    /// Delay between readiness probes in seconds.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,
    /// Overall deadline for each readiness wait in seconds.
    #[ortho_config(default = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    /// Base URL of the hosting provider's API, when one is used.
    pub provider_api: Option<String>,
    /// Access token for the hosting provider's API.
    pub provider_token: Option<String>,
}

/// Errors surfaced while loading or validating configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when merging configuration sources fails.
    #[error("failed to load configuration: {0}")]
    Parse(String),
    /// Raised when a required value is absent.
    #[error("missing {field}; set {variable} or pass {flag}")]
    Missing {
        /// Configuration field that is absent.
        field: String,
        /// Environment variable that supplies it.
        variable: String,
        /// CLI flag that supplies it.
        flag: String,
    },
    /// Raised when a value is present but unusable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Configuration field that failed validation.
        field: String,
        /// Why the value is unusable.
        reason: String,
    },
}

impl BootstrapConfig {
    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("moor")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures configuration values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] or [`ConfigError::Invalid`] naming
    /// the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: String::from("environment_url"),
                variable: String::from("MOOR_ENVIRONMENT_URL"),
                flag: String::from("--environment-url"),
            });
        }
        if self.component_list().is_empty() {
            return Err(ConfigError::Invalid {
                field: String::from("components"),
                reason: String::from("at least one component must be listed"),
            });
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: String::from("interval_secs"),
                reason: String::from("the reconciliation interval must be at least one second"),
            });
        }
        if self.timeout_secs < self.poll_interval_secs {
            return Err(ConfigError::Invalid {
                field: String::from("timeout_secs"),
                reason: String::from("the readiness deadline must cover at least one probe"),
            });
        }
        Ok(())
    }

    /// Splits the comma-separated component list, dropping empty entries.
    #[must_use]
    pub fn component_list(&self) -> Vec<String> {
        self.components
            .split(',')
            .map(str::trim)
            .filter(|component| !component.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Builds the commit author identity.
    #[must_use]
    pub fn author(&self) -> CommitAuthor {
        CommitAuthor {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
        }
    }

    /// Reconciliation interval as a duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Readiness probe delay as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Readiness deadline as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> BootstrapConfig {
        BootstrapConfig {
            environment_url: String::from("http://env.local/api"),
            environment_token: None,
            branch: String::from(DEFAULT_BRANCH),
            namespace: String::from("moor-system"),
            components: String::from("source-agent,apply-agent"),
            registry: String::from("ghcr.io/moor-cd"),
            image_tag: String::from("latest"),
            author_name: String::from("moor"),
            author_email: String::from("moor@localhost"),
            interval_secs: DEFAULT_INTERVAL_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            provider_api: None,
            provider_token: None,
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_requires_environment_url() {
        let config = BootstrapConfig {
            environment_url: String::from("  "),
            ..base_config()
        };
        let err = config.validate().expect_err("blank url should fail");
        assert!(matches!(err, ConfigError::Missing { .. }));
        assert!(err.to_string().contains("MOOR_ENVIRONMENT_URL"));
    }

    #[test]
    fn component_list_trims_and_drops_empties() {
        let config = BootstrapConfig {
            components: String::from(" source-agent , ,apply-agent"),
            ..base_config()
        };
        assert_eq!(
            config.component_list(),
            vec![String::from("source-agent"), String::from("apply-agent")]
        );
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let config = BootstrapConfig {
            interval_secs: 0,
            ..base_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
