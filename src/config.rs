//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::containers::Containers;
use crate::localhost::LocalhostProvider;
use crate::pool::{AcquireOptions, BoundedPool, PoolRegistry};
use crate::provider::{InstanceProvider, ProviderError};

/// Controller settings derived from environment variables, configuration
/// files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PLZ",
    discovery(
        app_name = "plz",
        env_var = "PLZ_CONFIG_PATH",
        config_file_name = "plz.toml",
        dotfile_name = ".plz.toml",
        project_file_name = "plz.toml"
    )
)]
pub struct ControllerConfig {
    /// Where executions run: `localhost` or `aws-autoscaling`.
    #[ortho_config(default = "localhost".to_owned())]
    pub instance_provider: String,
    /// Auto scaling group backing the elastic pool. Required for
    /// `aws-autoscaling`.
    pub autoscaling_group: Option<String>,
    /// Availability checks made before an acquisition times out.
    #[ortho_config(default = 30)]
    pub max_acquire_trials: u32,
    /// Seconds to wait between availability checks.
    #[ortho_config(default = 10)]
    pub acquire_wait_seconds: u64,
}

/// Kind of [`InstanceProvider`] selected by configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderKind {
    /// Run everything on the controller's own machine.
    Localhost,
    /// Lease instances from an auto scaling group.
    AwsAutoscaling,
}

impl ProviderKind {
    /// Configuration spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Localhost => "localhost",
            Self::AwsAutoscaling => "aws-autoscaling",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "localhost" => Ok(Self::Localhost),
            "aws-autoscaling" => Ok(Self::AwsAutoscaling),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown instance provider '{other}': set PLZ_INSTANCE_PROVIDER or \
                 instance_provider in plz.toml to 'localhost' or 'aws-autoscaling'"
            ))),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to plz.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const AUTOSCALING_GROUP: FieldMetadata = FieldMetadata::new(
    "auto scaling group name",
    "PLZ_AUTOSCALING_GROUP",
    "autoscaling_group",
);

impl ControllerConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("plz-controller")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parses [`Self::instance_provider`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown provider names.
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        self.instance_provider.parse()
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key to fix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unknown provider or a
    /// zero trial count, and [`ConfigError::MissingField`] when the elastic
    /// pool has no group name.
    pub fn validate(&self) -> Result<ProviderKind, ConfigError> {
        let kind = self.provider_kind()?;
        if kind == ProviderKind::AwsAutoscaling {
            self.pool_name()?;
        }
        if self.max_acquire_trials == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "max_acquire_trials must be greater than zero: set PLZ_MAX_ACQUIRE_TRIALS or \
                 max_acquire_trials in plz.toml",
            )));
        }
        Ok(kind)
    }

    /// Retry bounds for pool acquisitions.
    #[must_use]
    pub const fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            max_trials: self.max_acquire_trials,
            wait_for: Duration::from_secs(self.acquire_wait_seconds),
        }
    }

    fn pool_name(&self) -> Result<&str, ConfigError> {
        self.autoscaling_group
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AUTOSCALING_GROUP.missing())
    }

    /// Builds the configured provider. Pool providers come from `registry`
    /// so every caller shares one provider, and one lock, per group; the
    /// configured retry bounds apply to acquisitions made through the
    /// returned handle.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Config`] when validation fails and
    /// [`SetupError::Provider`] when the auto scaling group cannot be found.
    pub async fn connect_provider(
        &self,
        containers: Arc<dyn Containers>,
        registry: &PoolRegistry,
    ) -> Result<Arc<dyn InstanceProvider>, SetupError> {
        let provider: Arc<dyn InstanceProvider> = match self.validate()? {
            ProviderKind::Localhost => Arc::new(LocalhostProvider::new(containers)),
            ProviderKind::AwsAutoscaling => {
                let shared = registry.get_or_create(self.pool_name()?).await?;
                Arc::new(BoundedPool::new(shared, self.acquire_options()))
            }
        };
        Ok(provider)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its accepted set.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

/// Errors raised while turning configuration into a provider.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Configuration did not validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The provider could not be created.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
