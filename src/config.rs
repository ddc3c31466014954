//! # Flow Configuration
//!
//! Layered configuration for the orchestration core: built-in defaults, an
//! optional TOML file, then `LBFLOW__`-prefixed environment overrides.
//!
//! ```rust,no_run
//! use lbflow_core::config::FlowConfig;
//! use lbflow_core::constants::TaskType;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FlowConfig::load(Some(std::path::Path::new("config/lbflow.toml")))?;
//! let limit = config.batch_limits.limit_for(TaskType::ModifyTargetWeight);
//! println!("modify weight chunk size: {limit}");
//! # Ok(())
//! # }
//! ```

use crate::constants::{TaskType, DEFAULT_TASK_SOURCE};
use crate::error::{FlowError, Result};
use crate::models::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const ENV_PREFIX: &str = "LBFLOW";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub database: DatabaseConfig,
    pub batch_limits: BatchLimits,
    pub retry: RetryPolicy,
    pub default_source: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            batch_limits: BatchLimits::default(),
            retry: RetryPolicy::default(),
            default_source: DEFAULT_TASK_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/lbflow_development".to_string(),
            max_connections: 10,
        }
    }
}

/// Maximum number of items the cloud API accepts in one call, per operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub add_targets: usize,
    pub remove_targets: usize,
    pub modify_weight: usize,
    pub modify_port: usize,
    pub delete_listeners: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            add_targets: 100,
            remove_targets: 100,
            modify_weight: 500,
            modify_port: 100,
            delete_listeners: 20,
        }
    }
}

impl BatchLimits {
    pub fn limit_for(&self, task_type: TaskType) -> usize {
        match task_type {
            TaskType::AddTarget => self.add_targets,
            TaskType::RemoveTarget => self.remove_targets,
            TaskType::ModifyTargetWeight => self.modify_weight,
            TaskType::ModifyTargetPort => self.modify_port,
            TaskType::DeleteListener => self.delete_listeners,
            // one rule binding per cloud call; the group's targets use add_targets
            TaskType::BindTargetGroup => 1,
        }
    }
}

impl FlowConfig {
    /// Load defaults, then `path` (when given), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::build(path, None)
    }

    /// Load defaults and environment overrides only
    pub fn from_env() -> Result<Self> {
        Self::build(None, None)
    }

    /// Same layering as [`FlowConfig::load`] with an explicit environment map
    /// instead of the process environment
    pub fn load_with_env(path: Option<&Path>, env: HashMap<String, String>) -> Result<Self> {
        Self::build(path, Some(env))
    }

    fn build(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let defaults = config::Config::try_from(&FlowConfig::default())
            .map_err(|e| FlowError::Configuration(format!("Invalid defaults: {e}")))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading flow configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let config: FlowConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FlowError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("add_targets", self.batch_limits.add_targets),
            ("remove_targets", self.batch_limits.remove_targets),
            ("modify_weight", self.batch_limits.modify_weight),
            ("modify_port", self.batch_limits.modify_port),
            ("delete_listeners", self.batch_limits.delete_listeners),
        ];
        for (name, limit) in limits {
            if limit == 0 {
                return Err(FlowError::Configuration(format!(
                    "batch_limits.{name} must be greater than zero"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(FlowError::Configuration(
                "retry.max_attempts must be greater than zero".to_string(),
            ));
        }

        if self.retry.min_sleep_ms > self.retry.max_sleep_ms {
            return Err(FlowError::Configuration(format!(
                "retry.min_sleep_ms ({}) exceeds retry.max_sleep_ms ({})",
                self.retry.min_sleep_ms, self.retry.max_sleep_ms
            )));
        }

        if self.database.max_connections == 0 {
            return Err(FlowError::Configuration(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
