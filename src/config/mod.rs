//! Configuration loading and parsing.
//!
//! Engine settings are read from YAML:
//!
//! ```yaml
//! max_in_flight: 8
//! task_workers: 2
//! ```
//!
//! Every field is optional and falls back to sequential execution with one
//! worker per task pool.

mod error;

pub use error::ConfigError;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::context::ExecutionContext;

/// Engine settings (engine.yaml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of pipelines in flight at once.
    pub max_in_flight: usize,
    /// Workers per task pool when a task does not ask for a specific count.
    pub task_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            task_workers: 1,
        }
    }
}

impl EngineConfig {
    /// Parse and validate engine settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate engine settings from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings describe a runnable engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execution_context()?;

        if self.task_workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "task_workers cannot be zero".into(),
            ));
        }
        Ok(())
    }

    /// Build the execution context these settings describe.
    pub fn execution_context(&self) -> Result<ExecutionContext, ConfigError> {
        ExecutionContext::new(self.max_in_flight)
            .map_err(|e| ConfigError::InvalidConfig(format!("max_in_flight: {}", e)))
    }
}
