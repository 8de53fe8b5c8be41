//! Runtime configuration.
//!
//! Configuration is plain serde data. It can be built in code, read from JSON, and
//! selectively overridden from the environment:
//!
//! | variable                  | field              |
//! |---------------------------|--------------------|
//! | `GCBRIDGE_GC_THRESHOLD`   | `gc.threshold`     |
//! | `GCBRIDGE_GC_DISABLE`     | `gc.enabled=false` |

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

pub const THRESHOLD_ENV: &str = "GCBRIDGE_GC_THRESHOLD";
pub const DISABLE_ENV: &str = "GCBRIDGE_GC_DISABLE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("gc.threshold must be greater than zero")]
    ZeroThreshold,
    #[error("gc.slice_budget must be greater than zero")]
    ZeroSliceBudget,
}

/// Collector settings applied to every context heap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    /// Whether threshold-triggered collections run at all. Explicit collections always run.
    pub enabled: bool,
    /// Allocations between threshold-triggered collections.
    pub threshold: usize,
    /// Grow or shrink the threshold based on how much each collection reclaims.
    pub adaptive: bool,
    /// Grey objects scanned per incremental marking slice.
    pub slice_budget: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 10_000,
            adaptive: true,
            slice_budget: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub gc: GcConfig,
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Applies the `GCBRIDGE_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    /// Applies overrides read through `lookup` instead of the process environment.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(THRESHOLD_ENV) {
            self.gc.threshold = match value.trim().parse::<usize>() {
                Ok(threshold) if threshold > 0 => threshold,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: THRESHOLD_ENV,
                        value,
                    });
                }
            };
        }

        if lookup(DISABLE_ENV).is_some() {
            self.gc.enabled = false;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gc.threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.gc.slice_budget == 0 {
            return Err(ConfigError::ZeroSliceBudget);
        }
        Ok(())
    }
}
