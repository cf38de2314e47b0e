// src/core/config.rs

use crate::engine::error::{EngineError, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "MDFRAME_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "mdframe.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub default_db: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_db: "mdframe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Collection holding `{key, value}` cache entries
    pub collection: String,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            collection: "_om_querycache".to_string(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct QueryConfig {
    /// Propagate raw driver errors instead of field-naming query errors
    pub trace: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransformConfig {
    /// Worker count; negative values count back from the number of cpus
    pub n_jobs: i32,
    pub chunksize: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            n_jobs: -2,
            chunksize: 50_000,
        }
    }
}

/// Pipeline-building capabilities an ApplyContext may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Arithmetic,
    Datetime,
    Strings,
    Accumulators,
    Statistics,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Capability::Arithmetic => "arithmetic",
            Capability::Datetime => "datetime",
            Capability::Strings => "strings",
            Capability::Accumulators => "accumulators",
            Capability::Statistics => "statistics",
        }
    }

    pub fn all() -> Vec<Capability> {
        vec![
            Capability::Arithmetic,
            Capability::Datetime,
            Capability::Strings,
            Capability::Accumulators,
            Capability::Statistics,
        ]
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplyConfig {
    pub capabilities: Vec<Capability>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            capabilities: Capability::all(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub transform: TransformConfig,
    pub apply: ApplyConfig,
}

impl EngineConfig {
    /// Load from `$MDFRAME_CONFIG` or `./mdframe.toml`, falling back to defaults
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        match Self::from_file(&path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "ignoring unreadable config");
                Self::default()
            }
        }
    }

    /// Read a config file; `Ok(None)` when it does not exist
    pub fn from_file(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map(Some)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.apply.capabilities.contains(&cap)
    }

    /// Effective worker count for a joblib-style `n_jobs`
    pub fn resolve_n_jobs(n_jobs: i32) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as i32;
        let n = if n_jobs < 0 { cpus + 1 + n_jobs } else { n_jobs };
        n.max(1) as usize
    }
}
