//! # Configuration
//!
//! `sift.toml` holds engine tuning, the source instances to initialise and
//! the search profiles grouping them. Every key is optional; a missing file
//! yields the defaults.

use crate::connectors::registry::SourceRegistry;
use crate::error::{ConfigError, EngineError};
use crate::query::ast::TimeSpan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "sift.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows requested from each source.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Buckets in the event histogram published with each batch.
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: usize,
    /// Look-back window when a query names no explicit range.
    #[serde(default = "default_range")]
    pub default_range: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            histogram_buckets: default_histogram_buckets(),
            default_range: default_range(),
        }
    }
}

impl EngineConfig {
    pub fn default_range_ms(&self) -> Result<i64, ConfigError> {
        self.default_range
            .parse::<TimeSpan>()
            .map(TimeSpan::as_millis)
            .map_err(|e| ConfigError::Invalid(format!("engine.default_range: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,
}

impl InstanceConfig {
    /// Plugin parameters as strings. Non-string values are rendered as JSON.
    pub fn string_params(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    toml::Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
                };
                (key.clone(), text)
            })
            .collect()
    }
}

fn default_limit() -> usize {
    5000
}
fn default_histogram_buckets() -> usize {
    100
}
fn default_range() -> String {
    "1h".to_string()
}

impl Config {
    /// Load and validate `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.engine.default_range_ms()?;
        if self.engine.default_limit == 0 {
            return Err(ConfigError::Invalid(
                "engine.default_limit must be positive".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for instance in &self.instances {
            if !seen.insert(instance.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "instance '{}' is defined twice",
                    instance.name
                )));
            }
        }
        Ok(())
    }
}

/// Build a registry with the built-in plugins, the configured instances and
/// profiles.
pub async fn build_registry(config: &Config) -> Result<SourceRegistry, EngineError> {
    let registry = SourceRegistry::with_builtin_plugins().await;
    for instance in &config.instances {
        registry
            .create_instance(
                &instance.name,
                &instance.plugin,
                &instance.description,
                &instance.string_params(),
            )
            .await?;
    }
    for (name, members) in &config.profiles {
        registry.set_profile(name, members.clone()).await?;
    }
    Ok(registry)
}
