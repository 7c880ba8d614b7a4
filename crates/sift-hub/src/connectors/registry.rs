//! # Source Registry
//!
//! Thread-safe catalogue of supported plugins, initialised source instances
//! and search profiles. The profile `default` always exists; unless it is
//! configured explicitly it holds every instance.

use super::{ControllerParams, ParamSpec, QueryProvider};
use crate::error::{EngineError, ProviderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_PROFILE: &str = "default";

type ProviderFactory = Arc<
    dyn Fn(&BTreeMap<String, String>) -> std::result::Result<Arc<dyn QueryProvider>, ProviderError>
        + Send
        + Sync,
>;

/// A kind of data source that can be instantiated from string parameters.
#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    factory: ProviderFactory,
}

impl Plugin {
    pub fn new<F>(name: &str, description: &str, params: Vec<ParamSpec>, factory: F) -> Self
    where
        F: Fn(&BTreeMap<String, String>) -> std::result::Result<Arc<dyn QueryProvider>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
            factory: Arc::new(factory),
        }
    }

    /// Create a provider. Required parameters must be present; declared
    /// defaults fill in the rest.
    pub fn create(
        &self,
        params: &BTreeMap<String, String>,
    ) -> std::result::Result<Arc<dyn QueryProvider>, ProviderError> {
        let mut resolved = params.clone();
        for spec in &self.params {
            if resolved.contains_key(&spec.name) {
                continue;
            }
            match &spec.default {
                Some(default) if !spec.required => {
                    resolved.insert(spec.name.clone(), default.clone());
                }
                _ if spec.required => {
                    return Err(ProviderError::InvalidParams(format!(
                        "{} requires parameter '{}'",
                        self.name, spec.name
                    )))
                }
                _ => {}
            }
        }
        (self.factory)(&resolved)
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            params: self.params.clone(),
        }
    }
}

/// Serializable plugin description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

/// Serializable instance description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub description: String,
}

struct Instance {
    info: InstanceInfo,
    provider: Arc<dyn QueryProvider>,
}

/// Central registry of plugins, instances and search profiles.
#[derive(Default)]
pub struct SourceRegistry {
    plugins: RwLock<BTreeMap<String, Plugin>>,
    instances: RwLock<BTreeMap<String, Instance>>,
    profiles: RwLock<BTreeMap<String, Vec<String>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `memory` and `jsonl` plugins.
    pub async fn with_builtin_plugins() -> Self {
        let registry = Self::new();
        registry.register_plugin(super::memory::plugin()).await;
        registry.register_plugin(super::jsonl::plugin()).await;
        registry
    }

    pub async fn register_plugin(&self, plugin: Plugin) {
        let mut plugins = self.plugins.write().await;
        plugins.insert(plugin.name.clone(), plugin);
    }

    /// Instantiate `plugin` as a named instance.
    pub async fn create_instance(
        &self,
        name: &str,
        plugin: &str,
        description: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<InstanceInfo> {
        let provider = {
            let plugins = self.plugins.read().await;
            let plugin = plugins
                .get(plugin)
                .ok_or_else(|| EngineError::UnknownPlugin(plugin.to_string()))?;
            plugin.create(params)?
        };
        Ok(self.add_instance(name, plugin, description, provider).await)
    }

    /// Register an already-built provider as a named instance.
    pub async fn add_instance(
        &self,
        name: &str,
        plugin: &str,
        description: &str,
        provider: Arc<dyn QueryProvider>,
    ) -> InstanceInfo {
        let info = InstanceInfo {
            name: name.to_string(),
            plugin: plugin.to_string(),
            description: description.to_string(),
        };
        let mut instances = self.instances.write().await;
        if instances.contains_key(name) {
            tracing::warn!(instance = name, "replacing source instance");
        } else {
            tracing::info!(instance = name, plugin, "source instance registered");
        }
        instances.insert(
            name.to_string(),
            Instance {
                info: info.clone(),
                provider,
            },
        );
        info
    }

    /// Define a search profile. Every member must be a registered instance.
    pub async fn set_profile(&self, name: &str, members: Vec<String>) -> Result<()> {
        {
            let instances = self.instances.read().await;
            if let Some(missing) = members.iter().find(|m| !instances.contains_key(*m)) {
                return Err(EngineError::UnknownInstance(missing.clone()));
            }
        }
        self.profiles.write().await.insert(name.to_string(), members);
        Ok(())
    }

    /// Instances queried by `profile`.
    pub async fn profile_instances(&self, profile: &str) -> Result<Vec<String>> {
        if let Some(members) = self.profiles.read().await.get(profile) {
            return Ok(members.clone());
        }
        if profile == DEFAULT_PROFILE {
            return Ok(self.instances.read().await.keys().cloned().collect());
        }
        Err(EngineError::UnknownProfile(profile.to_string()))
    }

    pub async fn provider(&self, instance: &str) -> Result<Arc<dyn QueryProvider>> {
        self.instances
            .read()
            .await
            .get(instance)
            .map(|i| Arc::clone(&i.provider))
            .ok_or_else(|| EngineError::UnknownInstance(instance.to_string()))
    }

    pub async fn has_instance(&self, instance: &str) -> bool {
        self.instances.read().await.contains_key(instance)
    }

    pub async fn instance_names(&self) -> Vec<String> {
        self.instances.read().await.keys().cloned().collect()
    }

    pub async fn supported_plugins(&self) -> Vec<PluginInfo> {
        self.plugins.read().await.values().map(Plugin::info).collect()
    }

    pub async fn initialized_plugins(&self) -> Vec<InstanceInfo> {
        self.instances
            .read()
            .await
            .values()
            .map(|i| i.info.clone())
            .collect()
    }

    /// Every profile, including the implicit `default`.
    pub async fn search_profiles(&self) -> BTreeMap<String, Vec<String>> {
        let mut profiles = self.profiles.read().await.clone();
        if !profiles.contains_key(DEFAULT_PROFILE) {
            profiles.insert(DEFAULT_PROFILE.to_string(), self.instance_names().await);
        }
        profiles
    }

    pub async fn controller_params(&self, instance: &str) -> Result<ControllerParams> {
        let provider = self.provider(instance).await?;
        Ok(provider.get_controller_params().await?)
    }
}
