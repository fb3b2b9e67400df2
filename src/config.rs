//! Configuration read by the core.
//!
//! Every type here deserializes with defaults for missing fields, so a
//! config file only needs to name what it changes:
//!
//! ```json
//! {
//!   "profiles_dir": "data/profiles",
//!   "cache": { "root": "data/cache", "extension": "wav" },
//!   "registry": { "server_mode": true, "instances_per_model": 4 }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::engines::ModelDescriptor;
use crate::error::ConfigError;

/// Audio cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory; each profile gets a subdirectory.
    pub root: PathBuf,
    /// Global switch. Profiles may override it in their settings.
    pub enabled: bool,
    /// Container extension for stored audio files, without the dot.
    pub extension: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cache"),
            enabled: true,
            extension: "wav".to_string(),
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct RegistryConfig {
    /// Headless/server deployments run several workers per model.
    pub server_mode: bool,
    /// Workers per model in server mode.
    pub instances_per_model: usize,
    /// Explicit per-model counts keyed by `engine:model`; wins over the above.
    pub model_instances: HashMap<String, usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server_mode: false,
            instances_per_model: 1,
            model_instances: HashMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Number of workers to create for `model`.
    pub fn instance_count(&self, model: &ModelDescriptor) -> usize {
        let key = format!("{}:{}", model.engine_id, model.id);
        if let Some(&count) = self.model_instances.get(&key) {
            return count;
        }
        if self.server_mode {
            self.instances_per_model
        } else {
            1
        }
    }
}

/// Top-level configuration for a [`SpeechService`](crate::SpeechService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct ServiceConfig {
    pub profiles_dir: PathBuf,
    pub cache: CacheConfig,
    pub registry: RegistryConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            profiles_dir: PathBuf::from("profiles"),
            cache: CacheConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.extension.is_empty() || self.cache.extension.contains(['.', '/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "cache.extension {:?} must be a bare file extension",
                self.cache.extension
            )));
        }
        if self.registry.server_mode && self.registry.instances_per_model == 0 {
            return Err(ConfigError::Invalid(
                "registry.instances_per_model must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(engine: &str, id: &str) -> ModelDescriptor {
        ModelDescriptor::new(engine, id, id)
    }

    #[test]
    fn interactive_mode_uses_one_instance() {
        let config = RegistryConfigBuilder::default()
            .instances_per_model(4usize)
            .build()
            .unwrap();
        assert_eq!(config.instance_count(&model("piper", "lessac")), 1);
    }

    #[test]
    fn server_mode_uses_configured_count_and_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("piper:large".to_string(), 2usize);
        let config = RegistryConfigBuilder::default()
            .server_mode(true)
            .instances_per_model(4usize)
            .model_instances(overrides)
            .build()
            .unwrap();
        assert_eq!(config.instance_count(&model("piper", "lessac")), 4);
        assert_eq!(config.instance_count(&model("piper", "large")), 2);
    }

    #[test]
    fn loads_partial_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"cache": {"root": "/tmp/voices", "enabled": false}, "registry": {"server_mode": true}}"#,
        )
        .unwrap();

        let config = ServiceConfig::from_json_file(&path).unwrap();
        assert_eq!(config.profiles_dir, PathBuf::from("profiles"));
        assert_eq!(config.cache.root, PathBuf::from("/tmp/voices"));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.extension, "wav");
        assert!(config.registry.server_mode);
        assert_eq!(config.registry.instances_per_model, 1);
    }

    #[test]
    fn rejects_bad_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cache": {"extension": ".wav"}}"#).unwrap();
        assert!(matches!(
            ServiceConfig::from_json_file(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn builder_accepts_paths() {
        let config = ServiceConfigBuilder::default()
            .profiles_dir("data/profiles")
            .cache(CacheConfigBuilder::default().root("data/cache").build().unwrap())
            .build()
            .unwrap();
        assert_eq!(config.profiles_dir, PathBuf::from("data/profiles"));
        assert_eq!(config.cache.root, PathBuf::from("data/cache"));
        assert!(config.cache.enabled);
    }
}
