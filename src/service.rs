use std::sync::Arc;

use crate::allocator::VoiceAllocator;
use crate::cache::AudioCache;
use crate::config::ServiceConfig;
use crate::engines::{EngineDescriptor, EngineRegistry};
use crate::error::{CacheError, RegistryError, TtsError};
use crate::profile::ProfileStore;
use crate::voice::Voice;
use crate::Backend;

/// The synthesis request path: cast, look up the cache, synthesize on a
/// pooled worker when needed, store the result.
pub struct SpeechService {
    config: ServiceConfig,
    registry: Arc<EngineRegistry>,
    profiles: Arc<ProfileStore>,
    cache: AudioCache,
    allocator: VoiceAllocator,
}

impl SpeechService {
    /// Open the profile store and cache described by `config`. No engines
    /// are registered yet.
    pub fn open(config: ServiceConfig) -> Result<Self, TtsError> {
        let registry = Arc::new(EngineRegistry::new());
        let profiles = Arc::new(ProfileStore::open(config.profiles_dir.clone())?);
        let cache = AudioCache::with_profiles(config.cache.clone(), Arc::clone(&profiles));
        let allocator = VoiceAllocator::new(Arc::clone(&registry), Arc::clone(&profiles));
        Ok(Self {
            config,
            registry,
            profiles,
            cache,
            allocator,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Register an engine with pool sizes taken from the registry config.
    pub fn register_engine<F>(&self, descriptor: EngineDescriptor, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Backend>,
    {
        let sizing = &self.config.registry;
        self.registry
            .register_engine(descriptor, factory, |model| sizing.instance_count(model))
    }

    pub fn resolve_voice(&self, profile_id: &str, character: &str) -> Result<Voice, TtsError> {
        self.allocator.resolve(profile_id, character)
    }

    /// Audio for one line spoken by `character`.
    ///
    /// Blocks while every worker of the character's model is busy. Cache
    /// failures are logged and never fail the request.
    pub fn synthesize(&self, profile_id: &str, character: &str, text: &str) -> Result<Vec<u8>, TtsError> {
        let voice = self.allocator.resolve(profile_id, character)?;
        let fingerprint = voice.fingerprint();

        if let Some(audio) = self.cache.get(profile_id, character, text, &fingerprint) {
            return Ok(audio);
        }

        let worker = self
            .registry
            .borrow(&voice.engine_id, &voice.model_id)
            .ok_or_else(|| TtsError::PoolUnavailable {
                engine: voice.engine_id.clone(),
                model: voice.model_id.clone(),
            })?;
        let result = worker.synthesize(&voice, text);
        worker.release();
        let audio = result?;

        if let Err(e) = self.cache.put(profile_id, character, text, &fingerprint, &audio) {
            log::warn!("Could not cache line of '{character}' in profile '{profile_id}': {e}");
        }
        Ok(audio)
    }

    /// Delete a profile and everything cached for it.
    pub fn delete_profile(&self, profile_id: &str) -> Result<(), TtsError> {
        self.profiles.delete(profile_id)?;
        if let Err(e) = self.cache.clear_profile(profile_id) {
            log::warn!("Could not clear cache of deleted profile '{profile_id}': {e}");
        }
        Ok(())
    }

    pub fn clear_character_cache(&self, profile_id: &str, character: &str) -> Result<(), CacheError> {
        self.cache.clear_character(profile_id, character)
    }

    pub fn clear_profile_cache(&self, profile_id: &str) -> Result<(), CacheError> {
        self.cache.clear_profile(profile_id)
    }

    /// Stop and free every worker.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}
