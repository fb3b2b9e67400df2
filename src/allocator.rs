//! Character → voice casting.
//!
//! A character keeps the first voice it is given. New characters are cast
//! by a generator seeded from the character name, so the same name picks
//! the same voice from the same catalog.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engines::{EngineDescriptor, EngineRegistry};
use crate::error::{AllocationError, TtsError};
use crate::profile::{Profile, ProfileSettings, ProfileStore};
use crate::voice::Voice;

pub struct VoiceAllocator {
    registry: Arc<EngineRegistry>,
    profiles: Arc<ProfileStore>,
}

impl VoiceAllocator {
    pub fn new(registry: Arc<EngineRegistry>, profiles: Arc<ProfileStore>) -> Self {
        Self { registry, profiles }
    }

    /// Voice for `character` within `profile_id`.
    ///
    /// `::<name>:<engine>:<model>:<voice>` is parsed and returned without
    /// touching the profile. Otherwise an already bound voice is returned
    /// as is, or a new one is cast and saved to the profile. The profile
    /// stays locked from the lookup until the save completes, so concurrent
    /// first requests for one character agree on a single voice.
    pub fn resolve(&self, profile_id: &str, character: &str) -> Result<Voice, TtsError> {
        if Voice::is_override(character) {
            return Ok(Voice::parse_override(character)?);
        }

        let handle = self.profiles.load(profile_id)?;
        let mut profile = handle.lock();
        if let Some(voice) = profile.bound_voice(character) {
            return Ok(voice.clone());
        }

        let voice = self.allocate(&profile, character)?;
        profile.set_voice(character, voice.clone())?;
        log::debug!("Cast '{character}' in profile '{profile_id}' as {voice}");
        Ok(voice)
    }

    fn allocate(&self, profile: &Profile, character: &str) -> Result<Voice, TtsError> {
        let settings = profile.settings.as_ref();
        let mut rng = StdRng::seed_from_u64(name_seed(character));

        let candidates: Vec<EngineDescriptor> = self
            .registry
            .list_all_engines()
            .into_iter()
            .filter(|engine| !self.enabled_models(settings, engine).is_empty())
            .collect();
        let engine = pick(&candidates, &mut rng).ok_or(AllocationError::NoEnginesAvailable)?;

        let models = self.enabled_models(settings, engine);
        let model_id = pick(&models, &mut rng).ok_or_else(|| AllocationError::NoModelsAvailable {
            engine: engine.id.clone(),
        })?;

        let mut voices = self.registry.model_voices(&engine.id, model_id)?;
        voices.sort_by(|a, b| a.voice_id.cmp(&b.voice_id));
        let voice = pick(&voices, &mut rng).ok_or_else(|| AllocationError::NoVoicesAvailable {
            engine: engine.id.clone(),
            model: model_id.clone(),
        })?;

        Ok(voice.clone())
    }

    /// Models of `engine` usable for casting, in id order. A profile toggle
    /// for a model wins over the global enable state.
    fn enabled_models(&self, settings: Option<&ProfileSettings>, engine: &EngineDescriptor) -> Vec<String> {
        engine
            .models
            .keys()
            .filter(|model_id| {
                settings
                    .and_then(|s| s.model_toggle(&engine.id, model_id))
                    .unwrap_or_else(|| self.registry.is_enabled(&engine.id, model_id))
            })
            .cloned()
            .collect()
    }
}

/// Polynomial rolling hash of the name's characters.
fn name_seed(name: &str) -> u64 {
    name.chars()
        .fold(0u64, |hash, c| hash.wrapping_mul(31).wrapping_add(c as u64))
}

/// Uniform pick over the whole slice; a single candidate is taken as is.
fn pick<'a, T>(items: &'a [T], rng: &mut StdRng) -> Option<&'a T> {
    match items.len() {
        0 => None,
        1 => items.first(),
        n => items.get(rng.random_range(0..n)),
    }
}
