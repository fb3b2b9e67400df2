use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AllocationError;

/// Prefix marking a character name as an inline voice override.
pub const OVERRIDE_SENTINEL: &str = "::";

/// A concrete speaker: one voice of one model of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voice {
    #[serde(rename = "engine")]
    pub engine_id: String,
    #[serde(rename = "model")]
    pub model_id: String,
    #[serde(rename = "voice")]
    pub voice_id: String,
    #[serde(default)]
    pub display_name: String,
}

impl Voice {
    pub fn new(
        engine_id: impl Into<String>,
        model_id: impl Into<String>,
        voice_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            engine_id: engine_id.into(),
            model_id: model_id.into(),
            voice_id: voice_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Stable identity string, `engine:model:voice`.
    ///
    /// Audio cached for a character is only valid while the character's
    /// fingerprint stays the same.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}:{}", self.engine_id, self.model_id, self.voice_id)
    }

    /// A bound voice is usable when it names both an engine and a model.
    pub fn is_bound(&self) -> bool {
        !self.engine_id.is_empty() && !self.model_id.is_empty()
    }

    /// Returns true if `character` starts with the `::` override sentinel.
    pub fn is_override(character: &str) -> bool {
        character.starts_with(OVERRIDE_SENTINEL)
    }

    /// Parse `::<name>:<engine>:<model>:<voice>`.
    ///
    /// The first segment after the sentinel is a free-form placeholder and is
    /// ignored. Engine, model and voice must all be non-empty.
    pub fn parse_override(character: &str) -> Result<Self, AllocationError> {
        let invalid = || AllocationError::InvalidOverride(character.to_string());

        let rest = character.strip_prefix(OVERRIDE_SENTINEL).ok_or_else(invalid)?;
        let segments: Vec<&str> = rest.split(':').collect();
        let [_, engine, model, voice] = segments.as_slice() else {
            return Err(invalid());
        };
        if engine.is_empty() || model.is_empty() || voice.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(*engine, *model, *voice, *voice))
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() || self.display_name == self.voice_id {
            write!(f, "{}", self.fingerprint())
        } else {
            write!(f, "{} ({})", self.display_name, self.fingerprint())
        }
    }
}
