//! Profiles: named sets of character → voice bindings.

pub mod store;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::voice::Voice;

pub use store::{ProfileGuard, ProfileHandle, ProfileStore};

/// Id of the profile that always exists.
pub const DEFAULT_PROFILE_ID: &str = "default";

/// Per-profile overrides of global behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// `engine -> model -> enabled`. A present entry replaces the global
    /// enable state of that model when casting voices for this profile.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub model_toggles: HashMap<String, HashMap<String, bool>>,
    /// Overrides the global cache switch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,
}

impl ProfileSettings {
    /// The profile's own toggle for a model, if it declares one.
    pub fn model_toggle(&self, engine_id: &str, model_id: &str) -> Option<bool> {
        self.model_toggles
            .get(engine_id)
            .and_then(|models| models.get(model_id))
            .copied()
    }

    pub fn set_model_toggle(&mut self, engine_id: &str, model_id: &str, enabled: bool) {
        self.model_toggles
            .entry(engine_id.to_string())
            .or_default()
            .insert(model_id.to_string(), enabled);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub voices: BTreeMap<String, Voice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ProfileSettings>,
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
            voices: BTreeMap::new(),
            settings: None,
        }
    }

    /// The character's voice if it is bound to an engine and model.
    pub fn bound_voice(&self, character: &str) -> Option<&Voice> {
        self.voices.get(character).filter(|v| v.is_bound())
    }

    pub fn cache_enabled(&self) -> Option<bool> {
        self.settings.as_ref().and_then(|s| s.cache_enabled)
    }
}

/// Profile ids become file names, so they are restricted to `[A-Za-z0-9_-]+`.
pub fn is_valid_profile_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_ids() {
        assert!(is_valid_profile_id("default"));
        assert!(is_valid_profile_id("Act_2-draft"));
        assert!(!is_valid_profile_id(""));
        assert!(!is_valid_profile_id("../etc"));
        assert!(!is_valid_profile_id("with space"));
    }

    #[test]
    fn unbound_voices_are_ignored() {
        let mut profile = Profile::new("p", "P", "");
        profile
            .voices
            .insert("Ghost".to_string(), Voice::new("", "", "v", ""));
        profile
            .voices
            .insert("Alice".to_string(), Voice::new("e", "m", "v", ""));
        assert!(profile.bound_voice("Ghost").is_none());
        assert!(profile.bound_voice("Nobody").is_none());
        assert_eq!(profile.bound_voice("Alice").unwrap().fingerprint(), "e:m:v");
    }

    #[test]
    fn model_toggles_lookup() {
        let mut settings = ProfileSettings::default();
        assert_eq!(settings.model_toggle("e", "m"), None);
        settings.set_model_toggle("e", "m", false);
        assert_eq!(settings.model_toggle("e", "m"), Some(false));
        assert_eq!(settings.model_toggle("e", "other"), None);
    }

    #[test]
    fn settings_are_optional_in_json() {
        let json = r#"{
            "id": "old",
            "name": "Old",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert!(profile.voices.is_empty());
        assert!(profile.settings.is_none());
        assert_eq!(profile.cache_enabled(), None);
    }
}
