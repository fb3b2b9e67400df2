//! Generated audio, reused per character and line.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<profile>/characters.json          # index for the whole profile
//! <root>/<profile>/<character>/<line>.wav   # one file per cached line
//! ```
//!
//! Every character's entry records the voice fingerprint its lines were
//! generated with. Reads with a different fingerprint miss; the first write
//! with a new fingerprint drops the character's old lines.

pub mod index;

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::profile::{is_valid_profile_id, ProfileStore};

pub use index::{audio_file_name, text_hash8, CharacterCache, ProfileCacheIndex, INDEX_FILE_NAME};

pub struct AudioCache {
    config: CacheConfig,
    profiles: Option<Arc<ProfileStore>>,
    /// Held for lookup and, on first use of a profile, for loading its index.
    indices: RwLock<HashMap<String, Arc<ProfileCacheIndex>>>,
}

impl AudioCache {
    /// A cache governed only by the global switch.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            profiles: None,
            indices: RwLock::new(HashMap::new()),
        }
    }

    /// A cache that also honours each profile's `cache_enabled` override.
    pub fn with_profiles(config: CacheConfig, profiles: Arc<ProfileStore>) -> Self {
        Self {
            profiles: Some(profiles),
            ..Self::new(config)
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Global switch.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Global switch combined with the profile's override, if any.
    pub fn enabled_for(&self, profile_id: &str) -> bool {
        let Some(store) = &self.profiles else {
            return self.config.enabled;
        };
        if !store.exists(profile_id) {
            return self.config.enabled;
        }
        match store.load(profile_id) {
            Ok(handle) => handle.lock().cache_enabled().unwrap_or(self.config.enabled),
            Err(e) => {
                log::warn!("Could not read cache setting of profile '{profile_id}': {e}");
                self.config.enabled
            }
        }
    }

    fn profile_dir(&self, profile_id: &str) -> PathBuf {
        self.config.root.join(profile_id)
    }

    fn index(&self, profile_id: &str) -> Arc<ProfileCacheIndex> {
        if let Some(index) = self.indices.read().get(profile_id) {
            return Arc::clone(index);
        }

        let mut indices = self.indices.write();
        Arc::clone(
            indices
                .entry(profile_id.to_string())
                .or_insert_with(|| Arc::new(ProfileCacheIndex::load(self.profile_dir(profile_id)))),
        )
    }

    /// Cached audio for `text`, if it was generated with `voice_fingerprint`.
    ///
    /// Unreadable audio files are logged and reported as a miss.
    pub fn get(
        &self,
        profile_id: &str,
        character: &str,
        text: &str,
        voice_fingerprint: &str,
    ) -> Option<Vec<u8>> {
        if !is_valid_profile_id(profile_id) || !self.enabled_for(profile_id) {
            return None;
        }

        let index = self.index(profile_id);
        let file_name = {
            let characters = index.characters().read();
            let entry = characters.get(character)?;
            if entry.voice_fingerprint != voice_fingerprint {
                log::debug!(
                    "Cached lines of '{character}' use {}, wanted {voice_fingerprint}",
                    entry.voice_fingerprint
                );
                return None;
            }
            entry.lines.get(&text_hash8(text))?.clone()
        };

        let path = index.character_dir(character).join(&file_name);
        match fs::read(&path) {
            Ok(bytes) => {
                log::debug!("Cache hit for '{character}': {file_name}");
                Some(bytes)
            }
            Err(e) => {
                log::warn!("Cached audio {} unreadable: {e}", path.display());
                None
            }
        }
    }

    /// Store audio for `text` under `voice_fingerprint`.
    ///
    /// If the character's lines were made with another voice they are all
    /// dropped first. The audio file is written before the index; if the
    /// index write fails the file stays and the error is returned.
    pub fn put(
        &self,
        profile_id: &str,
        character: &str,
        text: &str,
        voice_fingerprint: &str,
        audio: &[u8],
    ) -> Result<(), CacheError> {
        if !self.enabled_for(profile_id) {
            return Ok(());
        }
        if !is_valid_profile_id(profile_id) {
            return Err(CacheError::InvalidProfileId(profile_id.to_string()));
        }

        let index = self.index(profile_id);
        self.store_line(&index, character, text, voice_fingerprint, audio)
    }

    fn store_line(
        &self,
        index: &ProfileCacheIndex,
        character: &str,
        text: &str,
        voice_fingerprint: &str,
        audio: &[u8],
    ) -> Result<(), CacheError> {
        let char_dir = index.character_dir(character);
        let mut characters = index.characters().write();
        if index.is_removed() {
            log::debug!(
                "Cache in {} was cleared, skipping write for '{character}'",
                index.dir().display()
            );
            return Ok(());
        }

        let entry = characters
            .entry(character.to_string())
            .or_insert_with(|| CharacterCache::new(voice_fingerprint));
        if entry.voice_fingerprint != voice_fingerprint {
            log::info!(
                "Voice of '{character}' changed from {} to {voice_fingerprint}, dropping {} cached line(s)",
                entry.voice_fingerprint,
                entry.lines.len()
            );
            *entry = CharacterCache::new(voice_fingerprint);
            remove_dir_if_present(&char_dir);
        }

        let hash = text_hash8(text);
        let file_name = audio_file_name(text, &hash, &self.config.extension);
        fs::create_dir_all(&char_dir)?;
        fs::write(char_dir.join(&file_name), audio)?;
        entry.lines.insert(hash, file_name);

        index.persist(&characters)
    }

    /// Drop one character's cached lines. Missing state is not an error.
    pub fn clear_character(&self, profile_id: &str, character: &str) -> Result<(), CacheError> {
        if !is_valid_profile_id(profile_id) {
            return Err(CacheError::InvalidProfileId(profile_id.to_string()));
        }

        let index = self.index(profile_id);
        let char_dir = index.character_dir(character);
        let mut characters = index.characters().write();
        if characters.remove(character).is_some() && !index.is_removed() {
            index.persist(&characters)?;
        }
        remove_dir(&char_dir)?;
        log::info!("Cleared cache of '{character}' in profile '{profile_id}'");
        Ok(())
    }

    /// Drop everything cached for a profile. Missing state is not an error.
    ///
    /// A `put` racing with this call either lands before the clear, and is
    /// removed with the rest, or is skipped.
    pub fn clear_profile(&self, profile_id: &str) -> Result<(), CacheError> {
        if !is_valid_profile_id(profile_id) {
            return Err(CacheError::InvalidProfileId(profile_id.to_string()));
        }

        let removed = self.indices.write().remove(profile_id);
        // Writers that still hold the old index see the flag under this lock.
        let _characters = removed.as_ref().map(|index| {
            let characters = index.characters().write();
            index.mark_removed();
            characters
        });
        remove_dir(&self.profile_dir(profile_id))?;
        log::info!("Cleared cache of profile '{profile_id}'");
        Ok(())
    }

    /// Snapshot of a character's entry.
    pub fn character_entry(&self, profile_id: &str, character: &str) -> Option<CharacterCache> {
        if !is_valid_profile_id(profile_id) {
            return None;
        }
        self.index(profile_id)
            .characters()
            .read()
            .get(character)
            .cloned()
    }
}

fn remove_dir(dir: &Path) -> Result<(), CacheError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_dir_if_present(dir: &Path) {
    if let Err(e) = remove_dir(dir) {
        log::warn!("Could not remove stale audio in {}: {e}", dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileSettings;

    fn config(root: &Path, enabled: bool) -> CacheConfig {
        CacheConfig {
            root: root.to_path_buf(),
            enabled,
            extension: "wav".to_string(),
        }
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let Ok(entries) = fs::read_dir(dir) else {
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else {
                found.push(path);
            }
        }
        found
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(config(dir.path(), true));
        cache.put("p", "Alice", "Hello world", "e:m:v", b"RIFF-1").unwrap();
        assert_eq!(
            cache.get("p", "Alice", "Hello world", "e:m:v"),
            Some(b"RIFF-1".to_vec())
        );
        assert_eq!(cache.get("p", "Alice", "Another line", "e:m:v"), None);
        assert_eq!(cache.get("p", "Bob", "Hello world", "e:m:v"), None);
    }

    #[test]
    fn voice_change_invalidates_character() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(config(dir.path(), true));
        cache.put("p", "Alice", "Hello world", "e:m:v1", b"one").unwrap();
        cache.put("p", "Bob", "Hello world", "e:m:v1", b"bob").unwrap();

        // Stale reads miss without touching the entry.
        assert_eq!(cache.get("p", "Alice", "Hello world", "e:m:v2"), None);
        assert_eq!(
            cache.character_entry("p", "Alice").unwrap().voice_fingerprint,
            "e:m:v1"
        );

        cache.put("p", "Alice", "Other line", "e:m:v2", b"two").unwrap();
        assert_eq!(cache.get("p", "Alice", "Hello world", "e:m:v2"), None);
        assert_eq!(cache.get("p", "Alice", "Hello world", "e:m:v1"), None);
        assert_eq!(
            cache.get("p", "Alice", "Other line", "e:m:v2"),
            Some(b"two".to_vec())
        );
        let entry = cache.character_entry("p", "Alice").unwrap();
        assert_eq!(entry.lines.len(), 1);
        assert_eq!(files_under(&dir.path().join("p").join("Alice")).len(), 1);

        // Other characters are untouched.
        assert_eq!(cache.get("p", "Bob", "Hello world", "e:m:v1"), Some(b"bob".to_vec()));
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        AudioCache::new(config(dir.path(), true))
            .put("p", "Alice", "Hello world", "e:m:v", b"bytes")
            .unwrap();

        let cache = AudioCache::new(config(dir.path(), true));
        assert_eq!(
            cache.get("p", "Alice", "Hello world", "e:m:v"),
            Some(b"bytes".to_vec())
        );
        assert!(dir.path().join("p").join(INDEX_FILE_NAME).is_file());
    }

    #[test]
    fn disabled_cache_leaves_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(config(dir.path(), false));
        assert!(!cache.enabled());
        for i in 0..3 {
            let text = format!("line {i}");
            cache.put("p", "Alice", &text, "e:m:v", b"bytes").unwrap();
            assert_eq!(cache.get("p", "Alice", &text, "e:m:v"), None);
        }
        assert!(files_under(dir.path()).is_empty());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn profile_override_beats_global_switch() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = Arc::new(ProfileStore::open(dir.path().join("profiles")).unwrap());
        profiles
            .update_settings(
                "quiet",
                Some(ProfileSettings {
                    cache_enabled: Some(false),
                    ..Default::default()
                }),
            )
            .unwrap();
        profiles
            .update_settings(
                "loud",
                Some(ProfileSettings {
                    cache_enabled: Some(true),
                    ..Default::default()
                }),
            )
            .unwrap();

        let cache_root = dir.path().join("cache");
        let cache = AudioCache::with_profiles(config(&cache_root, false), Arc::clone(&profiles));
        assert!(!cache.enabled_for("quiet"));
        assert!(cache.enabled_for("loud"));
        assert!(!cache.enabled_for("unknown"));
        assert!(!profiles.exists("unknown"));

        cache.put("quiet", "A", "line", "e:m:v", b"x").unwrap();
        cache.put("loud", "A", "line", "e:m:v", b"x").unwrap();
        assert!(!cache_root.join("quiet").exists());
        assert_eq!(cache.get("loud", "A", "line", "e:m:v"), Some(b"x".to_vec()));
    }

    #[test]
    fn missing_audio_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(config(dir.path(), true));
        cache.put("p", "Alice", "Hello world", "e:m:v", b"bytes").unwrap();
        fs::remove_dir_all(dir.path().join("p").join("Alice")).unwrap();
        assert_eq!(cache.get("p", "Alice", "Hello world", "e:m:v"), None);
    }

    #[test]
    fn failed_index_write_keeps_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the index file should go makes the rename fail.
        fs::create_dir_all(dir.path().join("p").join(INDEX_FILE_NAME)).unwrap();
        let cache = AudioCache::new(config(dir.path(), true));

        let result = cache.put("p", "Alice", "Hello world", "e:m:v", b"bytes");
        assert!(matches!(result, Err(CacheError::Io(_))));
        let name = audio_file_name("Hello world", &text_hash8("Hello world"), "wav");
        assert!(dir.path().join("p").join("Alice").join(name).is_file());
    }

    #[test]
    fn corrupt_index_is_replaced_by_next_put() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("p")).unwrap();
        fs::write(dir.path().join("p").join(INDEX_FILE_NAME), "{oops").unwrap();

        let cache = AudioCache::new(config(dir.path(), true));
        assert_eq!(cache.get("p", "Alice", "Hello world", "e:m:v"), None);
        cache.put("p", "Alice", "Hello world", "e:m:v", b"bytes").unwrap();

        let reloaded = AudioCache::new(config(dir.path(), true));
        assert_eq!(
            reloaded.get("p", "Alice", "Hello world", "e:m:v"),
            Some(b"bytes".to_vec())
        );
    }

    #[test]
    fn clear_character_and_profile() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(config(dir.path(), true));
        cache.put("p", "Alice", "one", "e:m:v", b"1").unwrap();
        cache.put("p", "Bob", "two", "e:m:v", b"2").unwrap();

        cache.clear_character("p", "Alice").unwrap();
        assert_eq!(cache.get("p", "Alice", "one", "e:m:v"), None);
        assert!(!dir.path().join("p").join("Alice").exists());
        assert_eq!(cache.get("p", "Bob", "two", "e:m:v"), Some(b"2".to_vec()));

        let reloaded = AudioCache::new(config(dir.path(), true));
        assert!(reloaded.character_entry("p", "Alice").is_none());

        cache.clear_profile("p").unwrap();
        assert!(!dir.path().join("p").exists());
        assert_eq!(cache.get("p", "Bob", "two", "e:m:v"), None);

        // Clearing again is fine.
        cache.clear_character("p", "Alice").unwrap();
        cache.clear_profile("p").unwrap();
        cache.clear_profile("never-used").unwrap();
    }

    #[test]
    fn rejects_path_like_profile_ids() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(config(&dir.path().join("cache"), true));
        assert!(matches!(
            cache.put("../escape", "A", "t", "e:m:v", b"x"),
            Err(CacheError::InvalidProfileId(_))
        ));
        assert_eq!(cache.get("../escape", "A", "t", "e:m:v"), None);
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn writes_through_a_cleared_index_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(config(dir.path(), true));
        cache.put("p", "Alice", "one", "e:m:v", b"1").unwrap();

        // An index taken before the clear, as an in-flight put would hold it.
        let stale = cache.index("p");
        cache.clear_profile("p").unwrap();
        assert!(stale.is_removed());

        cache.store_line(&stale, "Alice", "two", "e:m:v", b"2").unwrap();
        assert!(!dir.path().join("p").exists());
        assert_eq!(cache.get("p", "Alice", "one", "e:m:v"), None);

        // New writes go to a fresh index.
        cache.put("p", "Alice", "two", "e:m:v", b"2").unwrap();
        assert_eq!(cache.get("p", "Alice", "two", "e:m:v"), Some(b"2".to_vec()));
    }
}
