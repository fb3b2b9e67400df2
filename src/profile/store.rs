use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tempfile::NamedTempFile;

use super::{is_valid_profile_id, Profile, ProfileSettings, DEFAULT_PROFILE_ID};
use crate::error::ProfileError;
use crate::voice::Voice;

/// A loaded profile. Lock it to read or change it.
pub struct ProfileHandle {
    path: PathBuf,
    profile: Mutex<Profile>,
    /// Set under the profile lock once the profile is deleted.
    removed: AtomicBool,
}

impl ProfileHandle {
    fn new(path: PathBuf, profile: Profile) -> Self {
        Self {
            path,
            profile: Mutex::new(profile),
            removed: AtomicBool::new(false),
        }
    }

    /// Exclusive access to the profile. Voice allocation holds this for the
    /// whole check-allocate-persist sequence.
    pub fn lock(&self) -> ProfileGuard<'_> {
        ProfileGuard {
            path: &self.path,
            removed: &self.removed,
            profile: self.profile.lock(),
        }
    }

    /// Whether the profile was deleted after this handle was loaded.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

/// Locked profile. Reads go through `Deref`; every mutation bumps
/// `updated_at` and is written to disk before it becomes visible.
pub struct ProfileGuard<'a> {
    path: &'a Path,
    removed: &'a AtomicBool,
    profile: MutexGuard<'a, Profile>,
}

impl Deref for ProfileGuard<'_> {
    type Target = Profile;

    fn deref(&self) -> &Profile {
        &self.profile
    }
}

impl ProfileGuard<'_> {
    fn commit(&mut self, change: impl FnOnce(&mut Profile)) -> Result<(), ProfileError> {
        // A deleted profile must not be written back to disk.
        if self.removed.load(Ordering::SeqCst) {
            return Err(ProfileError::NotFound(self.profile.id.clone()));
        }
        let mut next = self.profile.clone();
        change(&mut next);
        next.updated_at = Utc::now();
        write_profile(self.path, &next)?;
        *self.profile = next;
        Ok(())
    }

    pub fn set_voice(&mut self, character: &str, voice: Voice) -> Result<(), ProfileError> {
        self.commit(|p| {
            p.voices.insert(character.to_string(), voice);
        })
    }

    /// Unbind a character. Returns the voice it had, if any.
    pub fn remove_voice(&mut self, character: &str) -> Result<Option<Voice>, ProfileError> {
        let Some(previous) = self.profile.voices.get(character).cloned() else {
            return Ok(None);
        };
        self.commit(|p| {
            p.voices.remove(character);
        })?;
        Ok(Some(previous))
    }

    pub fn set_details(&mut self, name: &str, description: &str) -> Result<(), ProfileError> {
        self.commit(|p| {
            p.name = name.to_string();
            p.description = description.to_string();
        })
    }

    pub fn set_settings(&mut self, settings: Option<ProfileSettings>) -> Result<(), ProfileError> {
        self.commit(|p| p.settings = settings)
    }
}

/// Durable profiles, one JSON file each, loaded lazily and kept in memory.
///
/// Loading, creating and deleting a profile all happen under the map's
/// write lock, so a profile file is read or created at most once per store.
/// Mutations of a loaded profile only take that profile's own lock.
pub struct ProfileStore {
    dir: PathBuf,
    profiles: RwLock<HashMap<String, Arc<ProfileHandle>>>,
}

impl ProfileStore {
    /// Open (creating if needed) the profile directory and make sure the
    /// default profile exists.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store = Self {
            dir,
            profiles: RwLock::new(HashMap::new()),
        };
        store.load(DEFAULT_PROFILE_ID)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn check_id(id: &str) -> Result<(), ProfileError> {
        if is_valid_profile_id(id) {
            Ok(())
        } else {
            Err(ProfileError::InvalidId(id.to_string()))
        }
    }

    /// Load a profile, creating it on first reference.
    pub fn load(&self, id: &str) -> Result<Arc<ProfileHandle>, ProfileError> {
        Self::check_id(id)?;
        if let Some(handle) = self.profiles.read().get(id) {
            return Ok(Arc::clone(handle));
        }

        let mut profiles = self.profiles.write();
        if let Some(handle) = profiles.get(id) {
            return Ok(Arc::clone(handle));
        }

        let path = self.path_for(id);
        let profile = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str::<Profile>(&content)?
        } else {
            let profile = Profile::new(id, id, "");
            write_profile(&path, &profile)?;
            log::info!("Created profile '{id}'");
            profile
        };

        let handle = Arc::new(ProfileHandle::new(path, profile));
        profiles.insert(id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Create a new profile with explicit details.
    pub fn create(&self, id: &str, name: &str, description: &str) -> Result<Profile, ProfileError> {
        Self::check_id(id)?;
        let path = self.path_for(id);
        let mut profiles = self.profiles.write();
        if profiles.contains_key(id) || path.exists() {
            return Err(ProfileError::AlreadyExists(id.to_string()));
        }

        let profile = Profile::new(id, name, description);
        write_profile(&path, &profile)?;
        log::info!("Created profile '{id}'");
        profiles.insert(
            id.to_string(),
            Arc::new(ProfileHandle::new(path, profile.clone())),
        );
        Ok(profile)
    }

    /// Whether a profile exists in memory or on disk. Does not create it.
    pub fn exists(&self, id: &str) -> bool {
        is_valid_profile_id(id)
            && (self.profiles.read().contains_key(id) || self.path_for(id).exists())
    }

    /// Copy of the current profile state.
    pub fn snapshot(&self, id: &str) -> Result<Profile, ProfileError> {
        let handle = self.load(id)?;
        let profile = handle.lock().clone();
        Ok(profile)
    }

    /// All profiles on disk or in memory, sorted by id.
    pub fn list(&self) -> Result<Vec<Profile>, ProfileError> {
        let mut ids: Vec<String> = self.profiles.read().keys().cloned().collect();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_profile_id(id) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort_unstable();
        ids.dedup();

        ids.iter().map(|id| self.snapshot(id)).collect()
    }

    pub fn set_voice(&self, id: &str, character: &str, voice: Voice) -> Result<(), ProfileError> {
        self.load(id)?.lock().set_voice(character, voice)
    }

    pub fn remove_voice(&self, id: &str, character: &str) -> Result<Option<Voice>, ProfileError> {
        self.load(id)?.lock().remove_voice(character)
    }

    pub fn update_details(&self, id: &str, name: &str, description: &str) -> Result<(), ProfileError> {
        self.load(id)?.lock().set_details(name, description)
    }

    pub fn update_settings(
        &self,
        id: &str,
        settings: Option<ProfileSettings>,
    ) -> Result<(), ProfileError> {
        self.load(id)?.lock().set_settings(settings)
    }

    /// Delete a profile from memory and disk. The default profile is protected.
    ///
    /// Handles loaded before the delete stay readable, but their mutations
    /// fail with `NotFound` instead of recreating the file.
    pub fn delete(&self, id: &str) -> Result<(), ProfileError> {
        Self::check_id(id)?;
        if id == DEFAULT_PROFILE_ID {
            return Err(ProfileError::DefaultProfileProtected);
        }

        let mut profiles = self.profiles.write();
        let handle = profiles.remove(id);
        // Held until the file is gone so no in-flight commit rewrites it.
        let _profile = handle.as_ref().map(|handle| {
            let guard = handle.profile.lock();
            handle.removed.store(true, Ordering::SeqCst);
            guard
        });

        let path = self.path_for(id);
        let on_disk = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if handle.is_none() && !on_disk {
            return Err(ProfileError::NotFound(id.to_string()));
        }
        log::info!("Deleted profile '{id}'");
        Ok(())
    }
}

/// Write via a uniquely named sibling temp file and rename, so readers
/// never see a half-written profile.
fn write_profile(path: &Path, profile: &Profile) -> Result<(), ProfileError> {
    let json = serde_json::to_string_pretty(profile)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
