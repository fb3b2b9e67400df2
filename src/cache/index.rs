use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::CacheError;

/// File name of the per-profile index.
pub const INDEX_FILE_NAME: &str = "characters.json";

/// Longest sanitized text prefix used in audio file names.
const MAX_NAME_PREFIX: usize = 40;

/// Cached lines of one character, all generated with `voice_fingerprint`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterCache {
    #[serde(rename = "voice")]
    pub voice_fingerprint: String,
    /// `text_hash8 -> file name`
    #[serde(default)]
    pub lines: BTreeMap<String, String>,
}

impl CharacterCache {
    pub fn new(voice_fingerprint: &str) -> Self {
        Self {
            voice_fingerprint: voice_fingerprint.to_string(),
            lines: BTreeMap::new(),
        }
    }
}

/// Index of one profile's cache directory.
pub struct ProfileCacheIndex {
    dir: PathBuf,
    characters: RwLock<BTreeMap<String, CharacterCache>>,
    /// Set under the `characters` write lock when the profile's cache is cleared.
    removed: AtomicBool,
}

impl ProfileCacheIndex {
    /// Read the index under `dir`. A missing index is empty; an unreadable
    /// one is logged and treated as empty, to be overwritten by the next write.
    pub fn load(dir: PathBuf) -> Self {
        let path = dir.join(INDEX_FILE_NAME);
        let characters = match read_index(&path) {
            Ok(characters) => characters,
            Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!("Ignoring unreadable cache index {}: {e}", path.display());
                BTreeMap::new()
            }
        };
        Self {
            dir,
            characters: RwLock::new(characters),
            removed: AtomicBool::new(false),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn characters(&self) -> &RwLock<BTreeMap<String, CharacterCache>> {
        &self.characters
    }

    /// Whether the profile's cache was cleared after this index was loaded.
    /// Writes through a removed index are skipped.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }

    /// Directory holding a character's audio files.
    pub fn character_dir(&self, character: &str) -> PathBuf {
        self.dir.join(character_dir_name(character))
    }

    /// Write the whole index as indented JSON via a unique temp file and rename.
    pub(crate) fn persist(&self, characters: &BTreeMap<String, CharacterCache>) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(characters)?;
        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(self.dir.join(INDEX_FILE_NAME))
            .map_err(|e| e.error)?;
        Ok(())
    }
}

fn read_index(path: &Path) -> Result<BTreeMap<String, CharacterCache>, CacheError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// First 8 hex characters of the SHA-256 of `text`.
pub fn text_hash8(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(8);
    hex
}

/// `<sanitized-text-prefix>_<hash8>.<extension>`
pub fn audio_file_name(text: &str, hash8: &str, extension: &str) -> String {
    let prefix = sanitize(&text.to_lowercase());
    let prefix = if prefix.is_empty() { "line" } else { &prefix };
    format!("{prefix}_{hash8}.{extension}")
}

/// Names made only of safe characters are used as is; anything else is
/// sanitized and suffixed with a hash so distinct names stay distinct.
fn character_dir_name(character: &str) -> String {
    let clean = sanitize(character);
    if clean == character {
        clean
    } else if clean.is_empty() {
        format!("character_{}", text_hash8(character))
    } else {
        format!("{clean}_{}", text_hash8(character))
    }
}

/// Keep ASCII letters, digits and `-`; runs of anything else become one `_`.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_NAME_PREFIX));
    for c in s.chars() {
        if out.len() >= MAX_NAME_PREFIX {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
