//! Cross-session player profiles: unlocked starts, legacy tags, seen
//! endings.
//!
//! A profile outlives any single playthrough and is shared by every save
//! slot belonging to one player identity. `unlock_start` and
//! `grant_legacy_tag` effects write here, never into the running
//! [`GameState`](crate::state::GameState).

use crate::world::Start;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Profile used when the player never picks one explicitly.
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid profile name '{0}': use letters, digits, '-' or '_'")]
    InvalidName(String),

    #[error("profile '{0}' not found")]
    NotFound(String),

    #[error("profile '{0}' already exists")]
    AlreadyExists(String),

    #[error("profile '{name}' is corrupted: {reason}")]
    Corrupt { name: String, reason: String },
}

/// Meta-progression carried between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,

    /// Start ids unlocked by `unlock_start` effects.
    #[serde(default)]
    pub unlocked_starts: BTreeSet<String>,

    /// Canonical tags merged into every new session's starting tags.
    #[serde(default)]
    pub legacy_tags: BTreeSet<String>,

    /// Ending names this profile has reached.
    #[serde(default)]
    pub seen_endings: BTreeSet<String>,

    /// Unix-seconds timestamp of the last save, stamped by the save manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played: Option<String>,

    /// Character name from the last save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_character: Option<String>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unlocked_starts: BTreeSet::new(),
            legacy_tags: BTreeSet::new(),
            seen_endings: BTreeSet::new(),
            last_played: None,
            last_character: None,
        }
    }

    /// Returns true if the start was newly unlocked.
    pub fn unlock_start(&mut self, start_id: impl Into<String>) -> bool {
        self.unlocked_starts.insert(start_id.into())
    }

    /// Returns true if the tag was newly granted. Callers canonicalize
    /// first; the profile stores tokens as given.
    pub fn grant_legacy_tag(&mut self, tag: impl Into<String>) -> bool {
        self.legacy_tags.insert(tag.into())
    }

    /// Returns true if the ending was newly seen.
    pub fn record_ending(&mut self, ending: impl Into<String>) -> bool {
        self.seen_endings.insert(ending.into())
    }

    /// Whether this profile may begin at the given start.
    pub fn can_begin(&self, start: &Start) -> bool {
        !start.locked || self.unlocked_starts.contains(start.id())
    }
}

/// Summary row for profile selection screens.
#[derive(Debug, Clone)]
pub struct ProfileInfo {
    pub name: String,
    pub last_played: Option<String>,
    pub last_character: Option<String>,
    pub seen_endings: usize,
}

// ============================================================================
// Store
// ============================================================================

/// Directory of `<name>.json` profile files.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ProfileError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProfileError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.json")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.exists()).unwrap_or(false)
    }

    /// Create a fresh profile; fails if one with that name already exists.
    pub fn create(&self, name: &str) -> Result<Profile, ProfileError> {
        let path = self.path_for(name)?;
        if path.exists() {
            return Err(ProfileError::AlreadyExists(name.to_string()));
        }
        let profile = Profile::new(name);
        self.save(&profile)?;
        Ok(profile)
    }

    pub fn load(&self, name: &str) -> Result<Profile, ProfileError> {
        let path = self.path_for(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProfileError::NotFound(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let mut profile: Profile =
            serde_json::from_str(&content).map_err(|err| ProfileError::Corrupt {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        // The filename is authoritative over whatever the file claims.
        profile.name = name.to_string();
        Ok(profile)
    }

    /// Load an existing profile or create it on first run.
    pub fn load_or_create(&self, name: &str) -> Result<Profile, ProfileError> {
        match self.load(name) {
            Ok(profile) => Ok(profile),
            Err(ProfileError::NotFound(_)) => self.create(name),
            Err(err) => Err(err),
        }
    }

    /// Write the profile with a temp-file swap so a crash mid-write never
    /// truncates the previous file.
    pub fn save(&self, profile: &Profile) -> Result<(), ProfileError> {
        let path = self.path_for(&profile.name)?;
        fs::create_dir_all(&self.root)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(profile)?)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(profile = %profile.name, "profile saved");
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), ProfileError> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(ProfileError::NotFound(name.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// All stored profiles, sorted by name. Corrupt files are listed by
    /// name with empty metadata rather than hidden.
    pub fn list(&self) -> Result<Vec<ProfileInfo>, ProfileError> {
        let mut infos = Vec::new();
        if !self.root.exists() {
            return Ok(infos);
        }
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match self.load(name) {
                    Ok(profile) => infos.push(ProfileInfo {
                        name: profile.name,
                        last_played: profile.last_played,
                        last_character: profile.last_character,
                        seen_endings: profile.seen_endings.len(),
                    }),
                    Err(_) => infos.push(ProfileInfo {
                        name: name.to_string(),
                        last_played: None,
                        last_character: None,
                        seen_endings: 0,
                    }),
                }
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}
