//! Save slots with atomic writes, checksums, and backup recovery.
//!
//! Each slot is a directory under the saves root holding the canonical
//! `save_v1.json` and, once the slot has been written twice, a
//! `save_v1.bak` of the previous good save. Writes go to a temp file, are
//! read back and validated, and only then promoted; loads that fail
//! validation fall back to the backup and report the recovery.
//!
//! The player [`Profile`] is persisted alongside every save so
//! meta-progression survives even if the player never saves again.

use crate::profile::{Profile, ProfileError, ProfileStore};
use crate::state::GameState;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Canonical save file inside a slot directory.
pub const SAVE_FILENAME: &str = "save_v1.json";

/// Previous good save inside a slot directory.
pub const BACKUP_FILENAME: &str = "save_v1.bak";

/// Rolling slot written after every transition.
pub const AUTOSAVE_SLOT: &str = "autosave";

/// Rolling slot for the explicit quick save.
pub const QUICK_SLOT: &str = "quick";

/// Format marker distinguishing save files from other JSON.
const SAVE_SCHEMA: &str = "patchwork-save";

/// Current save format version.
const SAVE_VERSION: u32 = 1;

/// History entries kept in a save file. Older entries are dropped at save
/// time; this is the only data the save pipeline loses on purpose.
const HISTORY_WINDOW: usize = 200;

/// Errors from save and load operations.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("no save manager attached to this session")]
    NotAttached,

    #[error("invalid slot name '{0}': use letters, digits, '-' or '_'")]
    InvalidSlot(String),

    #[error("no save found for slot '{0}'")]
    NotFound(String),

    #[error("slot '{slot}' is corrupted: {reason}")]
    Corrupt { slot: String, reason: String },

    #[error("save version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl SaveError {
    /// Failures the backup fallback may paper over. IO trouble is not
    /// among them; a failing disk should surface, not retry.
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SaveError::Corrupt { .. } | SaveError::VersionMismatch { .. }
        )
    }
}

// ============================================================================
// Payload
// ============================================================================

/// On-disk save document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavePayload {
    /// Format marker; always [`SAVE_SCHEMA`].
    pub schema: String,

    /// Save format version for compatibility checking.
    pub version: u32,

    /// Peekable summary; readable without deserializing the state block.
    pub metadata: SaveMetadata,

    /// The serialized session state, history already trimmed.
    pub state: GameState,

    /// CRC32 of the serialized state block.
    pub checksum: u32,
}

/// Summary shown in slot listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub slot: String,

    /// Unix-seconds timestamp string.
    pub saved_at: String,

    /// Profile the save belongs to.
    pub profile: String,

    pub player_name: String,

    pub world_title: String,

    pub current_node: String,
}

/// Result of loading a slot.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub state: GameState,
    pub profile: Profile,

    /// True when the canonical file failed validation and the backup was
    /// promoted in its place.
    pub recovered_from_backup: bool,
}

/// Row in a slot listing. Metadata fields are `None` when the slot exists
/// but its save no longer validates.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub slot: String,
    pub saved_at: Option<String>,
    pub player_name: Option<String>,
    pub current_node: Option<String>,
}

// ============================================================================
// Manager
// ============================================================================

/// Orchestrates slot saves, loads, listings, and profile persistence.
///
/// Cheap to clone; holds only paths and the world title for metadata.
#[derive(Debug, Clone)]
pub struct SaveManager {
    root: PathBuf,
    profiles: ProfileStore,
    world_title: String,
}

impl SaveManager {
    pub fn new(
        root: impl Into<PathBuf>,
        profiles: ProfileStore,
        world_title: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            profiles,
            world_title: world_title.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_store(&self) -> &ProfileStore {
        &self.profiles
    }

    // ------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------

    /// Rolling save written after every transition.
    pub fn autosave(&self, state: &GameState, profile: &mut Profile) -> Result<(), SaveError> {
        self.write_slot(AUTOSAVE_SLOT, state, profile)
    }

    /// Explicit single-slot quick save.
    pub fn quick_save(&self, state: &GameState, profile: &mut Profile) -> Result<(), SaveError> {
        self.write_slot(QUICK_SLOT, state, profile)
    }

    /// Save to a user-named slot. Returns the normalized slot name.
    pub fn save_named(
        &self,
        slot: &str,
        state: &GameState,
        profile: &mut Profile,
    ) -> Result<String, SaveError> {
        let slot = normalize_slot(slot)?;
        self.write_slot(&slot, state, profile)?;
        Ok(slot)
    }

    fn write_slot(
        &self,
        slot: &str,
        state: &GameState,
        profile: &mut Profile,
    ) -> Result<(), SaveError> {
        let saved_at = timestamp_now();
        let mut state = state.clone();
        state.trim_history(HISTORY_WINDOW);

        let payload = SavePayload {
            schema: SAVE_SCHEMA.to_string(),
            version: SAVE_VERSION,
            metadata: SaveMetadata {
                slot: slot.to_string(),
                saved_at: saved_at.clone(),
                profile: profile.name.clone(),
                player_name: state.player_name.clone(),
                world_title: self.world_title.clone(),
                current_node: state.current_node.clone(),
            },
            checksum: state_checksum(&state)?,
            state,
        };

        let slot_dir = self.root.join(slot);
        fs::create_dir_all(&slot_dir)?;
        let canonical = slot_dir.join(SAVE_FILENAME);
        let backup = slot_dir.join(BACKUP_FILENAME);
        let tmp = slot_dir.join(format!("{SAVE_FILENAME}.tmp"));

        fs::write(&tmp, serde_json::to_string_pretty(&payload)?)?;

        // Read back and validate before promoting. A write that does not
        // parse must never replace a good save.
        let reread = fs::read_to_string(&tmp)?;
        validate_payload(slot, &reread)?;

        if canonical.exists() {
            fs::copy(&canonical, &backup)?;
        }
        fs::rename(&tmp, &canonical)?;

        // Stamp the profile only once the save is promoted; a failed save
        // must leave the profile exactly as it was.
        profile.last_played = Some(saved_at);
        profile.last_character = Some(payload.metadata.player_name.clone());
        self.profiles.save(profile)?;

        tracing::info!(%slot, node = %payload.metadata.current_node, "saved");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load a slot, falling back to its backup when the canonical file
    /// fails validation. Recovery rewrites the canonical file and is
    /// reported in the outcome, never silent.
    pub fn load(&self, slot: &str) -> Result<LoadOutcome, SaveError> {
        let slot = resolve_slot(slot)?;
        let slot_dir = self.root.join(&slot);
        let canonical = slot_dir.join(SAVE_FILENAME);
        let backup = slot_dir.join(BACKUP_FILENAME);

        if !canonical.exists() && !backup.exists() {
            return Err(SaveError::NotFound(slot));
        }

        let mut recovered = false;
        let payload = match read_payload(&slot, &canonical) {
            Ok(payload) => payload,
            Err(err) if err.is_recoverable() && backup.exists() => {
                tracing::warn!(%slot, error = %err, "save failed validation, trying backup");
                match read_payload(&slot, &backup) {
                    Ok(payload) => {
                        // Promote the backup so the next load is clean.
                        fs::write(&canonical, serde_json::to_string_pretty(&payload)?)?;
                        recovered = true;
                        tracing::warn!(%slot, "recovered save from backup");
                        payload
                    }
                    Err(backup_err) => {
                        tracing::warn!(%slot, error = %backup_err, "backup also failed");
                        return Err(err);
                    }
                }
            }
            Err(err) => return Err(err),
        };

        let profile = self.profiles.load_or_create(&payload.metadata.profile)?;
        tracing::info!(%slot, node = %payload.state.current_node, recovered, "loaded");
        Ok(LoadOutcome {
            state: payload.state,
            profile,
            recovered_from_backup: recovered,
        })
    }

    pub fn has_slot(&self, slot: &str) -> bool {
        resolve_slot(slot)
            .map(|slot| self.root.join(slot).join(SAVE_FILENAME).exists())
            .unwrap_or(false)
    }

    /// Player-facing slots sorted by name. The rolling autosave is skipped;
    /// load it explicitly via [`AUTOSAVE_SLOT`].
    pub fn list_slots(&self) -> Result<Vec<SlotInfo>, SaveError> {
        let mut slots = Vec::new();
        if !self.root.exists() {
            return Ok(slots);
        }
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(slot) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if slot == AUTOSAVE_SLOT {
                continue;
            }
            let canonical = path.join(SAVE_FILENAME);
            if !canonical.exists() {
                continue;
            }
            match peek_metadata(&canonical) {
                Ok(metadata) => slots.push(SlotInfo {
                    slot: slot.to_string(),
                    saved_at: Some(metadata.saved_at),
                    player_name: Some(metadata.player_name),
                    current_node: Some(metadata.current_node),
                }),
                Err(_) => slots.push(SlotInfo {
                    slot: slot.to_string(),
                    saved_at: None,
                    player_name: None,
                    current_node: None,
                }),
            }
        }
        slots.sort_by(|a, b| a.slot.cmp(&b.slot));
        Ok(slots)
    }

    pub fn delete_slot(&self, slot: &str) -> Result<(), SaveError> {
        let slot = resolve_slot(slot)?;
        let slot_dir = self.root.join(&slot);
        if !slot_dir.exists() {
            return Err(SaveError::NotFound(slot));
        }
        fs::remove_dir_all(slot_dir)?;
        Ok(())
    }
}

// ============================================================================
// Slot names
// ============================================================================

/// Normalize a user-supplied slot name: trim, lowercase, strip anything
/// outside `[a-z0-9_-]`. The rolling slots are reserved.
pub fn normalize_slot(raw: &str) -> Result<String, SaveError> {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        return Err(SaveError::InvalidSlot(raw.to_string()));
    }
    if cleaned == AUTOSAVE_SLOT || cleaned == QUICK_SLOT {
        return Err(SaveError::InvalidSlot(cleaned));
    }
    Ok(cleaned)
}

/// Like [`normalize_slot`] but passes the reserved slots through, for load
/// and delete paths that address them directly.
fn resolve_slot(raw: &str) -> Result<String, SaveError> {
    let lowered = raw.trim().to_lowercase();
    if lowered == AUTOSAVE_SLOT || lowered == QUICK_SLOT {
        return Ok(lowered);
    }
    normalize_slot(&lowered)
}

// ============================================================================
// Payload validation
// ============================================================================

fn state_checksum(state: &GameState) -> Result<u32, SaveError> {
    let bytes = serde_json::to_vec(state)?;
    Ok(crc32fast::hash(&bytes))
}

fn corrupt(slot: &str, reason: impl Into<String>) -> SaveError {
    SaveError::Corrupt {
        slot: slot.to_string(),
        reason: reason.into(),
    }
}

/// Check the format marker and version without touching the state block.
fn check_envelope(slot: &str, content: &str) -> Result<(), SaveError> {
    #[derive(Deserialize)]
    struct Envelope {
        schema: String,
        version: u32,
    }

    let envelope: Envelope =
        serde_json::from_str(content).map_err(|err| corrupt(slot, err.to_string()))?;
    if envelope.schema != SAVE_SCHEMA {
        return Err(corrupt(
            slot,
            format!("unexpected schema marker '{}'", envelope.schema),
        ));
    }
    if envelope.version != SAVE_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: envelope.version,
        });
    }
    Ok(())
}

/// Full structural validation: envelope, state block shape, checksum.
fn validate_payload(slot: &str, content: &str) -> Result<SavePayload, SaveError> {
    check_envelope(slot, content)?;
    let payload: SavePayload =
        serde_json::from_str(content).map_err(|err| corrupt(slot, err.to_string()))?;
    let computed = state_checksum(&payload.state)?;
    if computed != payload.checksum {
        return Err(corrupt(
            slot,
            format!(
                "checksum mismatch: stored {:08x}, computed {:08x}",
                payload.checksum, computed
            ),
        ));
    }
    Ok(payload)
}

fn read_payload(slot: &str, path: &Path) -> Result<SavePayload, SaveError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(corrupt(slot, "save file missing"));
        }
        Err(err) => return Err(err.into()),
    };
    validate_payload(slot, &content)
}

/// Read a save's metadata without deserializing the state block.
pub fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, SaveError> {
    let content = fs::read_to_string(&path)?;
    let slot = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or("?")
        .to_string();
    check_envelope(&slot, &content)?;

    #[derive(Deserialize)]
    struct Partial {
        metadata: SaveMetadata,
    }

    let partial: Partial =
        serde_json::from_str(&content).map_err(|err| corrupt(&slot, err.to_string()))?;
    Ok(partial.metadata)
}

/// Current unix timestamp in seconds, as a string.
fn timestamp_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    format!("{}", now.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> SaveManager {
        let profiles = ProfileStore::new(dir.path().join("profiles"));
        SaveManager::new(dir.path().join("saves"), profiles, "Test Isles")
    }

    fn sample_state() -> GameState {
        let mut state = GameState::new("Traveler", "dock", "market");
        state.add_tag("Scout");
        state.add_item("rope");
        state.adjust_reputation("Tide Wardens", 1);
        state.record_visit("dock", "Head to market");
        state
    }

    #[test]
    fn test_normalize_slot_rules() {
        assert_eq!(normalize_slot("My Save!").expect("valid"), "mysave");
        assert_eq!(normalize_slot("  Chapter-2_b  ").expect("valid"), "chapter-2_b");
        assert!(matches!(normalize_slot("!!!"), Err(SaveError::InvalidSlot(_))));
        assert!(matches!(normalize_slot(""), Err(SaveError::InvalidSlot(_))));
        // Names that normalize into a reserved slot are rejected too.
        assert!(matches!(normalize_slot("Auto Save"), Err(SaveError::InvalidSlot(_))));
        assert!(matches!(normalize_slot("quick"), Err(SaveError::InvalidSlot(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let state = sample_state();
        let mut profile = Profile::new("default");

        let slot = saves
            .save_named("Harbor Run", &state, &mut profile)
            .expect("save should succeed");
        assert_eq!(slot, "harborrun");

        let outcome = saves.load(&slot).expect("load should succeed");
        assert_eq!(outcome.state, state);
        assert!(!outcome.recovered_from_backup);
        assert_eq!(outcome.profile.name, "default");
        // The save stamped the profile.
        assert_eq!(outcome.profile.last_character.as_deref(), Some("Traveler"));
    }

    #[test]
    fn test_history_is_trimmed_at_save_time() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let mut state = sample_state();
        for i in 0..250 {
            state.record_visit(format!("node-{i}"), "onward");
        }
        let mut profile = Profile::new("default");
        saves.quick_save(&state, &mut profile).expect("save");

        let outcome = saves.load(QUICK_SLOT).expect("load");
        assert_eq!(outcome.state.history.len(), 200);
        assert_eq!(
            outcome.state.history.last().map(|h| h.node.as_str()),
            Some("node-249")
        );
    }

    #[test]
    fn test_second_save_creates_backup() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let mut profile = Profile::new("default");
        let mut state = sample_state();

        saves.quick_save(&state, &mut profile).expect("first save");
        let backup = dir
            .path()
            .join("saves")
            .join(QUICK_SLOT)
            .join(BACKUP_FILENAME);
        assert!(!backup.exists());

        state.add_tag("Envoy");
        saves.quick_save(&state, &mut profile).expect("second save");
        assert!(backup.exists());
    }

    #[test]
    fn test_corrupted_save_recovers_from_backup() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let mut profile = Profile::new("default");
        let mut state = sample_state();

        saves.quick_save(&state, &mut profile).expect("first save");
        state.add_tag("Envoy");
        saves.quick_save(&state, &mut profile).expect("second save");

        // Mangle the canonical file; the backup still holds the first save.
        let canonical = dir
            .path()
            .join("saves")
            .join(QUICK_SLOT)
            .join(SAVE_FILENAME);
        std::fs::write(&canonical, "{ definitely not json").expect("mangle");

        let outcome = saves.load(QUICK_SLOT).expect("load should recover");
        assert!(outcome.recovered_from_backup);
        assert!(!outcome.state.tags.contains("Envoy"));

        // Recovery rewrote the canonical file; the next load is clean.
        let again = saves.load(QUICK_SLOT).expect("second load");
        assert!(!again.recovered_from_backup);
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let mut profile = Profile::new("default");
        saves
            .quick_save(&sample_state(), &mut profile)
            .expect("save");

        // Tamper with the state block without updating the checksum.
        let canonical = dir
            .path()
            .join("saves")
            .join(QUICK_SLOT)
            .join(SAVE_FILENAME);
        let content = std::fs::read_to_string(&canonical).expect("read");
        let tampered = content.replace("\"market\"", "\"warehouse\"");
        assert_ne!(content, tampered, "tampering should change the payload");
        std::fs::write(&canonical, tampered).expect("write");

        // No backup exists yet, so corruption surfaces to the caller.
        let err = saves.load(QUICK_SLOT).unwrap_err();
        assert!(matches!(err, SaveError::Corrupt { .. }), "got {err:?}");
    }

    #[test]
    fn test_version_mismatch_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let mut profile = Profile::new("default");
        saves
            .quick_save(&sample_state(), &mut profile)
            .expect("save");

        let canonical = dir
            .path()
            .join("saves")
            .join(QUICK_SLOT)
            .join(SAVE_FILENAME);
        let content = std::fs::read_to_string(&canonical).expect("read");
        let bumped = content.replace("\"version\": 1", "\"version\": 9");
        std::fs::write(&canonical, bumped).expect("write");

        let err = saves.load(QUICK_SLOT).unwrap_err();
        assert!(matches!(
            err,
            SaveError::VersionMismatch { expected: 1, found: 9 }
        ));
    }

    #[test]
    fn test_failed_save_leaves_profile_unstamped() {
        let dir = TempDir::new().expect("temp dir");
        // A file where the saves root should be makes every slot write fail.
        let bad_root = dir.path().join("saves");
        std::fs::write(&bad_root, "occupied").expect("block the root");
        let profiles = ProfileStore::new(dir.path().join("profiles"));
        let saves = SaveManager::new(&bad_root, profiles, "Test Isles");

        let mut profile = Profile::new("default");
        let err = saves.quick_save(&sample_state(), &mut profile).unwrap_err();
        assert!(matches!(err, SaveError::Io(_)), "got {err:?}");

        // The save never happened, so the profile carries no trace of it.
        assert!(profile.last_played.is_none());
        assert!(profile.last_character.is_none());
        assert!(!saves.profile_store().exists("default"));
    }

    #[test]
    fn test_load_missing_slot_is_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        assert!(matches!(
            saves.load("nowhere"),
            Err(SaveError::NotFound(slot)) if slot == "nowhere"
        ));
    }

    #[test]
    fn test_named_save_rejects_reserved_slots() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let mut profile = Profile::new("default");
        let err = saves
            .save_named("autosave", &sample_state(), &mut profile)
            .unwrap_err();
        assert!(matches!(err, SaveError::InvalidSlot(_)));
    }

    #[test]
    fn test_list_slots_skips_autosave() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let mut profile = Profile::new("default");
        let state = sample_state();

        saves.autosave(&state, &mut profile).expect("autosave");
        saves.quick_save(&state, &mut profile).expect("quick");
        saves
            .save_named("harbor", &state, &mut profile)
            .expect("named");

        let slots = saves.list_slots().expect("list");
        let names: Vec<_> = slots.iter().map(|s| s.slot.as_str()).collect();
        assert_eq!(names, vec!["harbor", "quick"]);
        assert_eq!(slots[0].current_node.as_deref(), Some("market"));
        assert_eq!(slots[0].player_name.as_deref(), Some("Traveler"));
    }

    #[test]
    fn test_delete_slot() {
        let dir = TempDir::new().expect("temp dir");
        let saves = manager(&dir);
        let mut profile = Profile::new("default");
        saves
            .save_named("doomed", &sample_state(), &mut profile)
            .expect("save");
        assert!(saves.has_slot("doomed"));

        saves.delete_slot("doomed").expect("delete");
        assert!(!saves.has_slot("doomed"));
        assert!(matches!(
            saves.delete_slot("doomed"),
            Err(SaveError::NotFound(_))
        ));
    }
}
