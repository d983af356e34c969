//! Mutable session state: tags, traits, items, flags, reputation, history.
//!
//! `GameState` is owned exclusively by the active [`StorySession`] while a
//! story is running; the walker is its sole mutator. All containers are
//! ordered so serialized state is byte-stable, which the save checksum in
//! [`persist`](crate::persist) relies on.
//!
//! [`StorySession`]: crate::session::StorySession

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Lower bound for faction reputation.
pub const REP_MIN: i32 = -2;

/// Upper bound for faction reputation.
pub const REP_MAX: i32 = 2;

// ============================================================================
// Flags
// ============================================================================

/// A story flag value. Content may use booleans, integers, or short strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FlagValue {
    /// Whether this is the zero value of its type. Unset flags compare equal
    /// to the zero value of the expected type, so `flag_eq` against `false`
    /// or `0` holds before the flag is ever written. Strings have no zero
    /// value; comparing one against an unset flag is always false.
    pub fn is_zero(&self) -> bool {
        match self {
            FlagValue::Bool(b) => !b,
            FlagValue::Int(n) => *n == 0,
            FlagValue::Text(_) => false,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Int(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Text(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::Text(value)
    }
}

// ============================================================================
// History
// ============================================================================

/// One visited (node, choice label) pair, in visit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub node: String,
    pub choice: String,
}

// ============================================================================
// Game state
// ============================================================================

/// The complete mutable state of one playthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Fresh per session; ties log lines and saves to one run.
    pub session_id: Uuid,

    /// Character name chosen at session start.
    pub player_name: String,

    /// Which start seeded this session.
    pub start_id: String,

    /// Node the walker is currently at.
    pub current_node: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub traits: BTreeSet<String>,

    /// Item name to held count. Entries are removed when the count hits zero.
    #[serde(default)]
    pub items: BTreeMap<String, u32>,

    #[serde(default)]
    pub flags: BTreeMap<String, FlagValue>,

    /// Faction name to standing, always within [`REP_MIN`]..=[`REP_MAX`].
    #[serde(default)]
    pub reputation: BTreeMap<String, i32>,

    /// Visited (node, choice) pairs, oldest first. Trimmed to a bounded
    /// window at save time.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl GameState {
    /// Fresh state positioned at `start_node` with empty containers.
    pub fn new(
        player_name: impl Into<String>,
        start_id: impl Into<String>,
        start_node: impl Into<String>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            player_name: player_name.into(),
            start_id: start_id.into(),
            current_node: start_node.into(),
            tags: BTreeSet::new(),
            traits: BTreeSet::new(),
            items: BTreeMap::new(),
            flags: BTreeMap::new(),
            reputation: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Tags and traits
    // ------------------------------------------------------------------

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Returns true if the tag was newly added.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    pub fn has_trait(&self, name: &str) -> bool {
        self.traits.contains(name)
    }

    pub fn add_trait(&mut self, name: impl Into<String>) -> bool {
        self.traits.insert(name.into())
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub fn item_count(&self, item: &str) -> u32 {
        self.items.get(item).copied().unwrap_or(0)
    }

    pub fn has_item(&self, item: &str) -> bool {
        self.item_count(item) >= 1
    }

    pub fn add_item(&mut self, item: impl Into<String>) {
        *self.items.entry(item.into()).or_insert(0) += 1;
    }

    /// Decrements the count, dropping the entry at zero. Removing an item
    /// that is not held is a no-op.
    pub fn remove_item(&mut self, item: &str) {
        if let Some(count) = self.items.get_mut(item) {
            *count -= 1;
            if *count == 0 {
                self.items.remove(item);
            }
        }
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    pub fn set_flag(&mut self, name: impl Into<String>, value: FlagValue) {
        self.flags.insert(name.into(), value);
    }

    /// Equality check used by `flag_eq` conditions. An unset flag matches
    /// the zero value of the expected type.
    pub fn flag_matches(&self, name: &str, expected: &FlagValue) -> bool {
        match self.flags.get(name) {
            Some(actual) => actual == expected,
            None => expected.is_zero(),
        }
    }

    // ------------------------------------------------------------------
    // Reputation
    // ------------------------------------------------------------------

    /// Current standing with a faction; unset reads 0.
    pub fn reputation(&self, faction: &str) -> i32 {
        self.reputation.get(faction).copied().unwrap_or(0)
    }

    /// Adds `delta` to the faction's standing, saturating at the
    /// [`REP_MIN`]..=[`REP_MAX`] bounds. Returns the new standing.
    pub fn adjust_reputation(&mut self, faction: impl Into<String>, delta: i32) -> i32 {
        let entry = self.reputation.entry(faction.into()).or_insert(0);
        *entry = (*entry + delta).clamp(REP_MIN, REP_MAX);
        *entry
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn record_visit(&mut self, node: impl Into<String>, choice: impl Into<String>) {
        self.history.push(HistoryEntry {
            node: node.into(),
            choice: choice.into(),
        });
    }

    /// Keeps only the most recent `window` entries.
    pub fn trim_history(&mut self, window: usize) {
        if self.history.len() > window {
            let drop = self.history.len() - window;
            self.history.drain(..drop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reputation_saturates_at_bounds() {
        let mut state = GameState::new("Traveler", "dock", "dock");
        state.adjust_reputation("Root Assembly", 2);
        assert_eq!(state.reputation("Root Assembly"), 2);

        // Already at the cap; a large delta must not push past it.
        assert_eq!(state.adjust_reputation("Root Assembly", 5), 2);
        assert_eq!(state.adjust_reputation("Root Assembly", -9), -2);
        assert_eq!(state.reputation("Root Assembly"), -2);
    }

    #[test]
    fn test_reputation_unset_reads_zero() {
        let state = GameState::new("Traveler", "dock", "dock");
        assert_eq!(state.reputation("Tide Wardens"), 0);
    }

    #[test]
    fn test_items_are_counted() {
        let mut state = GameState::new("Traveler", "dock", "dock");
        state.add_item("rope");
        state.add_item("rope");
        assert_eq!(state.item_count("rope"), 2);
        assert!(state.has_item("rope"));

        state.remove_item("rope");
        assert_eq!(state.item_count("rope"), 1);
        state.remove_item("rope");
        assert!(!state.has_item("rope"));
        assert!(!state.items.contains_key("rope"));

        // Removing an item that is not held changes nothing.
        state.remove_item("lantern");
        assert_eq!(state.item_count("lantern"), 0);
    }

    #[test]
    fn test_unset_flag_matches_zero_values() {
        let state = GameState::new("Traveler", "dock", "dock");
        assert!(state.flag_matches("door_open", &FlagValue::Bool(false)));
        assert!(state.flag_matches("visits", &FlagValue::Int(0)));
        assert!(!state.flag_matches("door_open", &FlagValue::Bool(true)));
        assert!(!state.flag_matches("password", &FlagValue::Text("tide".into())));
    }

    #[test]
    fn test_set_flag_overwrites() {
        let mut state = GameState::new("Traveler", "dock", "dock");
        state.set_flag("visits", FlagValue::Int(1));
        state.set_flag("visits", FlagValue::Int(2));
        assert!(state.flag_matches("visits", &FlagValue::Int(2)));
        assert!(!state.flag_matches("visits", &FlagValue::Int(1)));
    }

    #[test]
    fn test_history_trim_keeps_recent_entries() {
        let mut state = GameState::new("Traveler", "dock", "dock");
        for i in 0..10 {
            state.record_visit(format!("node-{i}"), "onward");
        }
        state.trim_history(3);
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history[0].node, "node-7");
        assert_eq!(state.history[2].node, "node-9");

        // Trimming below the window is a no-op.
        state.trim_history(5);
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn test_tags_deduplicate() {
        let mut state = GameState::new("Traveler", "dock", "dock");
        assert!(state.add_tag("Scout"));
        assert!(!state.add_tag("Scout"));
        assert!(state.has_tag("Scout"));
        assert!(state.remove_tag("Scout"));
        assert!(!state.has_tag("Scout"));
    }
}
