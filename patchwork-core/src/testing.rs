//! Testing utilities for the narrative engine.
//!
//! This module provides tools for integration testing:
//! - `WorldBuilder` for assembling small worlds from JSON fragments
//! - `sample_world` with a tiny but fully validated island map
//! - Assertion helpers for verifying walker phases

use crate::session::{Phase, StorySession};
use crate::world::{ContentError, WorldModel};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Builds world documents for tests without hand-writing whole JSON files.
///
/// Every piece is a raw JSON fragment in the content format, so builder
/// output goes through the same parsing and validation as shipped content.
pub struct WorldBuilder {
    title: String,
    factions: Vec<String>,
    advanced_tags: Vec<String>,
    tag_aliases: Map<String, Value>,
    starts: Vec<Value>,
    nodes: Map<String, Value>,
}

impl WorldBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            factions: Vec::new(),
            advanced_tags: Vec::new(),
            tag_aliases: Map::new(),
            starts: Vec::new(),
            nodes: Map::new(),
        }
    }

    /// Declare a faction for reputation tracking.
    pub fn faction(mut self, name: impl Into<String>) -> Self {
        self.factions.push(name.into());
        self
    }

    /// Declare an advanced tag in the world catalog.
    pub fn advanced_tag(mut self, name: impl Into<String>) -> Self {
        self.advanced_tags.push(name.into());
        self
    }

    /// Map an alias onto its canonical tag.
    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.tag_aliases.insert(from.into(), Value::String(to.into()));
        self
    }

    /// Add an unlocked start with matching id and entry node.
    pub fn start(self, id: &str, node: &str) -> Self {
        self.start_raw(json!({ "id": id, "node": node }))
    }

    /// Add a start from a raw JSON fragment.
    pub fn start_raw(mut self, start: Value) -> Self {
        self.starts.push(start);
        self
    }

    /// Add a node from a raw JSON fragment.
    pub fn node(mut self, id: &str, body: Value) -> Self {
        self.nodes.insert(id.to_string(), body);
        self
    }

    /// Assemble the document and run it through the normal loader.
    pub fn build(self) -> Result<Arc<WorldModel>, ContentError> {
        let document = json!({
            "title": self.title,
            "factions": self.factions,
            "advanced_tags": self.advanced_tags,
            "tag_aliases": self.tag_aliases,
            "starts": self.starts,
            "nodes": self.nodes,
        });
        WorldModel::load_str(&serde_json::to_string(&document)?)
    }
}

// ============================================================================
// Sample content
// ============================================================================

/// A small validated world used across the test suite.
///
/// The map declares the Tide Wardens and Root Assembly factions, the
/// Ghostwise and Stormcaller advanced tags, a Diplomat -> Envoy alias, a
/// locked second start, and three nodes with a gated path and two endings.
pub fn sample_world() -> Arc<WorldModel> {
    WorldModel::load_str(SAMPLE_WORLD).expect("sample world is valid")
}

const SAMPLE_WORLD: &str = r#"{
  "title": "Patchwork Isles",
  "factions": ["Tide Wardens", "Root Assembly"],
  "advanced_tags": ["Ghostwise", "Stormcaller"],
  "tag_aliases": { "Diplomat": "Envoy" },
  "starts": [
    {
      "id": "dock",
      "node": "dock",
      "title": "Dockhand",
      "blurb": "You grew up hauling rope on the tide-washed piers.",
      "tags": ["Scout"]
    },
    {
      "id": "smuggler",
      "node": "dock",
      "title": "Night Courier",
      "blurb": "You know which crates never pass customs.",
      "tags": ["Night Key"],
      "locked": true
    }
  ],
  "nodes": {
    "dock": {
      "title": "The Salt-Stained Dock",
      "text": "Gulls wheel over the morning market bells.",
      "choices": [
        { "label": "Head to the market", "node": "market" },
        {
          "label": "Slip into the warehouse",
          "node": "warehouse",
          "condition": { "type": "has_tag", "value": "Night Key" }
        },
        { "label": "Watch the tide roll in", "node": "dock" }
      ]
    },
    "market": {
      "title": "Spice Row",
      "text": "Stalls crowd the boardwalk, heavy with pepper and brine.",
      "on_enter": [{ "type": "add_item", "value": "market token" }],
      "choices": [
        {
          "label": "Slip away on the night ferry",
          "node": "dock",
          "effects": [{ "type": "end_game", "value": "Hidden Docks Escape" }]
        },
        { "label": "Head back to the dock", "node": "dock" }
      ]
    },
    "warehouse": {
      "title": "The Bonded Warehouse",
      "text": "Crates from every isle, and one that hums.",
      "ending": "Warehouse Vigil"
    }
  }
}"#;

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the session is paused at a node waiting for a selection.
#[track_caller]
pub fn assert_awaiting(session: &StorySession, node_id: &str) {
    assert!(
        matches!(session.phase(), Phase::AwaitingSelection),
        "Expected session to await a selection, phase is {:?}",
        session.phase()
    );
    assert_eq!(
        session.state().current_node,
        node_id,
        "Expected session to rest at '{node_id}'"
    );
}

/// Assert the session ended with the given ending name.
#[track_caller]
pub fn assert_ended(session: &StorySession, ending: &str) {
    match session.phase() {
        Phase::Ended(actual) => assert_eq!(
            actual, ending,
            "Expected ending '{ending}', got '{actual}'"
        ),
        other => panic!("Expected session to have ended, phase is {other:?}"),
    }
}
