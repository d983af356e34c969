//! World content model: nodes, choices, starts, factions, and the
//! all-or-nothing load-time validation that makes runtime evaluation
//! infallible.
//!
//! A [`WorldModel`] is loaded once from a JSON world document and never
//! mutated afterward. Everything downstream (the walker, the authoring
//! tools) shares the same typed model, so engine and tools accept and
//! reject content identically by construction.

use crate::rules::{Condition, Effect};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while loading or validating a world document.
///
/// Any of these fails the whole load; a `WorldModel` that exists has passed
/// every check.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("world title must not be empty")]
    MissingTitle,

    #[error("world defines no nodes")]
    NoNodes,

    #[error("node '{node}': choice '{label}' targets unknown node '{target}'")]
    UnknownChoiceTarget {
        node: String,
        label: String,
        target: String,
    },

    #[error("node '{node}': teleport targets unknown node '{target}'")]
    UnknownTeleportTarget { node: String, target: String },

    #[error("start '{start}' begins at unknown node '{node}'")]
    UnknownStartNode { start: String, node: String },

    #[error("duplicate start id '{0}'")]
    DuplicateStart(String),

    #[error("node '{node}': unknown faction '{faction}'")]
    UnknownFaction { node: String, faction: String },

    #[error("node '{node}': tag '{tag}' is not declared in advanced_tags")]
    UnknownAdvancedTag { node: String, tag: String },
}

// ============================================================================
// Content types
// ============================================================================

/// One story node: display text plus its outgoing, ordered choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Optional display title; the UI falls back to the world title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub text: String,

    /// Effects applied every time the node is entered, before choices are
    /// shown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_enter: Vec<Effect>,

    /// Terminal marker: entering this node ends the story with the named
    /// ending (after `on_enter` runs). Terminal nodes need no choices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ending: Option<String>,

    /// Authored order is significant and preserved through filtering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
}

impl Node {
    /// Whether entering this node ends the story regardless of effects.
    pub fn is_terminal(&self) -> bool {
        self.ending.is_some()
    }
}

/// One outgoing edge of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Label shown to the player.
    pub label: String,

    /// Destination node id.
    pub node: String,

    /// Gate; absent means always visible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    /// Applied on selection, before the transition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,
}

/// An authored character origin.
///
/// Whether a locked start is unlocked lives in the
/// [`Profile`](crate::profile::Profile), never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Start {
    /// Stable id used by `unlock_start` effects; defaults to the node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Node the session begins at.
    pub node: String,

    /// Display title; locked starts are shown by title only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Flavor text shown when the start is selectable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blurb: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,

    /// Locked starts are hidden until a profile unlocks them.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub locked: bool,
}

impl Start {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.node)
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("Start")
    }
}

// ============================================================================
// World model
// ============================================================================

/// The immutable story graph plus its catalogs, validated at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldModel {
    pub title: String,

    /// Declared factions. Every faction a condition or effect names must be
    /// listed here.
    #[serde(default)]
    pub factions: Vec<String>,

    /// Privileged tag subset checked by `has_advanced_tag`.
    #[serde(default)]
    pub advanced_tags: BTreeSet<String>,

    /// Alias token to canonical token. Applied to every tag and trait name
    /// before storage or comparison.
    #[serde(default)]
    pub tag_aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub starts: Vec<Start>,

    pub nodes: BTreeMap<String, Node>,
}

impl WorldModel {
    /// Load and validate a world document from disk.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Arc<WorldModel>, ContentError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load and validate a world document from a JSON string.
    pub fn load_str(content: &str) -> Result<Arc<WorldModel>, ContentError> {
        let world: WorldModel = serde_json::from_str(content)?;
        world.validate()?;
        tracing::info!(
            title = %world.title,
            nodes = world.nodes.len(),
            starts = world.starts.len(),
            "world loaded"
        );
        Ok(Arc::new(world))
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Look up a start by its stable id.
    pub fn start(&self, id: &str) -> Option<&Start> {
        self.starts.iter().find(|s| s.id() == id)
    }

    /// Resolve a tag or trait token through the alias table. Unknown tokens
    /// pass through unchanged.
    pub fn canonical_tag<'a>(&'a self, raw: &'a str) -> &'a str {
        self.tag_aliases.get(raw).map(String::as_str).unwrap_or(raw)
    }

    pub fn is_advanced_tag(&self, tag: &str) -> bool {
        self.advanced_tags.contains(self.canonical_tag(tag))
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// All-or-nothing reference validation. Called by the load fronts; kept
    /// public so merged or hand-built documents can be re-checked.
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.title.trim().is_empty() {
            return Err(ContentError::MissingTitle);
        }
        if self.nodes.is_empty() {
            return Err(ContentError::NoNodes);
        }

        let mut start_ids = BTreeSet::new();
        for start in &self.starts {
            if !self.nodes.contains_key(&start.node) {
                return Err(ContentError::UnknownStartNode {
                    start: start.id().to_string(),
                    node: start.node.clone(),
                });
            }
            if !start_ids.insert(start.id().to_string()) {
                return Err(ContentError::DuplicateStart(start.id().to_string()));
            }
        }

        for (id, node) in &self.nodes {
            for effect in &node.on_enter {
                self.check_effect(id, effect)?;
            }
            for choice in &node.choices {
                if !self.nodes.contains_key(&choice.node) {
                    return Err(ContentError::UnknownChoiceTarget {
                        node: id.clone(),
                        label: choice.label.clone(),
                        target: choice.node.clone(),
                    });
                }
                if let Some(condition) = &choice.condition {
                    self.check_condition(id, condition)?;
                }
                for effect in &choice.effects {
                    self.check_effect(id, effect)?;
                }
            }
        }
        Ok(())
    }

    fn check_faction(&self, node: &str, faction: &str) -> Result<(), ContentError> {
        if self.factions.iter().any(|f| f == faction) {
            return Ok(());
        }
        Err(ContentError::UnknownFaction {
            node: node.to_string(),
            faction: faction.to_string(),
        })
    }

    fn check_condition(&self, node: &str, condition: &Condition) -> Result<(), ContentError> {
        match condition {
            Condition::RepAtLeast { faction, .. } | Condition::RepAtMost { faction, .. } => {
                self.check_faction(node, faction)
            }
            Condition::HasAdvancedTag { value: Some(list) } => {
                for tag in list.tokens() {
                    if !self.is_advanced_tag(tag) {
                        return Err(ContentError::UnknownAdvancedTag {
                            node: node.to_string(),
                            tag: tag.clone(),
                        });
                    }
                }
                Ok(())
            }
            Condition::Not { value } => self.check_condition(node, value),
            Condition::And { value } | Condition::Or { value } => {
                for nested in value {
                    self.check_condition(node, nested)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_effect(&self, node: &str, effect: &Effect) -> Result<(), ContentError> {
        match effect {
            Effect::RepDelta { faction, .. } => self.check_faction(node, faction),
            Effect::Teleport { value } => {
                if self.nodes.contains_key(value) {
                    Ok(())
                } else {
                    Err(ContentError::UnknownTeleportTarget {
                        node: node.to_string(),
                        target: value.clone(),
                    })
                }
            }
            _ => Ok(()),
        }
    }
}
