//! Condition and effect rules: the deterministic gate/mutate pipeline.
//!
//! Content authors write predicate trees and effect sequences; this module
//! gives them exactly one meaning:
//! 1. Choices are gated by [`Condition`] trees, evaluated pure against state.
//! 2. Selected choices (and node entries) run [`Effect`] sequences in
//!    authored order.
//! 3. Effects fold into an [`EffectOutcome`] the walker acts on afterward.
//!
//! Both enums are closed: an unknown `type` string fails content loading,
//! so evaluation and application never see an unrecognized kind.

use crate::profile::Profile;
use crate::state::{FlagValue, GameState};
use crate::world::WorldModel;
use serde::{Deserialize, Serialize};

/// One token or several. Collection values are conjunctive except where a
/// predicate documents otherwise (`has_advanced_tag` is any-of).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenList {
    One(String),
    Many(Vec<String>),
}

impl TokenList {
    pub fn tokens(&self) -> &[String] {
        match self {
            TokenList::One(token) => std::slice::from_ref(token),
            TokenList::Many(tokens) => tokens.as_slice(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().is_empty()
    }
}

impl From<&str> for TokenList {
    fn from(token: &str) -> Self {
        TokenList::One(token.to_string())
    }
}

impl From<Vec<String>> for TokenList {
    fn from(tokens: Vec<String>) -> Self {
        TokenList::Many(tokens)
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// A predicate over accumulated player state.
///
/// Leaves read exactly one state container; `not`/`and`/`or` compose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// All listed tags are held (after alias canonicalization).
    HasTag { value: TokenList },

    /// All listed traits are held.
    HasTrait { value: TokenList },

    /// All listed items are held with count >= 1.
    HasItem { value: TokenList },

    /// Any listed advanced tag is held. Omitting `value` checks the whole
    /// advanced-tag catalog.
    HasAdvancedTag {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<TokenList>,
    },

    /// Faction standing >= value. Unset standing reads 0.
    RepAtLeast { faction: String, value: i32 },

    /// Faction standing <= value.
    RepAtMost { faction: String, value: i32 },

    /// Flag equals value; an unset flag matches the zero value of the
    /// expected type.
    FlagEq { flag: String, value: FlagValue },

    Not { value: Box<Condition> },

    /// Empty `and` is true.
    And { value: Vec<Condition> },

    /// Empty `or` is false.
    Or { value: Vec<Condition> },
}

/// Evaluate a predicate tree against current state. Pure: same state, same
/// answer, no mutation.
pub fn evaluate(world: &WorldModel, state: &GameState, condition: &Condition) -> bool {
    match condition {
        Condition::HasTag { value } => value
            .tokens()
            .iter()
            .all(|t| state.has_tag(world.canonical_tag(t))),
        Condition::HasTrait { value } => value
            .tokens()
            .iter()
            .all(|t| state.has_trait(world.canonical_tag(t))),
        Condition::HasItem { value } => value.tokens().iter().all(|t| state.has_item(t)),
        Condition::HasAdvancedTag { value } => match value {
            Some(list) => {
                !list.is_empty()
                    && list
                        .tokens()
                        .iter()
                        .any(|t| state.has_tag(world.canonical_tag(t)))
            }
            None => world.advanced_tags.iter().any(|t| state.has_tag(t)),
        },
        Condition::RepAtLeast { faction, value } => state.reputation(faction) >= *value,
        Condition::RepAtMost { faction, value } => state.reputation(faction) <= *value,
        Condition::FlagEq { flag, value } => state.flag_matches(flag, value),
        Condition::Not { value } => !evaluate(world, state, value),
        Condition::And { value } => value.iter().all(|c| evaluate(world, state, c)),
        Condition::Or { value } => value.iter().any(|c| evaluate(world, state, c)),
    }
}

// ============================================================================
// Effects
// ============================================================================

/// A state mutation descriptor. Applied in authored order; later effects in
/// a sequence observe earlier results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    AddTag { value: TokenList },

    RemoveTag { value: TokenList },

    AddTrait { value: TokenList },

    /// Increments the held count.
    AddItem { value: String },

    /// Decrements the held count; no-op when the item is not held.
    RemoveItem { value: String },

    /// Omitting `value` sets the flag to `true`.
    SetFlag {
        flag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<FlagValue>,
    },

    /// Saturating adjustment within the reputation bounds.
    RepDelta { faction: String, value: i32 },

    /// Rewrites the pending transition; the walker moves here instead.
    Teleport { value: String },

    /// Signals that the story ends with the named ending. Omitting `value`
    /// falls back to an unnamed ending.
    EndGame {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },

    /// Unlocks a start on the profile for future sessions.
    UnlockStart { value: String },

    /// Grants a cross-session legacy tag on the profile. The running
    /// session's tags are untouched; legacy tags join at the next session
    /// start.
    GrantLegacyTag { value: TokenList },
}

pub(crate) const UNNAMED_ENDING: &str = "Unnamed Ending";

/// Signals accumulated while applying an effect sequence.
///
/// The first `end_game` in a sequence fixes the ending; the last `teleport`
/// fixes the destination override. The walker honors the ending first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectOutcome {
    pub ending: Option<String>,
    pub goto: Option<String>,
}

/// Apply a full effect sequence in order, folding the emitted signals.
pub fn apply_effects(
    world: &WorldModel,
    state: &mut GameState,
    profile: &mut Profile,
    effects: &[Effect],
) -> EffectOutcome {
    let mut outcome = EffectOutcome::default();
    for effect in effects {
        apply_effect(world, state, profile, effect, &mut outcome);
    }
    outcome
}

/// Apply a single effect, routing profile-scoped kinds to the profile.
pub fn apply_effect(
    world: &WorldModel,
    state: &mut GameState,
    profile: &mut Profile,
    effect: &Effect,
    outcome: &mut EffectOutcome,
) {
    match effect {
        Effect::AddTag { value } => {
            for tag in value.tokens() {
                let tag = world.canonical_tag(tag);
                if state.add_tag(tag) {
                    tracing::debug!(%tag, "tag added");
                }
            }
        }
        Effect::RemoveTag { value } => {
            for tag in value.tokens() {
                state.remove_tag(world.canonical_tag(tag));
            }
        }
        Effect::AddTrait { value } => {
            for name in value.tokens() {
                let name = world.canonical_tag(name);
                if state.add_trait(name) {
                    tracing::debug!(%name, "trait gained");
                }
            }
        }
        Effect::AddItem { value } => {
            state.add_item(value.clone());
            tracing::debug!(item = %value, count = state.item_count(value), "item gained");
        }
        Effect::RemoveItem { value } => {
            state.remove_item(value);
        }
        Effect::SetFlag { flag, value } => {
            let value = value.clone().unwrap_or(FlagValue::Bool(true));
            tracing::debug!(%flag, ?value, "flag set");
            state.set_flag(flag.clone(), value);
        }
        Effect::RepDelta { faction, value } => {
            let standing = state.adjust_reputation(faction.clone(), *value);
            tracing::debug!(%faction, delta = value, %standing, "reputation adjusted");
        }
        Effect::Teleport { value } => {
            // Last teleport in a sequence wins.
            outcome.goto = Some(value.clone());
        }
        Effect::EndGame { value } => {
            // First ending in a sequence wins.
            if outcome.ending.is_none() {
                outcome.ending = Some(
                    value
                        .clone()
                        .unwrap_or_else(|| UNNAMED_ENDING.to_string()),
                );
            }
        }
        Effect::UnlockStart { value } => {
            if profile.unlock_start(value) {
                tracing::info!(start = %value, "start unlocked");
            }
        }
        Effect::GrantLegacyTag { value } => {
            for tag in value.tokens() {
                let tag = world.canonical_tag(tag);
                if profile.grant_legacy_tag(tag) {
                    tracing::info!(%tag, "legacy tag granted");
                }
            }
        }
    }
}
