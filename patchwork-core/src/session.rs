//! The story walker: node entry, choice filtering, selection, endings, and
//! autosave wiring.
//!
//! A [`StorySession`] owns the mutable [`GameState`] and the active
//! [`Profile`] for one playthrough and is their sole mutator. It suspends
//! only while awaiting a selection; everything else happens synchronously
//! inside [`StorySession::choose`].

use crate::persist::{SaveError, SaveManager};
use crate::profile::Profile;
use crate::rules;
use crate::state::GameState;
use crate::world::{Start, WorldModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced while walking the story graph.
#[derive(Debug, Error)]
pub enum WalkError {
    /// The state references a node this world does not define. Happens
    /// when a save is paired with edited content, never with a freshly
    /// validated world.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// A reachable node filtered down to zero visible choices. Recoverable:
    /// the caller picks a fallback node via [`StorySession::recover`].
    #[error("node '{node}' has no visible choices")]
    DeadEnd { node: String },

    /// An on-enter teleport chain revisited a node within one entry.
    #[error("teleport loop while entering node '{node}'")]
    TeleportLoop { node: String },

    /// Selection index outside the filtered choice list. State unchanged.
    #[error("choice {index} is out of range ({available} available)")]
    ChoiceOutOfRange { index: usize, available: usize },

    #[error("unknown start '{0}'")]
    UnknownStart(String),

    /// The start exists but this profile has not unlocked it.
    #[error("start '{start}' is locked")]
    LockedStart { start: String },

    /// No further selections are accepted after an ending.
    #[error("the story has ended ({ending})")]
    SessionEnded { ending: String },
}

/// Walker control states. After every public call the session rests in
/// `AwaitingSelection` or `Ended`; the other two are passed through while a
/// step executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Phase {
    AtNode,
    AwaitingSelection,
    Transitioning,
    Ended(String),
}

/// Read-only render snapshot handed to the UI after each step. The UI never
/// sees `GameState` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub node_id: String,

    /// Node title, falling back to the world title.
    pub title: String,

    pub text: String,

    /// Filtered choice labels in authored order. Selection indices passed
    /// to [`StorySession::choose`] index into this list.
    pub choices: Vec<String>,

    pub tags: Vec<String>,
    pub traits: Vec<String>,
    pub items: BTreeMap<String, u32>,
    pub reputation: BTreeMap<String, i32>,
}

/// What the walker produced after a step.
#[derive(Debug, Clone)]
pub enum Step {
    /// The story continues; present the frame and ask for a selection.
    Frame(Frame),

    /// The story ended. The ending is already recorded on the profile.
    Ended { ending: String },
}

/// Starts this profile may currently begin, in authored order.
pub fn available_starts<'a>(world: &'a WorldModel, profile: &Profile) -> Vec<&'a Start> {
    world
        .starts
        .iter()
        .filter(|start| profile.can_begin(start))
        .collect()
}

// ============================================================================
// Session
// ============================================================================

/// One running playthrough.
#[derive(Debug)]
pub struct StorySession {
    world: Arc<WorldModel>,
    state: GameState,
    profile: Profile,
    phase: Phase,

    /// Indices into the current node's authored choice list, one per
    /// visible choice. Computed at entry so the mapping from displayed
    /// numbers to choices never shifts under the caller.
    visible: Vec<usize>,

    saves: Option<SaveManager>,

    /// Last autosave failure, kept for the UI to surface. Autosave errors
    /// never roll back a transition.
    autosave_error: Option<SaveError>,
}

impl StorySession {
    /// Begin a new playthrough at the given start.
    ///
    /// Seeds the state with the start's tags and traits plus the profile's
    /// legacy tags, then enters the start node, running its on-enter
    /// effects.
    pub fn new(
        world: Arc<WorldModel>,
        profile: Profile,
        start_id: &str,
        player_name: impl Into<String>,
    ) -> Result<Self, WalkError> {
        let start = world
            .start(start_id)
            .ok_or_else(|| WalkError::UnknownStart(start_id.to_string()))?
            .clone();
        if !profile.can_begin(&start) {
            return Err(WalkError::LockedStart {
                start: start_id.to_string(),
            });
        }

        let mut state = GameState::new(player_name, start.id(), &start.node);
        for tag in &start.tags {
            state.add_tag(world.canonical_tag(tag));
        }
        for name in &start.traits {
            state.add_trait(world.canonical_tag(name));
        }
        for tag in &profile.legacy_tags {
            state.add_tag(world.canonical_tag(tag));
        }

        tracing::info!(
            session = %state.session_id,
            start = %start.id(),
            player = %state.player_name,
            "session started"
        );

        let mut session = Self {
            world,
            state,
            profile,
            phase: Phase::AtNode,
            visible: Vec::new(),
            saves: None,
            autosave_error: None,
        };
        let first = session.state.current_node.clone();
        session.enter(&first, true)?;
        Ok(session)
    }

    /// Resume a loaded playthrough at its saved node.
    ///
    /// Saves capture the state after the node's on-enter effects already
    /// ran, so resumption only recomputes the visible choices and never
    /// re-applies effects.
    pub fn resume(
        world: Arc<WorldModel>,
        state: GameState,
        profile: Profile,
    ) -> Result<Self, WalkError> {
        let mut session = Self {
            world,
            state,
            profile,
            phase: Phase::AtNode,
            visible: Vec::new(),
            saves: None,
            autosave_error: None,
        };
        let current = session.state.current_node.clone();
        session.enter(&current, false)?;
        Ok(session)
    }

    /// Attach a save manager; the session autosaves after each transition
    /// and persists the profile when an ending is reached.
    ///
    /// A session can end during [`StorySession::new`] itself (a start whose
    /// node is terminal, or whose on-enter effects end the game), before any
    /// manager is attached. Attaching one to an already ended session
    /// persists the profile immediately so that ending is never lost.
    pub fn with_saves(mut self, saves: SaveManager) -> Self {
        if matches!(self.phase, Phase::Ended(_)) {
            if let Err(err) = saves.profile_store().save(&self.profile) {
                tracing::warn!(error = %err, "failed to persist profile at ending");
                self.autosave_error = Some(err.into());
            }
        }
        self.saves = Some(saves);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// The frame to render, when a selection is awaited.
    pub fn frame(&self) -> Option<Frame> {
        match self.phase {
            Phase::AwaitingSelection => self.build_frame(),
            _ => None,
        }
    }

    /// Current step: the frame to render or the ending reached.
    pub fn current(&self) -> Result<Step, WalkError> {
        match &self.phase {
            Phase::Ended(ending) => Ok(Step::Ended {
                ending: ending.clone(),
            }),
            _ => self
                .frame()
                .map(Step::Frame)
                .ok_or_else(|| WalkError::UnknownNode(self.state.current_node.clone())),
        }
    }

    /// Take the last autosave failure, if any.
    pub fn take_autosave_error(&mut self) -> Option<SaveError> {
        self.autosave_error.take()
    }

    // ------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------

    /// Write the quick slot. Requires an attached save manager.
    pub fn quick_save(&mut self) -> Result<(), SaveError> {
        let saves = self.saves.as_ref().ok_or(SaveError::NotAttached)?;
        saves.quick_save(&self.state, &mut self.profile)
    }

    /// Save to a user-named slot, returning the normalized slot name.
    pub fn save_named(&mut self, slot: &str) -> Result<String, SaveError> {
        let saves = self.saves.as_ref().ok_or(SaveError::NotAttached)?;
        saves.save_named(slot, &self.state, &mut self.profile)
    }

    // ------------------------------------------------------------------
    // Walking
    // ------------------------------------------------------------------

    /// Apply the selected choice and advance to the next node.
    ///
    /// `index` addresses the filtered choice list of the current frame. An
    /// out-of-range index is rejected without touching state.
    pub fn choose(&mut self, index: usize) -> Result<Step, WalkError> {
        if let Phase::Ended(ending) = &self.phase {
            return Err(WalkError::SessionEnded {
                ending: ending.clone(),
            });
        }
        if index >= self.visible.len() {
            return Err(WalkError::ChoiceOutOfRange {
                index,
                available: self.visible.len(),
            });
        }

        let world = Arc::clone(&self.world);
        let node_id = self.state.current_node.clone();
        let node = world
            .node(&node_id)
            .ok_or_else(|| WalkError::UnknownNode(node_id.clone()))?;
        let choice = &node.choices[self.visible[index]];
        tracing::debug!(node = %node_id, choice = %choice.label, "choice selected");

        self.phase = Phase::Transitioning;
        let outcome = rules::apply_effects(&world, &mut self.state, &mut self.profile, &choice.effects);
        self.state.record_visit(&node_id, &choice.label);

        if let Some(ending) = outcome.ending {
            self.finish(ending);
        } else {
            let dest = outcome.goto.unwrap_or_else(|| choice.node.clone());
            self.enter(&dest, true)?;
            if matches!(self.phase, Phase::AwaitingSelection) {
                self.autosave();
            }
        }
        self.current()
    }

    /// Fallback after a [`WalkError::DeadEnd`]: relocate the session to a
    /// known node chosen by the caller. Runs that node's on-enter effects
    /// like any other entry.
    pub fn recover(&mut self, node_id: &str) -> Result<Step, WalkError> {
        if let Phase::Ended(ending) = &self.phase {
            return Err(WalkError::SessionEnded {
                ending: ending.clone(),
            });
        }
        tracing::warn!(from = %self.state.current_node, to = %node_id, "recovering session");
        self.enter(node_id, true)?;
        if matches!(self.phase, Phase::AwaitingSelection) {
            self.autosave();
        }
        self.current()
    }

    /// Enter a node: run its on-enter effects (chasing teleports), honor
    /// ending signals and terminal markers, then filter choices.
    fn enter(&mut self, node_id: &str, run_effects: bool) -> Result<(), WalkError> {
        let world = Arc::clone(&self.world);
        let mut current = node_id.to_string();
        let mut visited = BTreeSet::new();
        self.visible.clear();

        loop {
            if !visited.insert(current.clone()) {
                return Err(WalkError::TeleportLoop { node: current });
            }
            let node = world
                .node(&current)
                .ok_or_else(|| WalkError::UnknownNode(current.clone()))?;
            self.phase = Phase::AtNode;
            self.state.current_node = current.clone();
            tracing::debug!(node = %current, "entered node");

            let outcome = if run_effects {
                rules::apply_effects(&world, &mut self.state, &mut self.profile, &node.on_enter)
            } else {
                Default::default()
            };

            if let Some(ending) = outcome.ending {
                self.finish(ending);
                return Ok(());
            }
            if let Some(goto) = outcome.goto {
                self.phase = Phase::Transitioning;
                current = goto;
                continue;
            }
            if let Some(ending) = &node.ending {
                self.finish(ending.clone());
                return Ok(());
            }

            let visible: Vec<usize> = node
                .choices
                .iter()
                .enumerate()
                .filter(|(_, choice)| match &choice.condition {
                    Some(condition) => rules::evaluate(&world, &self.state, condition),
                    None => true,
                })
                .map(|(i, _)| i)
                .collect();

            if visible.is_empty() {
                return Err(WalkError::DeadEnd { node: current });
            }
            tracing::debug!(
                node = %current,
                visible = visible.len(),
                authored = node.choices.len(),
                "choices filtered"
            );
            self.visible = visible;
            self.phase = Phase::AwaitingSelection;
            return Ok(());
        }
    }

    /// Move to `Ended`, record the ending on the profile, and persist the
    /// profile if a save manager is attached.
    fn finish(&mut self, ending: String) {
        self.visible.clear();
        if self.profile.record_ending(&ending) {
            tracing::info!(ending = %ending, "new ending recorded");
        } else {
            tracing::info!(ending = %ending, "ending reached");
        }
        if let Some(saves) = &self.saves {
            if let Err(err) = saves.profile_store().save(&self.profile) {
                tracing::warn!(error = %err, "failed to persist profile at ending");
                self.autosave_error = Some(err.into());
            }
        }
        self.phase = Phase::Ended(ending);
    }

    fn autosave(&mut self) {
        let Some(saves) = &self.saves else {
            return;
        };
        if let Err(err) = saves.autosave(&self.state, &mut self.profile) {
            tracing::warn!(error = %err, "autosave failed");
            self.autosave_error = Some(err);
        }
    }

    fn build_frame(&self) -> Option<Frame> {
        let node = self.world.node(&self.state.current_node)?;
        let choices = self
            .visible
            .iter()
            .filter_map(|&i| node.choices.get(i))
            .map(|choice| choice.label.clone())
            .collect();
        Some(Frame {
            node_id: self.state.current_node.clone(),
            title: node
                .title
                .clone()
                .unwrap_or_else(|| self.world.title.clone()),
            text: node.text.clone(),
            choices,
            tags: self.state.tags.iter().cloned().collect(),
            traits: self.state.traits.iter().cloned().collect(),
            items: self.state.items.clone(),
            reputation: self.state.reputation.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_world, WorldBuilder};
    use serde_json::json;

    fn start_session(world: Arc<WorldModel>) -> StorySession {
        StorySession::new(world, Profile::new("default"), "dock", "Traveler")
            .expect("session should start")
    }

    #[test]
    fn test_new_session_seeds_start_tags_and_legacy_tags() {
        let world = sample_world();
        let mut profile = Profile::new("default");
        profile.grant_legacy_tag("Envoy");

        let session = StorySession::new(world, profile, "dock", "Aster")
            .expect("session should start");
        assert!(session.state().has_tag("Scout"), "start tag seeded");
        assert!(session.state().has_tag("Envoy"), "legacy tag merged");
        assert_eq!(session.state().player_name, "Aster");
        assert_eq!(session.state().start_id, "dock");
    }

    #[test]
    fn test_locked_start_is_refused_until_unlocked() {
        let world = sample_world();
        let err = StorySession::new(
            Arc::clone(&world),
            Profile::new("default"),
            "smuggler",
            "Aster",
        )
        .unwrap_err();
        assert!(matches!(err, WalkError::LockedStart { start } if start == "smuggler"));

        let mut profile = Profile::new("default");
        profile.unlock_start("smuggler");
        assert!(StorySession::new(world, profile, "smuggler", "Aster").is_ok());
    }

    #[test]
    fn test_available_starts_filters_locked() {
        let world = sample_world();
        let profile = Profile::new("default");
        let ids: Vec<_> = available_starts(&world, &profile)
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert!(ids.contains(&"dock".to_string()));
        assert!(!ids.contains(&"smuggler".to_string()));

        let mut unlocked = Profile::new("default");
        unlocked.unlock_start("smuggler");
        let ids: Vec<_> = available_starts(&world, &unlocked)
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert!(ids.contains(&"smuggler".to_string()));
    }

    #[test]
    fn test_gated_choice_is_hidden_without_tag() {
        let world = sample_world();
        let session = start_session(world);
        let frame = session.frame().expect("awaiting selection");

        // The dock authors three choices; "Slip into the warehouse" is
        // gated on a tag the fresh session does not hold.
        assert_eq!(frame.node_id, "dock");
        assert!(frame.choices.contains(&"Head to the market".to_string()));
        assert!(!frame
            .choices
            .iter()
            .any(|label| label.contains("warehouse")));
    }

    #[test]
    fn test_filtered_order_matches_authored_order() {
        let world = WorldBuilder::new("Order")
            .start("a", "a")
            .node(
                "a",
                json!({
                    "text": "Pick.",
                    "choices": [
                        { "label": "First", "node": "a" },
                        { "label": "Second", "node": "a",
                          "condition": { "type": "has_tag", "value": "Ghost" } },
                        { "label": "Third", "node": "a" }
                    ]
                }),
            )
            .build()
            .expect("world");
        let session = StorySession::new(world, Profile::new("default"), "a", "Aster")
            .expect("session");
        let frame = session.frame().expect("frame");
        assert_eq!(frame.choices, vec!["First", "Third"]);
    }

    #[test]
    fn test_choose_applies_effects_and_transitions() {
        let world = sample_world();
        let mut session = start_session(world);

        let frame = session.frame().expect("frame");
        let market = frame
            .choices
            .iter()
            .position(|label| label == "Head to the market")
            .expect("market choice visible");

        let step = session.choose(market).expect("choose should succeed");
        match step {
            Step::Frame(frame) => assert_eq!(frame.node_id, "market"),
            Step::Ended { .. } => panic!("story should continue"),
        }
        // The market visit effect granted an item.
        assert!(session.state().has_item("market token"));
        assert_eq!(session.state().history.len(), 1);
        assert_eq!(session.state().history[0].node, "dock");
    }

    #[test]
    fn test_out_of_range_choice_leaves_state_untouched() {
        let world = sample_world();
        let mut session = start_session(world);
        let before = session.state().clone();

        let err = session.choose(99).unwrap_err();
        assert!(matches!(
            err,
            WalkError::ChoiceOutOfRange { index: 99, available } if available > 0
        ));
        assert_eq!(session.state(), &before);
        assert!(matches!(session.phase(), Phase::AwaitingSelection));
    }

    #[test]
    fn test_on_enter_teleport_is_chased() {
        let world = WorldBuilder::new("Chase")
            .start("a", "a")
            .node(
                "a",
                json!({
                    "text": "Go.",
                    "choices": [{ "label": "Step", "node": "b" }]
                }),
            )
            .node(
                "b",
                json!({
                    "text": "Detour.",
                    "on_enter": [{ "type": "teleport", "value": "c" }],
                    "choices": [{ "label": "Stay", "node": "b" }]
                }),
            )
            .node(
                "c",
                json!({
                    "text": "Arrived.",
                    "choices": [{ "label": "Rest", "node": "c" }]
                }),
            )
            .build()
            .expect("world");

        let mut session = StorySession::new(world, Profile::new("default"), "a", "Aster")
            .expect("session");
        let step = session.choose(0).expect("choose");
        match step {
            Step::Frame(frame) => assert_eq!(frame.node_id, "c"),
            Step::Ended { .. } => panic!("story should continue"),
        }
    }

    #[test]
    fn test_teleport_loop_is_an_integrity_error() {
        let world = WorldBuilder::new("Loop")
            .start("a", "a")
            .node(
                "a",
                json!({
                    "text": "Go.",
                    "choices": [{ "label": "Step", "node": "b" }]
                }),
            )
            .node(
                "b",
                json!({
                    "text": "Spin.",
                    "on_enter": [{ "type": "teleport", "value": "c" }],
                    "choices": [{ "label": "Stay", "node": "b" }]
                }),
            )
            .node(
                "c",
                json!({
                    "text": "Spin back.",
                    "on_enter": [{ "type": "teleport", "value": "b" }],
                    "choices": [{ "label": "Stay", "node": "c" }]
                }),
            )
            .build()
            .expect("world");

        let mut session = StorySession::new(world, Profile::new("default"), "a", "Aster")
            .expect("session");
        let err = session.choose(0).unwrap_err();
        assert!(matches!(err, WalkError::TeleportLoop { .. }));
    }

    #[test]
    fn test_dead_end_is_recoverable() {
        let world = WorldBuilder::new("Dead End")
            .start("a", "a")
            .node(
                "a",
                json!({
                    "text": "Fork.",
                    "choices": [{ "label": "Into the cave", "node": "cave" }]
                }),
            )
            .node(
                "cave",
                json!({
                    "text": "Every exit is gated.",
                    "choices": [{
                        "label": "Secret door",
                        "node": "a",
                        "condition": { "type": "has_tag", "value": "Ghost" }
                    }]
                }),
            )
            .build()
            .expect("world");

        let mut session = StorySession::new(world, Profile::new("default"), "a", "Aster")
            .expect("session");
        let err = session.choose(0).unwrap_err();
        assert!(matches!(err, WalkError::DeadEnd { ref node } if node == "cave"));

        // The caller routes the session back to a hub of its choosing.
        let step = session.recover("a").expect("recover");
        match step {
            Step::Frame(frame) => assert_eq!(frame.node_id, "a"),
            Step::Ended { .. } => panic!("story should continue"),
        }
        assert!(matches!(session.phase(), Phase::AwaitingSelection));
    }

    #[test]
    fn test_end_game_halts_and_records_ending() {
        let world = sample_world();
        let mut session = start_session(world);

        // dock -> market, then take the gated escape that ends the story.
        let frame = session.frame().expect("frame");
        let market = frame
            .choices
            .iter()
            .position(|label| label == "Head to the market")
            .expect("market choice");
        session.choose(market).expect("to market");

        let frame = session.frame().expect("frame");
        let escape = frame
            .choices
            .iter()
            .position(|label| label == "Slip away on the night ferry")
            .expect("escape choice");
        let step = session.choose(escape).expect("ending step");

        match step {
            Step::Ended { ending } => assert_eq!(ending, "Hidden Docks Escape"),
            Step::Frame(_) => panic!("story should have ended"),
        }
        assert!(session.profile().seen_endings.contains("Hidden Docks Escape"));
        assert!(matches!(session.phase(), Phase::Ended(_)));

        // No further selections are accepted.
        let err = session.choose(0).unwrap_err();
        assert!(matches!(err, WalkError::SessionEnded { .. }));
    }

    #[test]
    fn test_terminal_node_marker_ends_story() {
        let world = WorldBuilder::new("Terminal")
            .start("a", "a")
            .node(
                "a",
                json!({
                    "text": "Last step.",
                    "choices": [{ "label": "Walk into the light", "node": "end" }]
                }),
            )
            .node("end", json!({ "text": "Done.", "ending": "A Quiet Close" }))
            .build()
            .expect("world");

        let mut session = StorySession::new(world, Profile::new("default"), "a", "Aster")
            .expect("session");
        let step = session.choose(0).expect("choose");
        match step {
            Step::Ended { ending } => assert_eq!(ending, "A Quiet Close"),
            Step::Frame(_) => panic!("marker node must end the story"),
        }
        assert!(session.profile().seen_endings.contains("A Quiet Close"));
    }

    #[test]
    fn test_resume_does_not_reapply_entry_effects() {
        let world = WorldBuilder::new("Resume")
            .faction("Tide Wardens")
            .start("a", "a")
            .node(
                "a",
                json!({
                    "text": "Gift on entry.",
                    "on_enter": [{ "type": "rep_delta", "faction": "Tide Wardens", "value": 1 }],
                    "choices": [{ "label": "Wait", "node": "a" }]
                }),
            )
            .build()
            .expect("world");

        let session = StorySession::new(
            Arc::clone(&world),
            Profile::new("default"),
            "a",
            "Aster",
        )
        .expect("session");
        assert_eq!(session.state().reputation("Tide Wardens"), 1);

        let state = session.state().clone();
        let resumed = StorySession::resume(world, state.clone(), Profile::new("default"))
            .expect("resume");
        // Entry effects already live in the saved state; resuming must not
        // double-apply them.
        assert_eq!(resumed.state().reputation("Tide Wardens"), 1);
        assert_eq!(resumed.state(), &state);
        assert!(matches!(resumed.phase(), Phase::AwaitingSelection));
    }

    #[test]
    fn test_evaluation_during_filtering_does_not_mutate() {
        let world = sample_world();
        let session = start_session(world);
        let before = session.state().clone();
        let _ = session.frame();
        let _ = session.frame();
        assert_eq!(session.state(), &before);
    }
}
