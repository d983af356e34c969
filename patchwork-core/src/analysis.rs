//! Static content analysis: graph reachability and advisory authoring lint.
//!
//! Both functions take an already validated [`WorldModel`], so the analyzer
//! accepts exactly the content the engine accepts. Lint findings are
//! advisory; the engine runs content that trips every rule here.

use crate::rules::{Condition, Effect, UNNAMED_ENDING};
use crate::world::{Node, WorldModel};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

// ============================================================================
// Reachability
// ============================================================================

/// Which nodes a player can reach from the declared starts.
#[derive(Debug, Clone)]
pub struct ReachabilityReport {
    pub total: usize,
    pub reachable: BTreeSet<String>,

    /// Node ids no start can reach, sorted.
    pub unreachable: Vec<String>,
}

/// Breadth-first walk from every start over choice destinations and
/// teleport targets. Conditions are ignored; this is graph reachability,
/// not gate satisfiability.
pub fn reachability(world: &WorldModel) -> ReachabilityReport {
    let mut reachable: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<&str> = world.starts.iter().map(|s| s.node.as_str()).collect();

    while let Some(id) = queue.pop_front() {
        let Some(node) = world.node(id) else { continue };
        if !reachable.insert(id.to_string()) {
            continue;
        }
        for target in edge_targets(node) {
            if !reachable.contains(target) {
                queue.push_back(target);
            }
        }
    }

    let unreachable = world
        .nodes
        .keys()
        .filter(|id| !reachable.contains(*id))
        .cloned()
        .collect();
    ReachabilityReport {
        total: world.nodes.len(),
        reachable,
        unreachable,
    }
}

/// Outgoing edges of a node: choice destinations plus every teleport target
/// in its on-enter and choice effect sequences.
fn edge_targets(node: &Node) -> Vec<&str> {
    let mut targets = Vec::new();
    for effect in &node.on_enter {
        if let Effect::Teleport { value } = effect {
            targets.push(value.as_str());
        }
    }
    for choice in &node.choices {
        targets.push(choice.node.as_str());
        for effect in &choice.effects {
            if let Effect::Teleport { value } = effect {
                targets.push(value.as_str());
            }
        }
    }
    targets
}

// ============================================================================
// Lint
// ============================================================================

/// One advisory authoring finding.
#[derive(Debug, Clone, PartialEq)]
pub struct LintWarning {
    /// Offending node id, or `None` for world-level findings.
    pub node: Option<String>,
    pub message: String,
}

impl LintWarning {
    fn world(message: impl Into<String>) -> Self {
        Self {
            node: None,
            message: message.into(),
        }
    }

    fn node(id: &str, message: impl Into<String>) -> Self {
        Self {
            node: Some(id.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for LintWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "node '{node}': {}", self.message),
            None => write!(f, "world: {}", self.message),
        }
    }
}

/// Advisory authoring rules: catalog completeness, the 3-5 choice corridor,
/// and per-node gate variety.
pub fn lint(world: &WorldModel) -> Vec<LintWarning> {
    let mut warnings = Vec::new();

    if world.factions.is_empty() {
        warnings.push(LintWarning::world("no factions declared"));
    }
    if world.starts.is_empty() {
        warnings.push(LintWarning::world("no starts declared"));
    }

    let endings = ending_names(world);
    if endings.len() < 2 {
        warnings.push(LintWarning::world(format!(
            "fewer than two distinct endings (found {})",
            endings.len()
        )));
    }

    for (id, node) in &world.nodes {
        if node.title.is_none() {
            warnings.push(LintWarning::node(id, "missing title"));
        }
        if node.text.trim().is_empty() {
            warnings.push(LintWarning::node(id, "empty text"));
        }
        if node.is_terminal() {
            continue;
        }
        if node.choices.is_empty() {
            warnings.push(LintWarning::node(
                id,
                "no choices and no ending marker (guaranteed dead end)",
            ));
            continue;
        }
        if !(3..=5).contains(&node.choices.len()) {
            warnings.push(LintWarning::node(
                id,
                format!("expected 3-5 choices, found {}", node.choices.len()),
            ));
        }

        let mut tag_gated = false;
        let mut tagless = false;
        for choice in &node.choices {
            match &choice.condition {
                None => tagless = true,
                Some(
                    Condition::HasTag { .. }
                    | Condition::HasTrait { .. }
                    | Condition::HasAdvancedTag { .. },
                ) => tag_gated = true,
                Some(
                    Condition::HasItem { .. }
                    | Condition::FlagEq { .. }
                    | Condition::RepAtLeast { .. }
                    | Condition::RepAtMost { .. },
                ) => tagless = true,
                // Compound gates count as neither; authors decide.
                Some(_) => {}
            }
        }
        if !tag_gated {
            warnings.push(LintWarning::node(id, "no tag-gated choice"));
        }
        if !tagless {
            warnings.push(LintWarning::node(
                id,
                "no tagless choice (item, rep, flag, or unconditional)",
            ));
        }
    }

    warnings
}

/// Every distinct ending name: terminal markers plus `end_game` effect
/// names, with unnamed endings counted under their fallback name.
fn ending_names(world: &WorldModel) -> BTreeSet<String> {
    let mut endings = BTreeSet::new();
    for node in world.nodes.values() {
        if let Some(name) = &node.ending {
            endings.insert(name.clone());
        }
        let choice_effects = node.choices.iter().flat_map(|c| c.effects.iter());
        for effect in node.on_enter.iter().chain(choice_effects) {
            if let Effect::EndGame { value } = effect {
                endings.insert(
                    value
                        .clone()
                        .unwrap_or_else(|| UNNAMED_ENDING.to_string()),
                );
            }
        }
    }
    endings
}
