//! Deterministic branching-narrative engine for Patchwork Isles.
//!
//! This crate provides:
//! - A validated, immutable world content model
//! - A predicate/effect rules system over accumulated player state
//! - A story walker with gated choices, teleports, and named endings
//! - Save slots with checksum verification and backup recovery
//! - Cross-session player profiles (unlocked starts, legacy tags)
//!
//! # Quick Start
//!
//! ```ignore
//! use patchwork_core::{Profile, Step, StorySession, WorldModel};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let world = WorldModel::load_from_path("world.json")?;
//!
//!     let mut session = StorySession::new(world, Profile::new("default"), "dock", "Aster")?;
//!
//!     loop {
//!         match session.current()? {
//!             Step::Frame(frame) => {
//!                 println!("{}\n{}", frame.title, frame.text);
//!                 for (i, label) in frame.choices.iter().enumerate() {
//!                     println!("  {}. {label}", i + 1);
//!                 }
//!                 session.choose(read_selection()?)?;
//!             }
//!             Step::Ended { ending } => {
//!                 println!("The story ends: {ending}");
//!                 break;
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod persist;
pub mod profile;
pub mod rules;
pub mod session;
pub mod state;
pub mod testing;
pub mod world;

// Primary public API
pub use analysis::{lint, reachability, LintWarning, ReachabilityReport};
pub use persist::{LoadOutcome, SaveError, SaveManager, SlotInfo};
pub use profile::{Profile, ProfileError, ProfileInfo, ProfileStore};
pub use rules::{apply_effects, evaluate, Condition, Effect, EffectOutcome};
pub use session::{available_starts, Frame, Phase, Step, StorySession, WalkError};
pub use state::{FlagValue, GameState, HistoryEntry};
pub use world::{Choice, ContentError, Node, Start, WorldModel};
