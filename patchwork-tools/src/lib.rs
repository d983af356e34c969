//! Authoring tools for Patchwork Isles world content.
//!
//! The binaries in this crate (`validate`, `unreachable`, `merge-modules`,
//! `play`) are thin front-ends over [`patchwork_core`]; the merge logic
//! lives here so it can be tested without touching a terminal.

pub mod cli;
pub mod merge;
