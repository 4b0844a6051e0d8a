//! `questline` - Progression engine for live, phase-gated team quests
//!
//! Teams walk an ordered catalog of tasks, one per variant of the
//! competition (pilot and final). The global phase decides which variant is
//! open; each team's progress is serialized independently so teams never
//! block each other.

pub mod cli;
pub mod config;
pub mod error;
pub mod observability;
pub mod quest;
pub mod serve;
