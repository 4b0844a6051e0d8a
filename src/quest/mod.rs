//! Quest progression.
//!
//! Leaf first: [`timer`] and [`catalog`] are pure, [`progress`] owns the
//! per-team records, [`gate`] holds the global phase, [`engine`] runs one
//! variant, and [`service`] dispatches requests by phase and requester.

pub mod catalog;
pub mod directory;
pub mod engine;
pub mod gate;
pub mod progress;
pub mod service;
pub mod timer;

pub use catalog::{AnswerChecker, Task, TaskCatalog};
pub use directory::{RosterDirectory, TeamDirectory};
pub use engine::{Configuration, ProgressionEngine, SkipOutcome, TeamState};
pub use gate::{CompetitionPhase, PhaseGate, PhaseSource, Variant};
pub use progress::{JsonDirBackend, MemoryBackend, ProgressBackend, TeamId, TeamProgress, TeamProgressStore};
pub use service::{PhaseController, QuestService};
pub use timer::{Clock, ManualClock, SystemClock, TimerPolicy};
