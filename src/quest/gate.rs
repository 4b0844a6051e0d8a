//! Competition phase gate.
//!
//! A single process-wide phase decides which progression variant is open.
//! Engines only read it through [`PhaseSource`]; the administrative setter
//! on [`PhaseGate`] is the one place that moves it, and only forward.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PhaseError;

/// Global competition phase, ordered `NotStarted < Pilot < Final < Finished`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CompetitionPhase {
    /// Registration is open, no variant accepts progress yet
    #[default]
    NotStarted = 0,
    /// The pilot variant is running
    Pilot = 1,
    /// The final variant is running
    Final = 2,
    /// The competition is over
    Finished = 3,
}

impl CompetitionPhase {
    /// Every phase in forward order.
    pub const ALL: [Self; 4] = [Self::NotStarted, Self::Pilot, Self::Final, Self::Finished];

    /// Returns the variant that is open during this phase, if any.
    #[must_use]
    pub const fn variant(self) -> Option<Variant> {
        match self {
            Self::Pilot => Some(Variant::Pilot),
            Self::Final => Some(Variant::Final),
            Self::NotStarted | Self::Finished => None,
        }
    }

    /// Stable snake-case name, used for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Pilot => "pilot",
            Self::Final => "final",
            Self::Finished => "finished",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotStarted,
            1 => Self::Pilot,
            2 => Self::Final,
            _ => Self::Finished,
        }
    }
}

impl fmt::Display for CompetitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompetitionPhase {
    type Err = PhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| PhaseError::Unknown(s.to_string()))
    }
}

/// Competition variant served by one progression engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Warm-up round
    Pilot,
    /// Main round
    Final,
}

impl Variant {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pilot => "pilot",
            Self::Final => "final",
        }
    }

    /// The phase during which this variant is open.
    #[must_use]
    pub const fn phase(self) -> CompetitionPhase {
        match self {
            Self::Pilot => CompetitionPhase::Pilot,
            Self::Final => CompetitionPhase::Final,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the current competition phase.
pub trait PhaseSource: Send + Sync {
    /// Returns the phase in effect right now. Must not have side effects.
    fn current_phase(&self) -> CompetitionPhase;
}

/// A fixed phase, mostly useful in tests.
impl PhaseSource for CompetitionPhase {
    fn current_phase(&self) -> CompetitionPhase {
        *self
    }
}

/// Atomic, forward-only competition phase.
#[derive(Debug, Default)]
pub struct PhaseGate {
    phase: AtomicU8,
}

impl PhaseGate {
    /// Creates a gate starting at `initial`.
    #[must_use]
    pub const fn new(initial: CompetitionPhase) -> Self {
        Self {
            phase: AtomicU8::new(initial as u8),
        }
    }

    /// Moves the gate to `target`.
    ///
    /// Setting the current phase again is a no-op, and phases may be skipped
    /// (e.g. `NotStarted -> Final`). Returns the phase that was in effect
    /// before the call.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Regression`] if `target` precedes the current
    /// phase.
    pub fn advance_to(&self, target: CompetitionPhase) -> Result<CompetitionPhase, PhaseError> {
        let mut current = self.phase.load(Ordering::SeqCst);
        loop {
            let from = CompetitionPhase::from_u8(current);
            if target < from {
                return Err(PhaseError::Regression { from, to: target });
            }
            if target == from {
                return Ok(from);
            }
            match self.phase.compare_exchange(
                current,
                target as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(from),
                Err(observed) => current = observed,
            }
        }
    }
}

impl PhaseSource for PhaseGate {
    fn current_phase(&self) -> CompetitionPhase {
        CompetitionPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }
}
