//! Structured event stream for `questline`.
//!
//! Progression events are written as newline-delimited JSON with a
//! monotonically increasing `sequence`, so an operator can replay what
//! happened to every team during a competition.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::quest::gate::{CompetitionPhase, Variant};
use crate::quest::progress::{AdvanceReason, TeamId};

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted while a competition runs.
///
/// Serialized with a `"type"` tag so consumers can dispatch on the kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The server is ready to accept requests.
    ServerStarted {
        /// When the server started.
        timestamp: DateTime<Utc>,
        /// Configured competition name.
        competition: String,
        /// Listen address.
        bind: String,
    },

    /// The server has stopped.
    ServerStopped {
        /// When the server stopped.
        timestamp: DateTime<Utc>,
        /// Human-readable stop reason.
        reason: String,
    },

    /// The administrator moved the competition phase.
    PhaseChanged {
        /// When the change happened.
        timestamp: DateTime<Utc>,
        /// Previous phase.
        from: CompetitionPhase,
        /// New phase.
        to: CompetitionPhase,
    },

    /// A team opened a task.
    TaskStarted {
        /// When the task was opened.
        timestamp: DateTime<Utc>,
        /// Variant being played.
        variant: Variant,
        /// Team that advanced.
        team: TeamId,
        /// Ordinal of the opened task.
        task: usize,
        /// Why the previous position was left.
        reason: AdvanceReason,
    },

    /// A correct answer was submitted.
    AnswerAccepted {
        /// When the answer was checked.
        timestamp: DateTime<Utc>,
        /// Variant being played.
        variant: Variant,
        /// Answering team.
        team: TeamId,
        /// Ordinal of the solved task.
        task: usize,
    },

    /// A wrong answer was submitted.
    AnswerRejected {
        /// When the answer was checked.
        timestamp: DateTime<Utc>,
        /// Variant being played.
        variant: Variant,
        /// Answering team.
        team: TeamId,
        /// Ordinal of the current task.
        task: usize,
    },

    /// A team skipped a task.
    TaskSkipped {
        /// When the skip happened.
        timestamp: DateTime<Utc>,
        /// Variant being played.
        variant: Variant,
        /// Skipping team.
        team: TeamId,
        /// Ordinal of the skipped task.
        task: usize,
        /// Skips spent so far, including this one.
        skips_used: u32,
    },

    /// A team left the last task of a variant.
    TeamCompleted {
        /// When the team finished.
        timestamp: DateTime<Utc>,
        /// Variant being played.
        variant: Variant,
        /// Finishing team.
        team: TeamId,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each [`emit`](Self::emit) takes the next sequence number, writes one JSON
/// line and flushes. Serialization and I/O failures are dropped; the event
/// stream never fails a progression operation.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter appending to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        // The sequence is taken under the writer lock so lines stay ordered.
        let Ok(mut w) = self.writer.lock() else {
            return;
        };
        let envelope = EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            event,
        };
        if let Ok(line) = serde_json::to_string(&envelope) {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
