//! The progression engine.
//!
//! One engine runs one competition variant. It is parameterized only by a
//! [`Configuration`]; the pilot and final rounds are two instances of the
//! same type. Phase gating and requester resolution happen one layer up in
//! [`QuestService`](crate::quest::service::QuestService); every method here
//! assumes the variant is open and the team id is already resolved.
//!
//! Mutating operations run inside the team's exclusive section provided by
//! [`TeamProgressStore::with_team`], which keeps that section free of I/O.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, error, info};

use crate::error::{InvariantViolation, ProgressionError};
use crate::quest::catalog::TaskCatalog;
use crate::quest::gate::Variant;
use crate::quest::progress::{AdvanceReason, Position, TeamId, TeamProgress, TeamProgressStore};
use crate::quest::timer::{Clock, TimerPolicy, elapsed};

/// Longest accepted answer, in characters.
pub const MAX_ANSWER_CHARS: usize = 512;

/// Static rules of one variant.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Ordered tasks
    pub catalog: TaskCatalog,
    /// Dwell policy
    pub timer: TimerPolicy,
    /// Skip budget per team; `None` means unlimited
    pub max_skips: Option<u32>,
}

/// What a team sees of its current task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskView {
    /// Task ordinal
    pub ordinal: usize,
    /// Display name
    pub name: String,
    /// Prompt content
    pub content: String,
    /// Time left before the leader may move on, if a dwell applies
    #[serde(serialize_with = "opt_secs")]
    pub remaining: Option<Duration>,
}

/// A team's position as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TeamState {
    /// The phase does not allow this variant right now
    Stopped {
        /// Phase-specific explanation
        message: String,
    },
    /// No task opened yet
    NotStarted,
    /// Working on a task
    Active {
        /// Current task
        task: TaskView,
        /// Time spent on the task
        #[serde(serialize_with = "secs")]
        elapsed: Duration,
        /// Whether the dwell allows starting the next task
        can_advance: bool,
    },
    /// Every task has been left
    Completed,
}

/// A single forward move, reported for logging, metrics and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Index before the move
    pub from: i64,
    /// Index after the move
    pub to: i64,
    /// Why the team moved
    pub reason: AdvanceReason,
    /// Whether the move finished the catalog
    pub completed: bool,
    /// Skips used after the move
    pub skips_used: u32,
    /// When the move happened; the opened task's `started_at`
    pub at: DateTime<Utc>,
}

impl Advance {
    /// Ordinal of the task that was left, if any.
    #[must_use]
    pub fn left_task(&self) -> Option<usize> {
        usize::try_from(self.from).ok()
    }

    /// Ordinal of the task that was opened, if any.
    #[must_use]
    pub fn opened_task(&self) -> Option<usize> {
        (!self.completed)
            .then(|| usize::try_from(self.to).ok())
            .flatten()
    }
}

/// Result of [`ProgressionEngine::start_next_task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    /// State after the call
    pub state: TeamState,
    /// The move made, `None` if the team stayed put
    pub advance: Option<Advance>,
}

/// Result of [`ProgressionEngine::try_answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    /// Whether the answer solved the current task
    pub correct: bool,
    /// Task the answer was checked against; `None` without an active task
    pub task: Option<usize>,
    /// The move made on a correct answer
    pub advance: Option<Advance>,
}

/// Result of a skip request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SkipOutcome {
    /// The task was skipped
    Skipped {
        /// State after the skip
        state: TeamState,
        /// Skips spent so far
        skips_used: u32,
    },
    /// Nothing to skip: not started or already completed
    NoActiveTask,
    /// The skip budget is spent
    NoSkipsRemaining {
        /// Skips spent
        used: u32,
        /// Budget
        max: u32,
    },
    /// The phase does not allow this variant right now
    Stopped {
        /// Phase-specific explanation
        message: String,
    },
}

/// Progression engine of one variant.
pub struct ProgressionEngine {
    variant: Variant,
    config: Arc<Configuration>,
    store: TeamProgressStore,
    clock: Arc<dyn Clock>,
}

impl ProgressionEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new(
        variant: Variant,
        config: Arc<Configuration>,
        store: TeamProgressStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            variant,
            config,
            store,
            clock,
        }
    }

    /// Variant served by this engine.
    #[must_use]
    pub const fn variant(&self) -> Variant {
        self.variant
    }

    /// Static rules of this engine.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Progress store of this engine.
    #[must_use]
    pub const fn store(&self) -> &TeamProgressStore {
        &self.store
    }

    /// Reports where the team stands. Never mutates anything.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::Storage`] if the record cannot be loaded
    /// and [`ProgressionError::Invariant`] if it is corrupted.
    pub fn current_task(&self, team: &TeamId) -> Result<TeamState, ProgressionError> {
        let progress = self.store.load(team)?;
        let now = self.clock.now();
        self.state_of(team, &progress, now)
            .map_err(|v| self.violation(team, v))
    }

    /// Opens the first task, or moves to the next one once the dwell has
    /// elapsed. Never moves more than one position.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::Storage`] if the record cannot be loaded
    /// and [`ProgressionError::Invariant`] if it is corrupted.
    pub fn start_next_task(&self, team: &TeamId) -> Result<StartOutcome, ProgressionError> {
        let len = self.config.catalog.len();
        let outcome = self.store.with_team(team, |progress| {
            let now = self.clock.now();
            let advance = match self.position(team, progress)? {
                Position::Completed => None,
                Position::NotStarted => Some(self.advance(progress, AdvanceReason::Start, now)),
                Position::Active { index, started_at } => {
                    if self.dwell_satisfied(index, started_at, now) {
                        Some(self.advance(progress, AdvanceReason::Timer, now))
                    } else {
                        None
                    }
                }
            };
            let state = self.state_of(team, progress, now)?;
            Ok::<_, ProgressionError>(StartOutcome { state, advance })
        });
        let outcome = outcome.map_err(|v| self.violation(team, v))?;

        match outcome.advance {
            Some(a) => info!(
                variant = %self.variant,
                team = %team,
                from = a.from,
                to = a.to,
                reason = %a.reason,
                len,
                "team advanced"
            ),
            None => debug!(
                variant = %self.variant,
                team = %team,
                "start refused: completed or dwell not elapsed"
            ),
        }
        Ok(outcome)
    }

    /// Checks an answer against the team's current task and advances on a
    /// correct one, regardless of the dwell.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::MalformedAnswer`] before touching team
    /// state if the answer is empty, too long or contains control
    /// characters. Storage and invariant failures as for
    /// [`Self::current_task`].
    pub fn try_answer(&self, team: &TeamId, answer: &str) -> Result<AnswerOutcome, ProgressionError> {
        validate_answer(answer)?;

        let outcome = self.store.with_team(team, |progress| {
            let now = self.clock.now();
            let Position::Active { index, .. } = self.position(team, progress)? else {
                return Ok::<_, ProgressionError>(AnswerOutcome {
                    correct: false,
                    task: None,
                    advance: None,
                });
            };
            if !self.config.catalog.check(index, answer) {
                return Ok(AnswerOutcome {
                    correct: false,
                    task: Some(index),
                    advance: None,
                });
            }
            Ok(AnswerOutcome {
                correct: true,
                task: Some(index),
                advance: Some(self.advance(progress, AdvanceReason::Answer, now)),
            })
        });
        let outcome = outcome.map_err(|v| self.violation(team, v))?;

        match (outcome.task, outcome.advance) {
            (Some(task), Some(a)) => info!(
                variant = %self.variant,
                team = %team,
                task,
                to = a.to,
                "correct answer"
            ),
            (Some(task), None) => debug!(variant = %self.variant, team = %team, task, "wrong answer"),
            (None, _) => debug!(variant = %self.variant, team = %team, "answer without active task"),
        }
        Ok(outcome)
    }

    /// Skips the team's current task, spending one skip from the budget.
    ///
    /// # Errors
    ///
    /// Storage and invariant failures as for [`Self::current_task`].
    pub fn skip_task(&self, team: &TeamId) -> Result<(SkipOutcome, Option<Advance>), ProgressionError> {
        let result = self.store.with_team(team, |progress| {
            let now = self.clock.now();
            let Position::Active { .. } = self.position(team, progress)? else {
                return Ok::<_, ProgressionError>((SkipOutcome::NoActiveTask, None));
            };
            if let Some(max) = self.config.max_skips {
                if progress.skips_used >= max {
                    return Ok((
                        SkipOutcome::NoSkipsRemaining {
                            used: progress.skips_used,
                            max,
                        },
                        None,
                    ));
                }
            }
            let advance = self.advance(progress, AdvanceReason::Skip, now);
            let state = self.state_of(team, progress, now)?;
            Ok((
                SkipOutcome::Skipped {
                    state,
                    skips_used: progress.skips_used,
                },
                Some(advance),
            ))
        });
        let (outcome, advance) = result.map_err(|v| self.violation(team, v))?;

        match &outcome {
            SkipOutcome::Skipped { skips_used, .. } => info!(
                variant = %self.variant,
                team = %team,
                skips_used,
                "task skipped"
            ),
            other => debug!(variant = %self.variant, team = %team, outcome = ?other, "skip refused"),
        }
        Ok((outcome, advance))
    }

    /// Loads stored progress and reports corrupted records. Returns how
    /// many records were loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::Storage`] if the backend cannot be read.
    pub fn preload(&self) -> Result<usize, ProgressionError> {
        let count = self.store.preload()?;
        for (team, progress) in self.store.snapshot_all() {
            if let Err(v) = self.position(&team, &progress) {
                error!(
                    variant = %self.variant,
                    team = %team,
                    violation = %v,
                    "stored progress is corrupted; team operations will be refused"
                );
            }
        }
        Ok(count)
    }

    fn position(&self, team: &TeamId, progress: &TeamProgress) -> Result<Position, InvariantViolation> {
        progress.check_skips(team, self.config.max_skips)?;
        progress.position(team, self.config.catalog.len())
    }

    fn dwell_satisfied(&self, index: usize, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.config
            .catalog
            .task_at(index)
            .is_some_and(|task| self.config.timer.can_advance(task, started_at, now))
    }

    fn advance(
        &self,
        progress: &mut TeamProgress,
        reason: AdvanceReason,
        now: DateTime<Utc>,
    ) -> Advance {
        let step = progress.step(self.config.catalog.len(), reason, now);
        Advance {
            from: step.from,
            to: step.to,
            reason,
            completed: step.completed,
            skips_used: progress.skips_used,
            at: now,
        }
    }

    fn state_of(
        &self,
        team: &TeamId,
        progress: &TeamProgress,
        now: DateTime<Utc>,
    ) -> Result<TeamState, InvariantViolation> {
        match self.position(team, progress)? {
            Position::NotStarted => Ok(TeamState::NotStarted),
            Position::Completed => Ok(TeamState::Completed),
            Position::Active { index, started_at } => {
                let task = self.config.catalog.task_at(index).ok_or_else(|| {
                    InvariantViolation::IndexOutOfBounds {
                        team: team.clone(),
                        index: progress.current_index,
                        len: self.config.catalog.len(),
                    }
                })?;
                let timer = &self.config.timer;
                Ok(TeamState::Active {
                    task: TaskView {
                        ordinal: task.ordinal,
                        name: task.name.clone(),
                        content: task.content.clone(),
                        remaining: timer.remaining(task, started_at, now),
                    },
                    elapsed: elapsed(started_at, now),
                    can_advance: timer.can_advance(task, started_at, now),
                })
            }
        }
    }

    fn violation(&self, team: &TeamId, err: impl Into<ProgressionError>) -> ProgressionError {
        let err = err.into();
        if let ProgressionError::Invariant(v) = &err {
            error!(variant = %self.variant, team = %team, violation = %v, "progress invariant violated");
        }
        err
    }
}

impl std::fmt::Debug for ProgressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressionEngine")
            .field("variant", &self.variant)
            .field("tasks", &self.config.catalog.len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Rejects answers that cannot be meaningful before any lock is taken.
///
/// # Errors
///
/// Returns [`ProgressionError::MalformedAnswer`] describing the problem.
pub fn validate_answer(answer: &str) -> Result<(), ProgressionError> {
    if answer.trim().is_empty() {
        return Err(ProgressionError::MalformedAnswer("answer is empty".to_string()));
    }
    if answer.chars().count() > MAX_ANSWER_CHARS {
        return Err(ProgressionError::MalformedAnswer(format!(
            "answer longer than {MAX_ANSWER_CHARS} characters"
        )));
    }
    if answer.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return Err(ProgressionError::MalformedAnswer(
            "answer contains control characters".to_string(),
        ));
    }
    Ok(())
}

fn secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[allow(clippy::ref_option)]
fn opt_secs<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&d.as_secs_f64()),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::quest::catalog::{AnswerChecker, Task};
    use crate::quest::progress::MemoryBackend;
    use crate::quest::timer::ManualClock;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn engine(max_skips: Option<u32>) -> (ProgressionEngine, Arc<ManualClock>) {
        let catalog = TaskCatalog::new(vec![
            Task::new("A", "first", AnswerChecker::exact(["alpha"], false)),
            Task::new("B", "second", AnswerChecker::exact(["beta"], false))
                .with_dwell(Duration::from_secs(60)),
            Task::new("C", "third", AnswerChecker::exact(["gamma"], false)),
        ])
        .unwrap();
        let config = Arc::new(Configuration {
            catalog,
            timer: TimerPolicy::PerTask,
            max_skips,
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let store = TeamProgressStore::new(Variant::Pilot, Arc::new(MemoryBackend));
        (
            ProgressionEngine::new(Variant::Pilot, config, store, clock.clone()),
            clock,
        )
    }

    fn red() -> TeamId {
        TeamId::new("red")
    }

    fn ordinal(state: &TeamState) -> Option<usize> {
        match state {
            TeamState::Active { task, .. } => Some(task.ordinal),
            _ => None,
        }
    }

    #[test]
    fn test_advance_carries_the_stored_start_time() {
        let (engine, clock) = engine(None);
        clock.advance(Duration::from_secs(5));
        let advance = engine.start_next_task(&red()).unwrap().advance.unwrap();
        let stored = engine.store().load(&red()).unwrap();
        assert_eq!(stored.started_at, Some(advance.at));
        assert_eq!(advance.at, t0() + chrono::Duration::seconds(5));

        clock.advance(Duration::from_secs(7));
        let outcome = engine.try_answer(&red(), "alpha").unwrap();
        let stored = engine.store().load(&red()).unwrap();
        assert_eq!(stored.started_at, outcome.advance.map(|a| a.at));
        assert_eq!(stored.history[0].finished_at, outcome.advance.unwrap().at);
    }

    #[test]
    fn test_current_task_does_not_mutate() {
        let (engine, _) = engine(None);
        assert_eq!(engine.current_task(&red()).unwrap(), TeamState::NotStarted);
        assert!(engine.store().snapshot_all().is_empty());

        engine.start_next_task(&red()).unwrap();
        let before = engine.store().load(&red()).unwrap();
        engine.current_task(&red()).unwrap();
        engine.current_task(&red()).unwrap();
        assert_eq!(engine.store().load(&red()).unwrap(), before);
    }

    #[test]
    fn test_start_opens_first_task_once() {
        let (engine, _) = engine(None);
        let first = engine.start_next_task(&red()).unwrap();
        assert_eq!(ordinal(&first.state), Some(0));
        assert_eq!(first.advance.unwrap().reason, AdvanceReason::Start);

        // Task A has no dwell, so a second start moves on to B.
        let second = engine.start_next_task(&red()).unwrap();
        assert_eq!(ordinal(&second.state), Some(1));

        // Task B has a dwell; an immediate third call stays on B.
        let third = engine.start_next_task(&red()).unwrap();
        assert_eq!(ordinal(&third.state), Some(1));
        assert!(third.advance.is_none());
        assert!(matches!(third.state, TeamState::Active { can_advance: false, .. }));
    }

    #[test]
    fn test_dwell_boundary_advances_exactly_one() {
        let (engine, clock) = engine(None);
        engine.start_next_task(&red()).unwrap();
        engine.try_answer(&red(), "alpha").unwrap();

        clock.advance(Duration::from_millis(59_999));
        let early = engine.start_next_task(&red()).unwrap();
        assert_eq!(ordinal(&early.state), Some(1));

        clock.advance(Duration::from_millis(1));
        let on_time = engine.start_next_task(&red()).unwrap();
        assert_eq!(ordinal(&on_time.state), Some(2));
        assert_eq!(on_time.advance.unwrap().reason, AdvanceReason::Timer);
    }

    #[test]
    fn test_wrong_answer_changes_nothing() {
        let (engine, clock) = engine(None);
        engine.start_next_task(&red()).unwrap();
        let before = engine.store().load(&red()).unwrap();

        clock.advance(Duration::from_secs(5));
        let outcome = engine.try_answer(&red(), "wrong").unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.task, Some(0));
        assert_eq!(engine.store().load(&red()).unwrap(), before);
    }

    #[test]
    fn test_correct_answer_bypasses_dwell() {
        let (engine, _) = engine(None);
        engine.start_next_task(&red()).unwrap();
        engine.try_answer(&red(), "alpha").unwrap();
        // Task B has a 60s dwell but the answer moves on immediately.
        let outcome = engine.try_answer(&red(), " BETA ").unwrap();
        assert!(outcome.correct);
        assert_eq!(ordinal(&engine.current_task(&red()).unwrap()), Some(2));
    }

    #[test]
    fn test_answer_without_active_task_is_false() {
        let (engine, _) = engine(None);
        let outcome = engine.try_answer(&red(), "alpha").unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.task, None);
        assert_eq!(engine.current_task(&red()).unwrap(), TeamState::NotStarted);
    }

    #[test]
    fn test_malformed_answers_rejected_before_lock() {
        let (engine, _) = engine(None);
        let long = "x".repeat(MAX_ANSWER_CHARS + 1);
        for bad in ["", "   ", "a\u{0}b", long.as_str()] {
            let err = engine.try_answer(&red(), bad).unwrap_err();
            assert!(err.is_caller_fault(), "{bad:?} should be a caller fault");
        }
        assert!(engine.store().snapshot_all().is_empty());
    }

    #[test]
    fn test_skip_counts_and_completes() {
        let (engine, _) = engine(None);
        assert_eq!(engine.skip_task(&red()).unwrap().0, SkipOutcome::NoActiveTask);

        engine.start_next_task(&red()).unwrap();
        for expected in 1..=3 {
            let (outcome, advance) = engine.skip_task(&red()).unwrap();
            assert!(matches!(outcome, SkipOutcome::Skipped { skips_used, .. } if skips_used == expected));
            assert_eq!(advance.unwrap().reason, AdvanceReason::Skip);
        }
        assert_eq!(engine.current_task(&red()).unwrap(), TeamState::Completed);
        assert_eq!(engine.skip_task(&red()).unwrap().0, SkipOutcome::NoActiveTask);
    }

    #[test]
    fn test_skip_budget() {
        let (engine, _) = engine(Some(1));
        engine.start_next_task(&red()).unwrap();
        engine.skip_task(&red()).unwrap();
        let before = engine.store().load(&red()).unwrap();

        let (outcome, advance) = engine.skip_task(&red()).unwrap();
        assert_eq!(outcome, SkipOutcome::NoSkipsRemaining { used: 1, max: 1 });
        assert!(advance.is_none());
        assert_eq!(engine.store().load(&red()).unwrap(), before);
    }

    #[test]
    fn test_completed_team_is_read_only() {
        let (engine, _) = engine(None);
        engine.start_next_task(&red()).unwrap();
        engine.try_answer(&red(), "alpha").unwrap();
        engine.try_answer(&red(), "beta").unwrap();
        let last = engine.try_answer(&red(), "gamma").unwrap();
        assert!(last.advance.unwrap().completed);

        let before = engine.store().load(&red()).unwrap();
        let start = engine.start_next_task(&red()).unwrap();
        assert_eq!(start.advance, None);
        assert_eq!(start.state, TeamState::Completed);
        assert!(!engine.try_answer(&red(), "gamma").unwrap().correct);
        assert_eq!(engine.skip_task(&red()).unwrap().0, SkipOutcome::NoActiveTask);
        assert_eq!(engine.store().load(&red()).unwrap(), before);
    }

    #[test]
    fn test_corrupted_record_is_refused() {
        let (engine, _) = engine(None);
        engine
            .store()
            .save(
                &red(),
                TeamProgress {
                    current_index: 7,
                    ..TeamProgress::default()
                },
            )
            .unwrap();
        let err = engine.start_next_task(&red()).unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::Invariant(InvariantViolation::IndexOutOfBounds { index: 7, .. })
        ));
        assert!(engine.current_task(&red()).is_err());
        assert_eq!(engine.store().load(&red()).unwrap().current_index, 7);
    }

    #[test]
    fn test_corrupted_skip_budget_is_refused() {
        let (engine, _) = engine(Some(1));
        engine
            .store()
            .save(
                &red(),
                TeamProgress {
                    current_index: 0,
                    started_at: Some(t0()),
                    skips_used: 4,
                    ..TeamProgress::default()
                },
            )
            .unwrap();
        assert!(matches!(
            engine.skip_task(&red()),
            Err(ProgressionError::Invariant(InvariantViolation::SkipBudgetExceeded { .. }))
        ));
    }

    #[test]
    fn test_team_state_serialization() {
        let (engine, clock) = engine(None);
        engine.start_next_task(&red()).unwrap();
        engine.try_answer(&red(), "alpha").unwrap();
        clock.advance(Duration::from_secs(10));

        let json = serde_json::to_value(engine.current_task(&red()).unwrap()).unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["task"]["name"], "B");
        assert_eq!(json["elapsed"], 10.0);
        assert_eq!(json["task"]["remaining"], 50.0);
        assert_eq!(json["can_advance"], false);

        let stopped = TeamState::Stopped {
            message: "closed".into(),
        };
        assert_eq!(
            serde_json::to_value(stopped).unwrap(),
            serde_json::json!({"state": "stopped", "message": "closed"})
        );
    }

    #[test]
    fn test_storage_error_converts() {
        let err: ProgressionError = StoreError::InvalidKey("x".into()).into();
        assert_eq!(err.category(), "storage");
    }
}
