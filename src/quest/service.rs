//! Phase dispatch and requester resolution in front of the engines.
//!
//! Each call takes exactly one phase snapshot and maps it to either an
//! open engine or a `Stopped` message. Only after that are requesters
//! resolved to teams and handed to the engine. Metrics and events are
//! recorded here, after the team's exclusive section has been released.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::schema::{MessagesConfig, QuestConfig, TimerConfig, TimerMode, VariantConfig};
use crate::error::{ConfigError, PhaseError, ProgressionError};
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::quest::catalog::TaskCatalog;
use crate::quest::directory::{RosterDirectory, TeamDirectory, resolve_leader, resolve_member};
use crate::quest::engine::{Advance, Configuration, ProgressionEngine, SkipOutcome, TeamState};
use crate::quest::gate::{CompetitionPhase, PhaseGate, PhaseSource, Variant};
use crate::quest::progress::{ProgressBackend, TeamId, TeamProgress, TeamProgressStore};
use crate::quest::timer::{Clock, TimerPolicy, parse_duration};

// ============================================================================
// Messages
// ============================================================================

/// Texts reported while no engine is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMessages {
    /// Before the competition starts
    pub not_started: String,
    /// After the competition ends
    pub finished: String,
    /// The phase is open but its variant is not configured
    pub unavailable: String,
    /// The team has already finished every task of the round
    pub completed: String,
}

/// Status and start message sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Messages {
    /// For current-task queries and refused answers or skips
    pub status: StopMessages,
    /// For start requests
    pub start: StopMessages,
}

impl From<&MessagesConfig> for Messages {
    fn from(cfg: &MessagesConfig) -> Self {
        let status = StopMessages {
            not_started: cfg.status.not_started.clone(),
            finished: cfg.status.finished.clone(),
            unavailable: cfg.status.unavailable.clone(),
            completed: cfg.status.completed.clone(),
        };
        let start = StopMessages {
            not_started: cfg
                .start
                .not_started
                .clone()
                .unwrap_or_else(|| status.not_started.clone()),
            finished: cfg
                .start
                .finished
                .clone()
                .unwrap_or_else(|| status.finished.clone()),
            unavailable: cfg
                .start
                .unavailable
                .clone()
                .unwrap_or_else(|| status.unavailable.clone()),
            completed: cfg
                .start
                .completed
                .clone()
                .unwrap_or_else(|| status.completed.clone()),
        };
        Self { status, start }
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self::from(&MessagesConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
enum Purpose {
    Status,
    Start,
}

enum Selected<'a> {
    Open(&'a ProgressionEngine),
    Closed(String),
}

// ============================================================================
// Progress Export
// ============================================================================

/// Raw progression data of every team, for leaderboards and audits.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressExport {
    /// Phase at export time
    pub phase: CompetitionPhase,
    /// One entry per configured variant
    pub variants: Vec<VariantProgress>,
}

/// Progress of every known team in one variant.
#[derive(Debug, Clone, Serialize)]
pub struct VariantProgress {
    /// Variant
    pub variant: Variant,
    /// Catalog length
    pub tasks: usize,
    /// Teams with a record, sorted by id
    pub teams: Vec<TeamEntry>,
}

/// One team's raw record.
#[derive(Debug, Clone, Serialize)]
pub struct TeamEntry {
    /// Team id
    pub team: TeamId,
    /// Stored record
    #[serde(flatten)]
    pub progress: TeamProgress,
}

// ============================================================================
// Service
// ============================================================================

/// Entry point for all four progression operations.
pub struct QuestService {
    phase: Arc<dyn PhaseSource>,
    pilot: Option<ProgressionEngine>,
    final_round: Option<ProgressionEngine>,
    directory: Arc<dyn TeamDirectory>,
    messages: Messages,
    events: Arc<EventEmitter>,
    clock: Arc<dyn Clock>,
}

impl QuestService {
    /// Creates a service without engines; add them with
    /// [`Self::with_engine`].
    #[must_use]
    pub fn new(
        phase: Arc<dyn PhaseSource>,
        directory: Arc<dyn TeamDirectory>,
        clock: Arc<dyn Clock>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            phase,
            pilot: None,
            final_round: None,
            directory,
            messages: Messages::default(),
            events,
            clock,
        }
    }

    /// Installs the engine for its variant, replacing any previous one.
    #[must_use]
    pub fn with_engine(mut self, engine: ProgressionEngine) -> Self {
        match engine.variant() {
            Variant::Pilot => self.pilot = Some(engine),
            Variant::Final => self.final_round = Some(engine),
        }
        self
    }

    /// Sets the phase messages.
    #[must_use]
    pub fn with_messages(mut self, messages: Messages) -> Self {
        self.messages = messages;
        self
    }

    /// Builds a service from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a variant cannot be turned into an
    /// engine (bad answer rule, dwell or timer).
    pub fn from_config(
        config: &QuestConfig,
        phase: Arc<dyn PhaseSource>,
        backend: Arc<dyn ProgressBackend>,
        clock: Arc<dyn Clock>,
        events: Arc<EventEmitter>,
    ) -> Result<Self, ConfigError> {
        let directory = Arc::new(RosterDirectory::from_config(&config.teams));
        let mut service = Self::new(phase, directory, Arc::clone(&clock), events)
            .with_messages(Messages::from(&config.messages));

        let variants = [
            (Variant::Pilot, config.variants.pilot.as_ref()),
            (Variant::Final, config.variants.final_round.as_ref()),
        ];
        for (variant, cfg) in variants {
            if let Some(cfg) = cfg {
                let configuration = configuration_from(variant, cfg)?;
                let store = TeamProgressStore::new(variant, Arc::clone(&backend));
                service = service.with_engine(ProgressionEngine::new(
                    variant,
                    Arc::new(configuration),
                    store,
                    Arc::clone(&clock),
                ));
            }
        }
        Ok(service)
    }

    /// Loads stored progress into every engine.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::Storage`] if a backend cannot be read.
    pub fn preload(&self) -> Result<usize, ProgressionError> {
        let mut total = 0;
        for engine in self.engines() {
            total += engine.preload()?;
        }
        Ok(total)
    }

    /// Phase currently in effect.
    #[must_use]
    pub fn phase(&self) -> CompetitionPhase {
        self.phase.current_phase()
    }

    /// Engine of a variant, if configured.
    #[must_use]
    pub const fn engine(&self, variant: Variant) -> Option<&ProgressionEngine> {
        match variant {
            Variant::Pilot => self.pilot.as_ref(),
            Variant::Final => self.final_round.as_ref(),
        }
    }

    /// Reports the current task of the requester's team.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::UnknownRequester`] for users without a
    /// team, plus storage and invariant failures.
    pub fn get_current_task(&self, user: &str) -> Result<TeamState, ProgressionError> {
        let phase = self.phase.current_phase();
        let engine = match self.select(phase, Purpose::Status) {
            Selected::Open(engine) => engine,
            Selected::Closed(message) => {
                metrics::record_stopped(phase);
                return Ok(TeamState::Stopped { message });
            }
        };
        let team = resolve_member(self.directory.as_ref(), user).map_err(|e| failed(user, e))?;
        engine.current_task(&team).map_err(|e| failed(user, e))
    }

    /// Opens the first or next task for the requester's team. Leader only.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::NotLeader`] or
    /// [`ProgressionError::UnknownRequester`] if the requester may not
    /// start tasks, plus storage and invariant failures.
    pub fn start_next_task(&self, user: &str) -> Result<TeamState, ProgressionError> {
        let phase = self.phase.current_phase();
        let engine = match self.select(phase, Purpose::Start) {
            Selected::Open(engine) => engine,
            Selected::Closed(message) => {
                metrics::record_stopped(phase);
                return Ok(TeamState::Stopped { message });
            }
        };
        let team = resolve_leader(self.directory.as_ref(), user).map_err(|e| failed(user, e))?;
        let outcome = engine.start_next_task(&team).map_err(|e| failed(user, e))?;
        match outcome.advance {
            Some(advance) => self.record_advance(engine.variant(), &team, advance),
            None if outcome.state == TeamState::Completed => {
                debug!(user, team = %team, "start refused: team already completed");
                return Ok(TeamState::Stopped {
                    message: self.messages.start.completed.clone(),
                });
            }
            None => {}
        }
        Ok(outcome.state)
    }

    /// Checks an answer for the requester's team. Any member may answer.
    ///
    /// Returns `false` while the phase is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::UnknownRequester`] or
    /// [`ProgressionError::MalformedAnswer`] for bad requests, plus storage
    /// and invariant failures.
    pub fn try_answer(&self, user: &str, answer: &str) -> Result<bool, ProgressionError> {
        let phase = self.phase.current_phase();
        let engine = match self.select(phase, Purpose::Status) {
            Selected::Open(engine) => engine,
            Selected::Closed(_) => {
                warn!(phase = %phase, user, "answer submitted while no round is open");
                metrics::record_stopped(phase);
                return Ok(false);
            }
        };
        let team = resolve_member(self.directory.as_ref(), user).map_err(|e| failed(user, e))?;
        let outcome = engine.try_answer(&team, answer).map_err(|e| failed(user, e))?;

        let variant = engine.variant();
        if let Some(task) = outcome.task {
            metrics::record_answer(variant, outcome.correct);
            let timestamp = outcome.advance.map_or_else(|| self.clock.now(), |a| a.at);
            let team = team.clone();
            self.events.emit(if outcome.correct {
                Event::AnswerAccepted {
                    timestamp,
                    variant,
                    team,
                    task,
                }
            } else {
                Event::AnswerRejected {
                    timestamp,
                    variant,
                    team,
                    task,
                }
            });
        }
        if let Some(advance) = outcome.advance {
            self.record_advance(variant, &team, advance);
        }
        Ok(outcome.correct)
    }

    /// Skips the current task of the requester's team. Leader only.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::NotLeader`] or
    /// [`ProgressionError::UnknownRequester`] if the requester may not
    /// skip, plus storage and invariant failures.
    pub fn skip_task(&self, user: &str) -> Result<SkipOutcome, ProgressionError> {
        let phase = self.phase.current_phase();
        let engine = match self.select(phase, Purpose::Status) {
            Selected::Open(engine) => engine,
            Selected::Closed(message) => {
                warn!(phase = %phase, user, "skip requested while no round is open");
                metrics::record_stopped(phase);
                return Ok(SkipOutcome::Stopped { message });
            }
        };
        let team = resolve_leader(self.directory.as_ref(), user).map_err(|e| failed(user, e))?;
        let (outcome, advance) = engine.skip_task(&team).map_err(|e| failed(user, e))?;

        if let Some(advance) = advance {
            let variant = engine.variant();
            metrics::record_skip(variant);
            if let Some(task) = advance.left_task() {
                self.events.emit(Event::TaskSkipped {
                    timestamp: advance.at,
                    variant,
                    team: team.clone(),
                    task,
                    skips_used: advance.skips_used,
                });
            }
            self.record_advance(variant, &team, advance);
        }
        Ok(outcome)
    }

    /// Copies the raw progress of every team in every configured variant.
    #[must_use]
    pub fn export(&self) -> ProgressExport {
        let variants = self
            .engines()
            .map(|engine| VariantProgress {
                variant: engine.variant(),
                tasks: engine.configuration().catalog.len(),
                teams: engine
                    .store()
                    .snapshot_all()
                    .into_iter()
                    .map(|(team, progress)| TeamEntry { team, progress })
                    .collect(),
            })
            .collect();
        ProgressExport {
            phase: self.phase.current_phase(),
            variants,
        }
    }

    fn engines(&self) -> impl Iterator<Item = &ProgressionEngine> {
        self.pilot.iter().chain(self.final_round.iter())
    }

    /// Maps a phase snapshot to an open engine or a stop message.
    fn select(&self, phase: CompetitionPhase, purpose: Purpose) -> Selected<'_> {
        let messages = match purpose {
            Purpose::Status => &self.messages.status,
            Purpose::Start => &self.messages.start,
        };
        match phase.variant() {
            None if phase == CompetitionPhase::NotStarted => {
                Selected::Closed(messages.not_started.clone())
            }
            None => Selected::Closed(messages.finished.clone()),
            Some(variant) => self
                .engine(variant)
                .map_or_else(|| Selected::Closed(messages.unavailable.clone()), Selected::Open),
        }
    }

    fn record_advance(&self, variant: Variant, team: &TeamId, advance: Advance) {
        metrics::record_advance(variant, advance.reason);
        let timestamp = advance.at;
        if let Some(task) = advance.opened_task() {
            self.events.emit(Event::TaskStarted {
                timestamp,
                variant,
                team: team.clone(),
                task,
                reason: advance.reason,
            });
        }
        if advance.completed {
            info!(variant = %variant, team = %team, "team completed the quest");
            metrics::record_team_completed(variant);
            self.events.emit(Event::TeamCompleted {
                timestamp,
                variant,
                team: team.clone(),
            });
        }
    }
}

fn failed(user: &str, err: ProgressionError) -> ProgressionError {
    metrics::record_error(err.category());
    match &err {
        e if e.is_caller_fault() => debug!(user, error = %e, "request refused"),
        ProgressionError::Storage(e) => error!(user, error = %e, "progress storage failed"),
        // Invariant violations are already logged by the engine.
        _ => {}
    }
    err
}

impl std::fmt::Debug for QuestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestService")
            .field("phase", &self.phase.current_phase())
            .field("pilot", &self.pilot)
            .field("final_round", &self.final_round)
            .finish_non_exhaustive()
    }
}

/// Builds an engine configuration from one configured variant.
///
/// # Errors
///
/// Returns a [`ConfigError`] for an invalid task list or timer.
pub fn configuration_from(
    variant: Variant,
    cfg: &VariantConfig,
) -> Result<Configuration, ConfigError> {
    let prefix = format!("variants.{variant}");
    let timer = match &cfg.timer {
        TimerConfig::Mode(TimerMode::PerTask) => TimerPolicy::PerTask,
        TimerConfig::Mode(TimerMode::Disabled) => TimerPolicy::Disabled,
        TimerConfig::Fixed { fixed } => {
            TimerPolicy::Fixed(parse_duration(&format!("{prefix}.timer.fixed"), fixed)?)
        }
    };
    Ok(Configuration {
        catalog: TaskCatalog::from_config(&format!("{prefix}.tasks"), &cfg.tasks)?,
        timer,
        max_skips: cfg.max_skips,
    })
}

// ============================================================================
// Administrative Phase Control
// ============================================================================

/// Administrative setter for the competition phase.
pub struct PhaseController {
    gate: Arc<PhaseGate>,
    events: Arc<EventEmitter>,
    clock: Arc<dyn Clock>,
}

impl PhaseController {
    /// Wraps a gate.
    #[must_use]
    pub fn new(gate: Arc<PhaseGate>, clock: Arc<dyn Clock>, events: Arc<EventEmitter>) -> Self {
        metrics::set_competition_phase(gate.current_phase());
        Self { gate, events, clock }
    }

    /// Read-only view for the service.
    #[must_use]
    pub fn source(&self) -> Arc<dyn PhaseSource> {
        Arc::clone(&self.gate) as Arc<dyn PhaseSource>
    }

    /// Phase currently in effect.
    #[must_use]
    pub fn current(&self) -> CompetitionPhase {
        self.gate.current_phase()
    }

    /// Moves the competition forward to `target`. Returns the previous phase.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Regression`] if `target` lies behind the
    /// current phase.
    pub fn set_phase(&self, target: CompetitionPhase) -> Result<CompetitionPhase, PhaseError> {
        let from = self.gate.advance_to(target).inspect_err(|e| {
            warn!(error = %e, "phase change refused");
            metrics::record_error("phase_regression");
        })?;
        if from != target {
            info!(from = %from, to = %target, "competition phase changed");
            metrics::set_competition_phase(target);
            self.events.emit(Event::PhaseChanged {
                timestamp: self.clock.now(),
                from,
                to: target,
            });
        }
        Ok(from)
    }
}

impl std::fmt::Debug for PhaseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseController")
            .field("gate", &self.gate)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::catalog::{AnswerChecker, Task};
    use crate::quest::progress::MemoryBackend;
    use crate::quest::timer::ManualClock;
    use chrono::{DateTime, Utc};
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    /// Moves one second forward on every reading.
    struct TickingClock(AtomicI64);

    impl Clock for TickingClock {
        fn now(&self) -> DateTime<Utc> {
            let secs = self.0.fetch_add(1, Ordering::SeqCst);
            DateTime::from_timestamp(secs, 0).unwrap()
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn events(&self) -> Vec<serde_json::Value> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        service: QuestService,
        control: PhaseController,
        clock: Arc<ManualClock>,
    }

    fn pilot_engine(clock: Arc<ManualClock>) -> ProgressionEngine {
        let catalog = TaskCatalog::new(vec![
            Task::new("A", "", AnswerChecker::exact(["a"], false)),
            Task::new("B", "", AnswerChecker::exact(["b"], false))
                .with_dwell(Duration::from_secs(60)),
        ])
        .unwrap();
        ProgressionEngine::new(
            Variant::Pilot,
            Arc::new(Configuration {
                catalog,
                timer: TimerPolicy::PerTask,
                max_skips: Some(1),
            }),
            TeamProgressStore::new(Variant::Pilot, Arc::new(MemoryBackend)),
            clock,
        )
    }

    fn fixture(phase: CompetitionPhase) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let events = Arc::new(EventEmitter::noop());
        let control = PhaseController::new(
            Arc::new(PhaseGate::new(phase)),
            clock.clone(),
            Arc::clone(&events),
        );
        let directory = Arc::new(RosterDirectory::new().with_team("red", "alice", ["bob"]));
        let service = QuestService::new(control.source(), directory, clock.clone(), events)
            .with_engine(pilot_engine(clock.clone()));
        Fixture {
            service,
            control,
            clock,
        }
    }

    #[test]
    fn test_closed_phases_report_stopped() {
        let f = fixture(CompetitionPhase::NotStarted);
        let messages = Messages::default();
        assert_eq!(
            f.service.get_current_task("alice").unwrap(),
            TeamState::Stopped {
                message: messages.status.not_started.clone()
            }
        );
        assert!(!f.service.try_answer("alice", "a").unwrap());
        assert!(matches!(
            f.service.skip_task("alice").unwrap(),
            SkipOutcome::Stopped { .. }
        ));

        f.control.set_phase(CompetitionPhase::Finished).unwrap();
        assert_eq!(
            f.service.start_next_task("alice").unwrap(),
            TeamState::Stopped {
                message: messages.start.finished
            }
        );
    }

    #[test]
    fn test_start_on_completed_team_is_stopped() {
        let f = fixture(CompetitionPhase::Pilot);
        f.service.start_next_task("alice").unwrap();
        assert!(f.service.try_answer("bob", "a").unwrap());
        assert!(f.service.try_answer("bob", "b").unwrap());

        assert_eq!(f.service.get_current_task("bob").unwrap(), TeamState::Completed);
        let before = f.service.export();
        assert_eq!(
            f.service.start_next_task("alice").unwrap(),
            TeamState::Stopped {
                message: Messages::default().start.completed
            }
        );
        assert_eq!(
            serde_json::to_value(f.service.export()).unwrap(),
            serde_json::to_value(before).unwrap()
        );
    }

    #[test]
    fn test_completed_message_falls_back_to_status() {
        let mut cfg = MessagesConfig::default();
        cfg.status.completed = "well done".to_string();
        assert_eq!(Messages::from(&cfg).start.completed, "well done");

        cfg.start.completed = Some("see you in the final".to_string());
        let messages = Messages::from(&cfg);
        assert_eq!(messages.start.completed, "see you in the final");
        assert_eq!(messages.status.completed, "well done");
    }

    #[test]
    fn test_events_use_the_stored_start_time() {
        let clock = Arc::new(TickingClock(AtomicI64::new(1_700_000_000)));
        let buf = SharedBuf::default();
        let events = Arc::new(EventEmitter::new(Box::new(buf.clone())));
        let engine = ProgressionEngine::new(
            Variant::Pilot,
            Arc::new(Configuration {
                catalog: TaskCatalog::new(vec![
                    Task::new("A", "", AnswerChecker::any()),
                    Task::new("B", "", AnswerChecker::any()),
                ])
                .unwrap(),
                timer: TimerPolicy::PerTask,
                max_skips: None,
            }),
            TeamProgressStore::new(Variant::Pilot, Arc::new(MemoryBackend)),
            clock.clone(),
        );
        let directory = Arc::new(RosterDirectory::new().with_team("red", "alice", ["bob"]));
        let service = QuestService::new(
            Arc::new(CompetitionPhase::Pilot),
            directory,
            clock,
            events,
        )
        .with_engine(engine);

        service.start_next_task("alice").unwrap();
        let first = service
            .engine(Variant::Pilot)
            .unwrap()
            .store()
            .load(&TeamId::new("red"))
            .unwrap();
        assert!(service.try_answer("bob", "anything").unwrap());
        let second = service
            .engine(Variant::Pilot)
            .unwrap()
            .store()
            .load(&TeamId::new("red"))
            .unwrap();

        let started: Vec<_> = buf
            .events()
            .into_iter()
            .filter(|e| e["type"] == "TaskStarted")
            .map(|e| e["timestamp"].clone())
            .collect();
        assert_eq!(
            started,
            vec![
                serde_json::to_value(first.started_at.unwrap()).unwrap(),
                serde_json::to_value(second.started_at.unwrap()).unwrap(),
            ]
        );
        let accepted = buf
            .events()
            .into_iter()
            .find(|e| e["type"] == "AnswerAccepted")
            .unwrap();
        assert_eq!(accepted["timestamp"], started[1]);
    }

    #[test]
    fn test_unconfigured_variant_is_unavailable() {
        let f = fixture(CompetitionPhase::Final);
        assert_eq!(
            f.service.get_current_task("alice").unwrap(),
            TeamState::Stopped {
                message: Messages::default().status.unavailable
            }
        );
    }

    #[test]
    fn test_closed_phase_wins_over_unknown_requester() {
        let f = fixture(CompetitionPhase::NotStarted);
        assert!(matches!(
            f.service.get_current_task("mallory").unwrap(),
            TeamState::Stopped { .. }
        ));
    }

    #[test]
    fn test_leader_and_member_rules() {
        let f = fixture(CompetitionPhase::Pilot);
        assert!(matches!(
            f.service.start_next_task("bob"),
            Err(ProgressionError::NotLeader { .. })
        ));
        assert!(matches!(
            f.service.get_current_task("mallory"),
            Err(ProgressionError::UnknownRequester(_))
        ));

        f.service.start_next_task("alice").unwrap();
        // Any member may answer.
        assert!(f.service.try_answer("bob", "A").unwrap());
        assert!(matches!(
            f.service.skip_task("bob"),
            Err(ProgressionError::NotLeader { .. })
        ));
    }

    #[test]
    fn test_messages_fall_back_to_status() {
        let mut cfg = MessagesConfig::default();
        cfg.status.finished = "over".to_string();
        cfg.start.not_started = Some("wait for the kick-off".to_string());
        let messages = Messages::from(&cfg);
        assert_eq!(messages.start.not_started, "wait for the kick-off");
        assert_eq!(messages.start.finished, "over");
        assert_eq!(messages.status.finished, "over");
    }

    #[test]
    fn test_phase_snapshot_switches_engines() {
        let f = fixture(CompetitionPhase::Pilot);
        f.service.start_next_task("alice").unwrap();
        assert!(matches!(
            f.service.get_current_task("alice").unwrap(),
            TeamState::Active { .. }
        ));

        f.control.set_phase(CompetitionPhase::Final).unwrap();
        assert!(matches!(
            f.service.get_current_task("alice").unwrap(),
            TeamState::Stopped { .. }
        ));
        assert!(f.control.set_phase(CompetitionPhase::Pilot).is_err());
    }

    #[test]
    fn test_export_lists_known_teams() {
        let f = fixture(CompetitionPhase::Pilot);
        f.service.start_next_task("alice").unwrap();
        f.clock.advance(Duration::from_secs(1));
        let export = f.service.export();
        assert_eq!(export.phase, CompetitionPhase::Pilot);
        assert_eq!(export.variants.len(), 1);
        assert_eq!(export.variants[0].teams[0].team, TeamId::new("red"));

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["variants"][0]["teams"][0]["current_index"], 0);
    }

    #[test]
    fn test_configuration_from_fixed_timer() {
        let cfg: VariantConfig = serde_yaml::from_str(
            "timer: { fixed: 90s }\nmax_skips: 2\ntasks: [{ name: A, answer: a }]\n",
        )
        .unwrap();
        let configuration = configuration_from(Variant::Final, &cfg).unwrap();
        assert_eq!(configuration.timer, TimerPolicy::Fixed(Duration::from_secs(90)));
        assert_eq!(configuration.max_skips, Some(2));
    }
}
