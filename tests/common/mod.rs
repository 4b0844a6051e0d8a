//! Shared integration-test harness: fixture loading, an in-process quest
//! with a manual clock, and a helper for running the binary.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use questline::config::loader::ConfigLoader;
use questline::config::schema::QuestConfig;
use questline::observability::EventEmitter;
use questline::quest::engine::TeamState;
use questline::quest::progress::ProgressBackend;
use questline::quest::timer::{Clock, ManualClock};
use questline::quest::{PhaseController, PhaseGate, QuestService};

/// Start of every manual clock.
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

/// Absolute path of a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Loads and validates a fixture.
#[allow(clippy::missing_panics_doc)]
pub fn load_fixture(name: &str) -> Arc<QuestConfig> {
    ConfigLoader::default()
        .load(&fixture_path(name))
        .unwrap_or_else(|e| panic!("fixture {name} should load: {e}"))
        .config
}

/// A quest running in-process on a manual clock.
pub struct Quest {
    pub service: QuestService,
    pub control: PhaseController,
    pub clock: Arc<ManualClock>,
}

impl Quest {
    /// Builds a quest from a fixture, starting in the fixture's phase.
    #[allow(clippy::missing_panics_doc)]
    pub fn from_fixture(name: &str, backend: Arc<dyn ProgressBackend>) -> Self {
        let config = load_fixture(name);
        let clock = Arc::new(ManualClock::new(t0()));
        let events = Arc::new(EventEmitter::noop());
        let control = PhaseController::new(
            Arc::new(PhaseGate::new(config.competition.phase)),
            clock.clone(),
            Arc::clone(&events),
        );
        let service = QuestService::from_config(
            &config,
            control.source(),
            backend,
            clock.clone() as Arc<dyn Clock>,
            events,
        )
        .expect("fixture should build");
        Self {
            service,
            control,
            clock,
        }
    }
}

/// Name of the active task, if any.
pub fn task_name(state: &TeamState) -> Option<&str> {
    match state {
        TeamState::Active { task, .. } => Some(task.name.as_str()),
        _ => None,
    }
}

/// Runs the `questline` binary to completion.
#[allow(clippy::missing_panics_doc)]
pub fn run_cli(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_questline"))
        .args(args)
        .env_remove("QUESTLINE_LOG_LEVEL")
        .output()
        .expect("failed to run questline")
}
