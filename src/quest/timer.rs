//! Dwell-time policy and injectable clocks.
//!
//! The timer never blocks: callers ask whether a task may be left yet and
//! get a plain yes/no answer computed from an injected "now".

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ConfigError;
use crate::quest::catalog::Task;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock with millisecond resolution.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |ms| {
                Some(ms.saturating_add(delta))
            })
            .ok();
    }

    /// Sets the clock to `at`, which may lie in the past.
    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// How long a team must stay on a task before it may start the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerPolicy {
    /// Each task's own minimum dwell applies
    #[default]
    PerTask,
    /// Advancing is always allowed
    Disabled,
    /// One dwell for every task, ignoring per-task values
    Fixed(Duration),
}

impl TimerPolicy {
    /// Dwell that applies to `task` under this policy.
    #[must_use]
    pub const fn dwell_for(&self, task: &Task) -> Option<Duration> {
        match self {
            Self::PerTask => task.min_dwell,
            Self::Disabled => None,
            Self::Fixed(d) => Some(*d),
        }
    }

    /// Returns `true` once `task` started at `started_at` may be left.
    ///
    /// A start time in the future counts as zero elapsed time.
    #[must_use]
    pub fn can_advance(&self, task: &Task, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.dwell_for(task)
            .is_none_or(|dwell| elapsed(started_at, now) >= dwell)
    }

    /// Time left before `task` may be left, or `None` without a dwell.
    #[must_use]
    pub fn remaining(
        &self,
        task: &Task,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        self.dwell_for(task)
            .map(|dwell| dwell.saturating_sub(elapsed(started_at, now)))
    }
}

/// Non-negative time between `started_at` and `now`.
#[must_use]
pub fn elapsed(started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - started_at).to_std().unwrap_or_default()
}

/// Parses a human duration such as `"90s"`, `"5m"` or `"1h 30m"`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if the string is not a duration.
pub fn parse_duration(field: &str, s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s.trim()).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        value: s.to_string(),
        expected: format!("a duration like '30s' or '5m' ({e})"),
    })
}
