//! Per-team progress records and their store.
//!
//! Every team owns one [`TeamProgress`] per variant, guarded by its own
//! mutex so teams never contend with each other. Storage I/O happens
//! outside the team's critical section: records are fetched before the
//! lock is taken and persisted after it is released.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{InvariantViolation, StoreError};
use crate::observability::metrics;
use crate::quest::gate::Variant;

// ============================================================================
// Record Types
// ============================================================================

/// Team identifier, used as the progress key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(String);

impl TeamId {
    /// Creates a team id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id only uses `[A-Za-z0-9_-]` and is not empty.
    #[must_use]
    pub fn is_storage_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TeamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Why a team moved to the next position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceReason {
    /// First task opened
    Start,
    /// Leader moved on after the dwell elapsed
    Timer,
    /// Correct answer
    Answer,
    /// Task skipped
    Skip,
}

impl AdvanceReason {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Timer => "timer",
            Self::Answer => "answer",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for AdvanceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task the team has left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task ordinal
    pub ordinal: usize,
    /// How the task was left
    pub outcome: AdvanceReason,
    /// When the task was opened
    pub started_at: DateTime<Utc>,
    /// When the task was left
    pub finished_at: DateTime<Utc>,
}

/// Mutable progression record of one team in one variant.
///
/// `current_index` is `-1` before the first task and equals the catalog
/// length once the team is done.
///
/// There is no skip counter for the current task: a skip always leaves the
/// task, so that counter would only ever read zero. Per-task skips are the
/// `history` entries with outcome [`AdvanceReason::Skip`]; `skips_used`
/// is their total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamProgress {
    /// Index of the current task
    pub current_index: i64,
    /// When the current task was opened
    pub started_at: Option<DateTime<Utc>>,
    /// Set once the last task has been left
    pub completed: bool,
    /// Skips spent from the variant budget
    pub skips_used: u32,
    /// Left tasks, oldest first
    #[serde(default)]
    pub history: Vec<TaskRecord>,
    /// Bumped on every change; used to drop stale writes
    #[serde(default)]
    pub version: u64,
}

impl Default for TeamProgress {
    fn default() -> Self {
        Self {
            current_index: -1,
            started_at: None,
            completed: false,
            skips_used: 0,
            history: Vec::new(),
            version: 0,
        }
    }
}

/// Where a team stands in a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// No task opened yet
    NotStarted,
    /// Working on task `index` since `started_at`
    Active {
        /// Current task index
        index: usize,
        /// When the task was opened
        started_at: DateTime<Utc>,
    },
    /// Every task has been left
    Completed,
}

/// Result of moving a team forward by one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Index before the step
    pub from: i64,
    /// Index after the step
    pub to: i64,
    /// Whether the step finished the catalog
    pub completed: bool,
}

impl TeamProgress {
    /// Interprets the record against a catalog of `len` tasks.
    ///
    /// # Errors
    ///
    /// Returns an [`InvariantViolation`] if the record is inconsistent.
    pub fn position(&self, team: &TeamId, len: usize) -> Result<Position, InvariantViolation> {
        let len_i = i64::try_from(len).unwrap_or(i64::MAX);
        if self.current_index < -1 || self.current_index > len_i {
            return Err(InvariantViolation::IndexOutOfBounds {
                team: team.clone(),
                index: self.current_index,
                len,
            });
        }
        if self.completed != (self.current_index == len_i) {
            return Err(InvariantViolation::CompletionMismatch {
                team: team.clone(),
                index: self.current_index,
                completed: self.completed,
            });
        }
        if self.current_index == -1 {
            return Ok(Position::NotStarted);
        }
        if self.completed {
            return Ok(Position::Completed);
        }
        let index = usize::try_from(self.current_index).unwrap_or_default();
        self.started_at
            .map(|started_at| Position::Active { index, started_at })
            .ok_or_else(|| InvariantViolation::MissingStartTime {
                team: team.clone(),
                index,
            })
    }

    /// Verifies the skip counter against the budget.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::SkipBudgetExceeded`] if more skips were
    /// recorded than `max` allows.
    pub fn check_skips(&self, team: &TeamId, max: Option<u32>) -> Result<(), InvariantViolation> {
        match max {
            Some(max) if self.skips_used > max => Err(InvariantViolation::SkipBudgetExceeded {
                team: team.clone(),
                used: self.skips_used,
                max,
            }),
            _ => Ok(()),
        }
    }

    /// Moves exactly one position forward.
    ///
    /// The caller must have validated the record with [`Self::position`]
    /// and made sure the team is not completed.
    pub fn step(&mut self, len: usize, reason: AdvanceReason, now: DateTime<Utc>) -> Step {
        let from = self.current_index;
        if let (Ok(ordinal), Some(started_at)) = (usize::try_from(from), self.started_at) {
            self.history.push(TaskRecord {
                ordinal,
                outcome: reason,
                started_at,
                finished_at: now,
            });
        }
        if reason == AdvanceReason::Skip {
            self.skips_used = self.skips_used.saturating_add(1);
        }
        self.current_index = from + 1;
        self.started_at = Some(now);
        self.completed = usize::try_from(self.current_index).is_ok_and(|i| i == len);
        self.version = self.version.saturating_add(1);
        Step {
            from,
            to: self.current_index,
            completed: self.completed,
        }
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Storage hooks for team progress.
///
/// The record shape is fixed; backends only decide where it lives.
pub trait ProgressBackend: Send + Sync {
    /// Loads a stored record, `None` if the team has none yet.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the record exists but cannot be read.
    fn fetch(&self, variant: Variant, team: &TeamId) -> Result<Option<TeamProgress>, StoreError>;

    /// Stores a record. Older versions than the last stored one are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the record cannot be written.
    fn persist(
        &self,
        variant: Variant,
        team: &TeamId,
        progress: &TeamProgress,
    ) -> Result<(), StoreError>;

    /// Loads every stored record of a variant.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if any record cannot be read.
    fn fetch_all(&self, variant: Variant) -> Result<Vec<(TeamId, TeamProgress)>, StoreError>;
}

/// Backend that keeps nothing; progress lives only in the store's memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackend;

impl ProgressBackend for MemoryBackend {
    fn fetch(&self, _: Variant, _: &TeamId) -> Result<Option<TeamProgress>, StoreError> {
        Ok(None)
    }

    fn persist(&self, _: Variant, _: &TeamId, _: &TeamProgress) -> Result<(), StoreError> {
        Ok(())
    }

    fn fetch_all(&self, _: Variant) -> Result<Vec<(TeamId, TeamProgress)>, StoreError> {
        Ok(Vec::new())
    }
}

/// One pretty-printed JSON file per team under `<root>/<variant>/`.
///
/// Writes go to a temporary file that is then renamed over the target.
#[derive(Debug)]
pub struct JsonDirBackend {
    root: PathBuf,
    /// Last version written per file; serializes writers of the same file
    written: DashMap<PathBuf, Arc<Mutex<u64>>>,
}

impl JsonDirBackend {
    /// Opens (and creates if needed) a state directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for variant in [Variant::Pilot, Variant::Final] {
            let dir = root.join(variant.as_str());
            fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })?;
        }
        Ok(Self {
            root,
            written: DashMap::new(),
        })
    }

    /// State directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, variant: Variant, team: &TeamId) -> Result<PathBuf, StoreError> {
        if !team.is_storage_safe() {
            return Err(StoreError::InvalidKey(team.to_string()));
        }
        Ok(self
            .root
            .join(variant.as_str())
            .join(format!("{}.json", team.as_str())))
    }

    fn read(path: &Path) -> Result<Option<TeamProgress>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }
}

impl ProgressBackend for JsonDirBackend {
    fn fetch(&self, variant: Variant, team: &TeamId) -> Result<Option<TeamProgress>, StoreError> {
        Self::read(&self.path_for(variant, team)?)
    }

    fn persist(
        &self,
        variant: Variant,
        team: &TeamId,
        progress: &TeamProgress,
    ) -> Result<(), StoreError> {
        let path = self.path_for(variant, team)?;
        let slot = Arc::clone(
            self.written
                .entry(path.clone())
                .or_insert_with(|| Arc::new(Mutex::new(0)))
                .value(),
        );
        let mut last = slot.lock().expect("progress file lock poisoned");
        if progress.version <= *last {
            debug!(
                team = %team,
                version = progress.version,
                stored = *last,
                "skipping stale progress write"
            );
            return Ok(());
        }

        let body = serde_json::to_vec_pretty(progress).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        *last = progress.version;
        Ok(())
    }

    fn fetch_all(&self, variant: Variant) -> Result<Vec<(TeamId, TeamProgress)>, StoreError> {
        let dir = self.root.join(variant.as_str());
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(progress) = Self::read(&path)? {
                records.push((TeamId::new(stem), progress));
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}

// ============================================================================
// Store
// ============================================================================

/// In-memory progress of every team in one variant, backed by a
/// [`ProgressBackend`].
pub struct TeamProgressStore {
    variant: Variant,
    teams: DashMap<TeamId, Arc<Mutex<TeamProgress>>>,
    backend: Arc<dyn ProgressBackend>,
}

impl TeamProgressStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(variant: Variant, backend: Arc<dyn ProgressBackend>) -> Self {
        Self {
            variant,
            teams: DashMap::new(),
            backend,
        }
    }

    /// Variant this store belongs to.
    #[must_use]
    pub const fn variant(&self) -> Variant {
        self.variant
    }

    /// Loads every record the backend holds. Returns how many were loaded.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend cannot be read.
    pub fn preload(&self) -> Result<usize, StoreError> {
        let records = self.backend.fetch_all(self.variant)?;
        let count = records.len();
        for (team, progress) in records {
            self.teams
                .entry(team)
                .or_insert_with(|| Arc::new(Mutex::new(progress)));
        }
        Ok(count)
    }

    /// Returns a copy of the team's record, or the default record if the
    /// team has none. Never creates an entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend cannot be read.
    ///
    /// # Panics
    ///
    /// Panics if the team's mutex is poisoned.
    pub fn load(&self, team: &TeamId) -> Result<TeamProgress, StoreError> {
        let cached = self.teams.get(team).map(|slot| Arc::clone(slot.value()));
        if let Some(slot) = cached {
            return Ok(slot.lock().expect("team progress lock poisoned").clone());
        }
        Ok(self
            .backend
            .fetch(self.variant, team)?
            .unwrap_or_default())
    }

    /// Replaces the team's record and persists it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend rejects the record.
    ///
    /// # Panics
    ///
    /// Panics if the team's mutex is poisoned.
    pub fn save(&self, team: &TeamId, mut progress: TeamProgress) -> Result<(), StoreError> {
        let slot = self.slot(team)?;
        let snapshot = {
            let mut guard = slot.lock().expect("team progress lock poisoned");
            progress.version = guard.version.saturating_add(1);
            *guard = progress;
            guard.clone()
        };
        self.backend.persist(self.variant, team, &snapshot)
    }

    /// Runs `f` with exclusive access to the team's record.
    ///
    /// Only one closure runs per team at a time; other teams are not
    /// affected. If `f` changed the record (bumped its version), the new
    /// record is persisted after the lock is released. A failed persist is
    /// logged and counted but does not undo the change.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or a [`StoreError`] if the record
    /// could not be fetched.
    ///
    /// # Panics
    ///
    /// Panics if the team's mutex is poisoned.
    pub fn with_team<T, E>(
        &self,
        team: &TeamId,
        f: impl FnOnce(&mut TeamProgress) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let slot = self.slot(team)?;
        let (result, changed) = {
            let mut guard = slot.lock().expect("team progress lock poisoned");
            let before = guard.version;
            let result = f(&mut guard);
            let changed = (guard.version != before).then(|| guard.clone());
            (result, changed)
        };

        if let Some(snapshot) = changed {
            if let Err(e) = self.backend.persist(self.variant, team, &snapshot) {
                error!(
                    variant = %self.variant,
                    team = %team,
                    error = %e,
                    "failed to persist team progress"
                );
                metrics::record_error("storage");
            }
        }
        result
    }

    /// Copies every known record, sorted by team id.
    ///
    /// # Panics
    ///
    /// Panics if a team's mutex is poisoned.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<(TeamId, TeamProgress)> {
        let slots: Vec<(TeamId, Arc<Mutex<TeamProgress>>)> = self
            .teams
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        let mut records: Vec<_> = slots
            .into_iter()
            .map(|(team, slot)| {
                let progress = slot.lock().expect("team progress lock poisoned").clone();
                (team, progress)
            })
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    fn slot(&self, team: &TeamId) -> Result<Arc<Mutex<TeamProgress>>, StoreError> {
        let cached = self.teams.get(team).map(|slot| Arc::clone(slot.value()));
        if let Some(slot) = cached {
            return Ok(slot);
        }
        let loaded = self
            .backend
            .fetch(self.variant, team)?
            .unwrap_or_default();
        Ok(Arc::clone(
            self.teams
                .entry(team.clone())
                .or_insert_with(|| Arc::new(Mutex::new(loaded)))
                .value(),
        ))
    }
}

impl fmt::Debug for TeamProgressStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamProgressStore")
            .field("variant", &self.variant)
            .field("teams", &self.teams.len())
            .finish_non_exhaustive()
    }
}
