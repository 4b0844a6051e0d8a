//! Configuration schema types.
//!
//! These types are deserialized from the YAML competition file. They are
//! plain data; [`crate::config::validation`] checks them and
//! [`crate::quest::service::QuestService::from_config`] turns them into
//! engines.

use serde::{Deserialize, Serialize};

use crate::quest::gate::CompetitionPhase;

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root of a competition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestConfig {
    /// Competition metadata
    pub competition: CompetitionConfig,

    /// Texts shown while a variant is closed
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Pilot and final rounds
    pub variants: VariantsConfig,

    /// Team roster
    #[serde(default)]
    pub teams: Vec<TeamConfig>,
}

/// Competition metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompetitionConfig {
    /// Display name
    pub name: String,

    /// Phase in effect at startup
    #[serde(default)]
    pub phase: CompetitionPhase,
}

// ============================================================================
// Messages
// ============================================================================

/// Phase messages for status queries and start requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessagesConfig {
    /// Used by current-task queries and refused answers or skips
    #[serde(default)]
    pub status: StatusMessages,

    /// Used by start requests; missing entries fall back to `status`
    #[serde(default)]
    pub start: StartMessages,
}

/// Messages reported with `Stopped` outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusMessages {
    /// Before the competition starts
    #[serde(default = "default_not_started")]
    pub not_started: String,

    /// After the competition ends
    #[serde(default = "default_finished")]
    pub finished: String,

    /// The phase is open but its variant is not configured
    #[serde(default = "default_unavailable")]
    pub unavailable: String,

    /// The team has already finished every task of the round
    #[serde(default = "default_completed")]
    pub completed: String,
}

impl Default for StatusMessages {
    fn default() -> Self {
        Self {
            not_started: default_not_started(),
            finished: default_finished(),
            unavailable: default_unavailable(),
            completed: default_completed(),
        }
    }
}

fn default_not_started() -> String {
    "The quest has not started yet.".to_string()
}

fn default_finished() -> String {
    "The quest is over. Thank you for playing!".to_string()
}

fn default_unavailable() -> String {
    "This round is not available right now.".to_string()
}

fn default_completed() -> String {
    "Your team has already completed every task.".to_string()
}

/// Overrides for start requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartMessages {
    /// Before the competition starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_started: Option<String>,

    /// After the competition ends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<String>,

    /// The phase is open but its variant is not configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,

    /// The team has already finished every task of the round
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
}

// ============================================================================
// Variants
// ============================================================================

/// The two competition rounds. At least one must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantsConfig {
    /// Warm-up round
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pilot: Option<VariantConfig>,

    /// Main round
    #[serde(default, rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_round: Option<VariantConfig>,
}

/// One round's rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    /// Dwell policy
    #[serde(default)]
    pub timer: TimerConfig,

    /// Skip budget per team; unlimited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_skips: Option<u32>,

    /// Ordered tasks
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Dwell policy.
///
/// Either the keyword `per_task` / `disabled` or `{ fixed: "5m" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimerConfig {
    /// Keyword form
    Mode(TimerMode),
    /// One dwell for every task
    Fixed {
        /// Duration string, humantime syntax
        fixed: String,
    },
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::Mode(TimerMode::PerTask)
    }
}

/// Keyword dwell policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// Each task's own `dwell`
    PerTask,
    /// No dwell at all
    Disabled,
}

/// One task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Display name, unique within the variant
    pub name: String,

    /// Prompt shown to the team
    #[serde(default)]
    pub content: String,

    /// Accepted answer
    pub answer: AnswerSpec,

    /// Compare answers case-sensitively
    #[serde(default)]
    pub case_sensitive: bool,

    /// Minimum time on the task, humantime syntax
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwell: Option<String>,
}

/// Accepted answer forms.
///
/// A bare string is shorthand for `{ exact: ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerSpec {
    /// Shorthand exact answer
    Text(String),
    /// One accepted answer
    Exact {
        /// Expected text
        exact: String,
    },
    /// Several accepted answers
    AnyOf {
        /// Expected texts
        any_of: Vec<String>,
    },
    /// Regular expression matched against the whole answer
    Regex {
        /// Pattern
        regex: String,
    },
    /// Accept every answer
    Any {
        /// Must be `true`
        any: bool,
    },
}

// ============================================================================
// Teams
// ============================================================================

/// One team.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamConfig {
    /// Team identifier, `[A-Za-z0-9_-]+`
    pub id: String,

    /// Captain; the only member allowed to start or skip tasks
    pub leader: String,

    /// Other members
    #[serde(default)]
    pub members: Vec<String>,
}
