//! Configuration validation.
//!
//! Runs on the deserialized [`QuestConfig`] and collects every issue
//! instead of stopping at the first one, so an organizer can fix a
//! competition file in one pass.

use std::collections::{HashMap, HashSet};

use crate::config::loader::ConfigLimits;
use crate::config::schema::{
    AnswerSpec, QuestConfig, TaskConfig, TeamConfig, TimerConfig, VariantConfig,
};
use crate::error::{Severity, ValidationIssue};
use crate::quest::catalog::AnswerChecker;
use crate::quest::progress::TeamId;
use crate::quest::timer::parse_duration;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turns every warning into an error (strict mode).
    pub fn promote_warnings(&mut self) {
        for mut issue in self.warnings.drain(..) {
            issue.severity = Severity::Error;
            self.errors.push(issue);
        }
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &QuestConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        if config.competition.name.trim().is_empty() {
            self.add_error("competition.name", "competition name cannot be empty");
        }

        let variants = [
            ("variants.pilot", config.variants.pilot.as_ref()),
            ("variants.final", config.variants.final_round.as_ref()),
        ];
        if variants.iter().all(|(_, v)| v.is_none()) {
            self.add_error("variants", "at least one of 'pilot' or 'final' must be configured");
        }
        for (path, variant) in variants {
            if let Some(variant) = variant {
                self.validate_variant(path, variant, limits);
            }
        }

        self.validate_teams(&config.teams, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Variants
    // ========================================================================

    fn validate_variant(&mut self, path: &str, variant: &VariantConfig, limits: &ConfigLimits) {
        if let TimerConfig::Fixed { fixed } = &variant.timer {
            let field = format!("{path}.timer.fixed");
            if let Err(e) = parse_duration(&field, fixed) {
                self.add_error(&field, &e.to_string());
            }
        }

        if variant.max_skips == Some(0) {
            self.add_warning(
                &format!("{path}.max_skips"),
                "max_skips is 0, teams will never be able to skip",
            );
        }

        if variant.tasks.is_empty() {
            self.add_error(&format!("{path}.tasks"), "a variant needs at least one task");
        }
        if variant.tasks.len() > limits.max_tasks {
            self.add_error(
                &format!("{path}.tasks"),
                &format!(
                    "{} tasks exceed the limit of {}",
                    variant.tasks.len(),
                    limits.max_tasks
                ),
            );
        }

        let mut names = HashSet::new();
        for (i, task) in variant.tasks.iter().enumerate() {
            let at = format!("{path}.tasks[{i}]");
            if !task.name.trim().is_empty() && !names.insert(task.name.trim()) {
                self.add_error(
                    &format!("{at}.name"),
                    &format!("duplicate task name '{}'", task.name),
                );
            }
            self.validate_task(&at, task);
        }
    }

    fn validate_task(&mut self, at: &str, task: &TaskConfig) {
        if task.name.trim().is_empty() {
            self.add_error(&format!("{at}.name"), "task name cannot be empty");
        }

        let answer_field = format!("{at}.answer");
        if answer_is_blank(&task.answer) {
            self.add_error(&answer_field, "answer cannot be empty");
        } else if let Err(e) =
            AnswerChecker::from_spec(&answer_field, &task.answer, task.case_sensitive)
        {
            self.add_error(&answer_field, &e.to_string());
        }

        if let Some(dwell) = &task.dwell {
            let field = format!("{at}.dwell");
            if let Err(e) = parse_duration(&field, dwell) {
                self.add_error(&field, &e.to_string());
            }
        }
    }

    // ========================================================================
    // Teams
    // ========================================================================

    fn validate_teams(&mut self, teams: &[TeamConfig], limits: &ConfigLimits) {
        if teams.len() > limits.max_teams {
            self.add_error(
                "teams",
                &format!(
                    "{} teams exceed the limit of {}",
                    teams.len(),
                    limits.max_teams
                ),
            );
        }

        let mut ids = HashSet::new();
        let mut owner: HashMap<&str, &str> = HashMap::new();
        for (i, team) in teams.iter().enumerate() {
            let at = format!("teams[{i}]");
            if !TeamId::new(team.id.as_str()).is_storage_safe() {
                self.add_error(
                    &format!("{at}.id"),
                    &format!("team id '{}' must match [A-Za-z0-9_-]+", team.id),
                );
            }
            if !ids.insert(team.id.as_str()) {
                self.add_error(
                    &format!("{at}.id"),
                    &format!("duplicate team id '{}'", team.id),
                );
            }
            if team.leader.trim().is_empty() {
                self.add_error(&format!("{at}.leader"), "team leader cannot be empty");
            }

            let users = std::iter::once(&team.leader).chain(team.members.iter());
            let mut seen_here = HashSet::new();
            for user in users {
                if !seen_here.insert(user.as_str()) {
                    self.add_warning(
                        &format!("{at}.members"),
                        &format!("user '{user}' is listed twice in team '{}'", team.id),
                    );
                    continue;
                }
                if let Some(other) = owner.insert(user.as_str(), team.id.as_str()) {
                    self.add_error(
                        &format!("{at}.members"),
                        &format!(
                            "user '{user}' belongs to both '{other}' and '{}'",
                            team.id
                        ),
                    );
                }
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

fn answer_is_blank(answer: &AnswerSpec) -> bool {
    match answer {
        AnswerSpec::Text(s) | AnswerSpec::Exact { exact: s } => s.trim().is_empty(),
        AnswerSpec::AnyOf { any_of } => any_of.iter().any(|s| s.trim().is_empty()),
        AnswerSpec::Regex { .. } | AnswerSpec::Any { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> QuestConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn limits() -> ConfigLimits {
        ConfigLimits {
            max_tasks: 3,
            max_teams: 2,
            max_config_size: 1024 * 1024,
        }
    }

    fn messages(result: &ValidationResult) -> Vec<String> {
        result.errors.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_valid_config() {
        let config = parse(
            r"
competition: { name: Legends }
variants:
  pilot:
    timer: { fixed: 2m }
    tasks:
      - { name: A, answer: a }
      - { name: B, answer: { regex: '\d+' }, dwell: 30s }
teams:
  - { id: red, leader: alice, members: [bob] }
",
        );
        let result = Validator::new().validate(&config, &limits());
        assert!(result.is_valid(), "{:?}", messages(&result));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_collects_all_errors() {
        let config = parse(
            r#"
competition: { name: "" }
variants:
  final:
    timer: { fixed: soon }
    tasks:
      - { name: A, answer: "" }
      - { name: A, answer: { regex: "(" } }
      - { name: " ", answer: x, dwell: forever }
"#,
        );
        let result = Validator::new().validate(&config, &limits());
        let errors = messages(&result);
        assert!(errors.iter().any(|e| e.contains("competition.name")));
        assert!(errors.iter().any(|e| e.contains("variants.final.timer.fixed")));
        assert!(errors.iter().any(|e| e.contains("tasks[0].answer")));
        assert!(errors.iter().any(|e| e.contains("duplicate task name")));
        assert!(errors.iter().any(|e| e.contains("tasks[1].answer")));
        assert!(errors.iter().any(|e| e.contains("tasks[2].name")));
        assert!(errors.iter().any(|e| e.contains("tasks[2].dwell")));
    }

    #[test]
    fn test_requires_a_variant_with_tasks() {
        let config = parse("competition: { name: X }\nvariants: {}\n");
        assert!(Validator::new().validate(&config, &limits()).has_errors());

        let config = parse("competition: { name: X }\nvariants: { pilot: { tasks: [] } }\n");
        let result = Validator::new().validate(&config, &limits());
        assert!(messages(&result).iter().any(|e| e.contains("at least one task")));
    }

    #[test]
    fn test_limits() {
        let config = parse(
            r"
competition: { name: X }
variants:
  pilot:
    tasks: [{ name: A, answer: a }, { name: B, answer: b }, { name: C, answer: c }, { name: D, answer: d }]
teams:
  - { id: a, leader: u1 }
  - { id: b, leader: u2 }
  - { id: c, leader: u3 }
",
        );
        let errors = messages(&Validator::new().validate(&config, &limits()));
        assert!(errors.iter().any(|e| e.contains("4 tasks exceed")));
        assert!(errors.iter().any(|e| e.contains("3 teams exceed")));
    }

    #[test]
    fn test_team_rules() {
        let config = parse(
            r"
competition: { name: X }
variants: { pilot: { tasks: [{ name: A, answer: a }] } }
teams:
  - { id: red, leader: alice, members: [bob] }
  - { id: red, leader: carol, members: [bob] }
  - { id: '../x', leader: dave }
",
        );
        let result = Validator::new().validate(&config, &limits());
        let errors = messages(&result);
        assert!(errors.iter().any(|e| e.contains("duplicate team id 'red'")));
        assert!(errors.iter().any(|e| e.contains("user 'bob' belongs to both")));
        assert!(errors.iter().any(|e| e.contains("must match")));
    }

    #[test]
    fn test_zero_skips_warns_and_strict_promotes() {
        let config = parse(
            "competition: { name: X }\nvariants: { pilot: { max_skips: 0, tasks: [{ name: A, answer: a }] } }\n",
        );
        let mut result = Validator::new().validate(&config, &limits());
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);

        result.promote_warnings();
        assert!(result.has_errors());
        assert!(result.warnings.is_empty());
        assert_eq!(result.errors[0].severity, Severity::Error);
    }
}
