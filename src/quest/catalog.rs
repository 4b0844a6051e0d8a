//! Task catalogs and answer checking.
//!
//! A catalog is the immutable, ordered task list of one competition
//! variant. Answer checks are pure predicates over the submitted text.

use std::time::Duration;

use regex::{Regex, RegexBuilder};

use crate::config::schema::{AnswerSpec, TaskConfig};
use crate::error::ConfigError;
use crate::quest::timer::parse_duration;

/// What counts as a correct answer.
#[derive(Debug, Clone)]
pub enum AnswerRule {
    /// Equal to one of the accepted values after normalization
    Exact(Vec<String>),
    /// Whole normalized answer matches the pattern
    Pattern(Regex),
    /// Any well-formed answer is accepted
    Any,
}

/// Predicate deciding whether a submitted answer solves a task.
///
/// Answers are compared after trimming and collapsing inner whitespace;
/// comparison ignores case unless `case_sensitive` is set.
#[derive(Debug, Clone)]
pub struct AnswerChecker {
    rule: AnswerRule,
    case_sensitive: bool,
}

impl AnswerChecker {
    /// Accepts any of `values`.
    #[must_use]
    pub fn exact<I, S>(values: I, case_sensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accepted = values
            .into_iter()
            .map(|v| normalize(v.as_ref(), case_sensitive))
            .collect();
        Self {
            rule: AnswerRule::Exact(accepted),
            case_sensitive,
        }
    }

    /// Accepts answers fully matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] if the pattern does not compile.
    pub fn pattern(pattern: &str, case_sensitive: bool) -> Result<Self, regex::Error> {
        let anchored = format!("^(?:{pattern})$");
        let regex = RegexBuilder::new(&anchored)
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(Self {
            rule: AnswerRule::Pattern(regex),
            case_sensitive,
        })
    }

    /// Accepts every answer.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            rule: AnswerRule::Any,
            case_sensitive: false,
        }
    }

    /// Builds a checker from its configuration form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an uncompilable regex or an
    /// answer that accepts nothing.
    pub fn from_spec(field: &str, spec: &AnswerSpec, case_sensitive: bool) -> Result<Self, ConfigError> {
        match spec {
            AnswerSpec::Text(value) | AnswerSpec::Exact { exact: value } => {
                Ok(Self::exact([value], case_sensitive))
            }
            AnswerSpec::AnyOf { any_of } if !any_of.is_empty() => {
                Ok(Self::exact(any_of, case_sensitive))
            }
            AnswerSpec::AnyOf { .. } => Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: "[]".to_string(),
                expected: "at least one accepted answer".to_string(),
            }),
            AnswerSpec::Regex { regex } => {
                Self::pattern(regex, case_sensitive).map_err(|e| ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: regex.clone(),
                    expected: format!("a valid regular expression ({e})"),
                })
            }
            AnswerSpec::Any { any: true } => Ok(Self::any()),
            AnswerSpec::Any { any: false } => Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: "any: false".to_string(),
                expected: "'any: true' or a concrete answer".to_string(),
            }),
        }
    }

    /// Returns `true` if `answer` solves the task.
    #[must_use]
    pub fn check(&self, answer: &str) -> bool {
        match &self.rule {
            AnswerRule::Exact(accepted) => {
                let given = normalize(answer, self.case_sensitive);
                accepted.iter().any(|a| *a == given)
            }
            // Case folding is handled by the regex itself.
            AnswerRule::Pattern(regex) => regex.is_match(&normalize(answer, true)),
            AnswerRule::Any => true,
        }
    }

    /// Short name of the rule kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self.rule {
            AnswerRule::Exact(_) => "exact",
            AnswerRule::Pattern(_) => "regex",
            AnswerRule::Any => "any",
        }
    }
}

fn normalize(s: &str, case_sensitive: bool) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if case_sensitive {
        collapsed
    } else {
        collapsed.to_lowercase()
    }
}

/// One step of a quest.
#[derive(Debug, Clone)]
pub struct Task {
    /// Position in the catalog, contiguous from 0
    pub ordinal: usize,
    /// Display name
    pub name: String,
    /// Opaque prompt content shown to the team
    pub content: String,
    /// Answer predicate
    pub checker: AnswerChecker,
    /// Minimum time on the task before advancing; `None` advances at once
    pub min_dwell: Option<Duration>,
}

impl Task {
    /// Creates a task without a dwell. The ordinal is assigned by the catalog.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>, checker: AnswerChecker) -> Self {
        Self {
            ordinal: 0,
            name: name.into(),
            content: content.into(),
            checker,
            min_dwell: None,
        }
    }

    /// Sets the minimum dwell.
    #[must_use]
    pub const fn with_dwell(mut self, dwell: Duration) -> Self {
        self.min_dwell = Some(dwell);
        self
    }
}

/// Immutable, non-empty, ordered list of tasks.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    tasks: Vec<Task>,
}

impl TaskCatalog {
    /// Creates a catalog, numbering tasks from 0 in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `tasks` is empty.
    pub fn new(tasks: Vec<Task>) -> Result<Self, ConfigError> {
        if tasks.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tasks".to_string(),
                value: "[]".to_string(),
                expected: "at least one task".to_string(),
            });
        }
        let tasks = tasks
            .into_iter()
            .enumerate()
            .map(|(ordinal, task)| Task { ordinal, ..task })
            .collect();
        Ok(Self { tasks })
    }

    /// Builds a catalog from configured tasks. `prefix` locates the task
    /// list in error messages.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an empty list, a bad answer rule or an
    /// unparsable dwell.
    pub fn from_config(prefix: &str, tasks: &[TaskConfig]) -> Result<Self, ConfigError> {
        let mut built = Vec::with_capacity(tasks.len());
        for (i, cfg) in tasks.iter().enumerate() {
            let at = format!("{prefix}[{i}]");
            let checker =
                AnswerChecker::from_spec(&format!("{at}.answer"), &cfg.answer, cfg.case_sensitive)?;
            let mut task = Task::new(&cfg.name, &cfg.content, checker);
            if let Some(dwell) = &cfg.dwell {
                task.min_dwell = Some(parse_duration(&format!("{at}.dwell"), dwell)?);
            }
            built.push(task);
        }
        Self::new(built)
    }

    /// Returns the task at `index`, if any.
    #[must_use]
    pub fn task_at(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Checks `answer` against task `index`. Out-of-range indices never match.
    #[must_use]
    pub fn check(&self, index: usize, answer: &str) -> bool {
        self.task_at(index).is_some_and(|t| t.checker.check(answer))
    }

    /// Iterates tasks in order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}
