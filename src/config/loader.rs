//! Configuration loader.
//!
//! Pipeline:
//! 1. Size check and read, stripping a UTF-8 BOM
//! 2. Environment variable expansion on the raw text
//! 3. YAML parsing and deserialization to [`QuestConfig`]
//! 4. Validation, collecting every issue
//! 5. Freeze with `Arc`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::schema::QuestConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Options for the configuration loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Size limits.
    pub config_limits: ConfigLimits,

    /// Treat validation warnings as errors.
    pub strict: bool,
}

/// Limits that keep a configuration within sane bounds.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of tasks per variant.
    pub max_tasks: usize,

    /// Maximum number of teams.
    pub max_teams: usize,

    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_tasks: env_or("QUESTLINE_MAX_TASKS", 500),
            max_teams: env_or("QUESTLINE_MAX_TEAMS", 10_000),
            max_config_size: env_or("QUESTLINE_MAX_CONFIG_SIZE", 4 * 1024 * 1024),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<QuestConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(at) => write!(f, "{} ({at})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Configuration loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or too large, an environment
    /// reference cannot be resolved, the YAML is invalid, or validation
    /// reports errors.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        let limit = self.options.config_limits.max_config_size;
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if size > limit {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{size} bytes"),
                expected: format!("at most {limit} bytes"),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path, |name| std::env::var(name).ok())
    }

    /// Loads a configuration from text. `origin` is only used in messages.
    ///
    /// `lookup` resolves environment references.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn load_str(
        &self,
        raw: &str,
        origin: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<LoadResult, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let expanded = expand_env(raw, origin, lookup)?;

        let config: QuestConfig =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        let mut report = Validator::new().validate(&config, &self.options.config_limits);
        if self.options.strict {
            report.promote_warnings();
        }
        if report.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: report.errors,
            });
        }

        let warnings = report
            .warnings
            .into_iter()
            .map(|issue| LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

// ============================================================================
// Environment Expansion
// ============================================================================

/// Expands environment references in raw configuration text.
///
/// - `${VAR}` expands to the value; an unset variable is an error
/// - `${VAR:-default}` falls back to `default`
/// - `${VAR:?message}` fails with `message` when unset
/// - `$$` is a literal `$`
///
/// # Errors
///
/// Returns [`ConfigError::EnvVarNotSet`] for an unresolved reference and
/// [`ConfigError::ParseError`] for an unterminated one.
pub fn expand_env(
    raw: &str,
    origin: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(at) = rest.find('$') {
        out.push_str(&rest[..at]);
        let tail = &rest[at + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
            continue;
        }
        let Some(body_start) = tail.strip_prefix('{') else {
            out.push('$');
            rest = tail;
            continue;
        };

        let line = line_of(raw, raw.len() - rest.len() + at);
        let Some(close) = closing_brace(body_start) else {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: Some(line),
                message: "unterminated environment reference '${'".to_string(),
            });
        };
        let reference = Reference::parse(&body_start[..close]);
        let value = lookup(reference.name).or_else(|| reference.default.map(str::to_string));
        match (value, reference.required) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(message)) => {
                return Err(ConfigError::EnvVarNotSet {
                    var: reference.name.to_string(),
                    location: message.to_string(),
                });
            }
            (None, None) => {
                return Err(ConfigError::EnvVarNotSet {
                    var: reference.name.to_string(),
                    location: format!("{}:{line}", origin.display()),
                });
            }
        }
        rest = &body_start[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

struct Reference<'a> {
    name: &'a str,
    default: Option<&'a str>,
    required: Option<&'a str>,
}

impl<'a> Reference<'a> {
    fn parse(body: &'a str) -> Self {
        if let Some((name, default)) = body.split_once(":-") {
            return Self {
                name,
                default: Some(default),
                required: None,
            };
        }
        if let Some((name, message)) = body.split_once(":?") {
            return Self {
                name,
                default: None,
                required: Some(message),
            };
        }
        Self {
            name: body,
            default: None,
            required: None,
        }
    }
}

/// Byte offset of the `}` closing a reference, allowing nested braces in
/// defaults.
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

// ============================================================================
// Helpers
// ============================================================================

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Convenience wrapper: load `path` with default options.
///
/// # Errors
///
/// See [`ConfigLoader::load`].
pub fn load_config(path: impl Into<PathBuf>) -> Result<LoadResult, ConfigError> {
    ConfigLoader::default().load(&path.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r"
competition:
  name: Legends
variants:
  pilot:
    tasks:
      - name: Gate
        answer: bauman
";

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env(name: &str) -> Option<String> {
        match name {
            "QUEST_NAME" => Some("Legends 2026".to_string()),
            "GATE_ANSWER" => Some("bauman".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_plain_and_escape() {
        let out = expand_env("name: ${QUEST_NAME} costs $$5", Path::new("q.yaml"), env).unwrap();
        assert_eq!(out, "name: Legends 2026 costs $5");
    }

    #[test]
    fn test_expand_default() {
        let out = expand_env("a: ${MISSING:-{x}}", Path::new("q.yaml"), no_env).unwrap();
        assert_eq!(out, "a: {x}");
        let out = expand_env("a: ${QUEST_NAME:-fallback}", Path::new("q.yaml"), env).unwrap();
        assert_eq!(out, "a: Legends 2026");
    }

    #[test]
    fn test_expand_required_message() {
        let err = expand_env("a: ${SECRET:?set the secret}", Path::new("q.yaml"), no_env)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvVarNotSet { ref var, ref location } if var == "SECRET" && location == "set the secret"
        ));
    }

    #[test]
    fn test_expand_unset_reports_line() {
        let err = expand_env("a: 1\nb: ${NOPE}\n", Path::new("q.yaml"), no_env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvVarNotSet { ref location, .. } if location == "q.yaml:2"
        ));
    }

    #[test]
    fn test_expand_unterminated() {
        let err = expand_env("a: ${OPEN", Path::new("q.yaml"), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { line: Some(1), .. }));
    }

    #[test]
    fn test_lone_dollar_is_kept() {
        let out = expand_env("price: 5$ and $HOME", Path::new("q.yaml"), no_env).unwrap();
        assert_eq!(out, "price: 5$ and $HOME");
    }

    #[test]
    fn test_load_str_minimal() {
        let result = ConfigLoader::default()
            .load_str(MINIMAL, Path::new("q.yaml"), no_env)
            .unwrap();
        assert_eq!(result.config.competition.name, "Legends");
    }

    #[test]
    fn test_load_str_with_bom_and_env() {
        let text = "\u{feff}competition: { name: \"${QUEST_NAME}\" }\nvariants:\n  pilot:\n    tasks: [{ name: A, answer: \"${GATE_ANSWER}\" }]\n";
        let result = ConfigLoader::default()
            .load_str(text, Path::new("q.yaml"), env)
            .unwrap();
        assert_eq!(result.config.competition.name, "Legends 2026");
    }

    #[test]
    fn test_parse_error_has_line() {
        let err = ConfigLoader::default()
            .load_str("competition:\n  name: [unclosed\n", Path::new("q.yaml"), no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { line: Some(_), .. }));
    }

    #[test]
    fn test_yaml_failure_exits_as_config_error() {
        let err = ConfigLoader::default()
            .load_str("variants: [pilot\n", Path::new("q.yaml"), no_env)
            .unwrap_err();
        let err = crate::error::QuestlineError::from(err);
        assert!(matches!(err, crate::error::QuestlineError::Config(_)));
        assert_eq!(err.exit_code(), crate::error::ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_validation_failure() {
        let text = "competition: { name: X }\nvariants: {}\n";
        let err = ConfigLoader::default()
            .load_str(text, Path::new("q.yaml"), no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_strict_promotes_warnings() {
        let text = format!("{MINIMAL}    max_skips: 0\n");
        let lenient = ConfigLoader::default()
            .load_str(&text, Path::new("q.yaml"), no_env)
            .unwrap();
        assert_eq!(lenient.warnings.len(), 1);

        let strict = ConfigLoader::new(LoaderOptions {
            strict: true,
            ..LoaderOptions::default()
        });
        assert!(strict.load_str(&text, Path::new("q.yaml"), no_env).is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let result = load_config(file.path()).unwrap();
        assert!(result.config.variants.pilot.is_some());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/quest.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn test_size_limit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let loader = ConfigLoader::new(LoaderOptions {
            config_limits: ConfigLimits {
                max_config_size: 10,
                ..ConfigLimits::default()
            },
            strict: false,
        });
        let err = loader.load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "file_size"));
    }
}
