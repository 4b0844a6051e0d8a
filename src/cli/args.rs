//! CLI argument definitions.
//!
//! All Clap derive structs for `questline` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Progression engine for live, phase-gated team quests.
#[derive(Parser, Debug)]
#[command(name = "questline", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "QUESTLINE_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true, env = "QUESTLINE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the quest server.
    Serve(ServeArgs),

    /// Validate competition files without starting the server.
    Validate(ValidateArgs),

    /// Print the catalogs and roster of a competition file.
    Inspect(InspectArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to the competition file.
    #[arg(short, long, env = "QUESTLINE_CONFIG")]
    pub config: PathBuf,

    /// Listen on `[host:]port`.
    #[arg(long, default_value = "127.0.0.1:8080", env = "QUESTLINE_BIND")]
    pub bind: String,

    /// Directory for team progress; in-memory only when absent.
    #[arg(long, env = "QUESTLINE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "QUESTLINE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Append JSONL events to this file instead of stderr.
    #[arg(long, env = "QUESTLINE_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Treat configuration warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Competition files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `inspect`.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Competition file.
    pub config: PathBuf,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["questline", "serve", "--config", "quest.yaml"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind, "127.0.0.1:8080");
        assert!(args.state_dir.is_none());
        assert!(!args.strict);
        assert_eq!(cli.log_format, LogFormat::Human);
    }

    #[test]
    fn test_validate_requires_files() {
        assert!(Cli::try_parse_from(["questline", "validate"]).is_err());
        let cli = Cli::try_parse_from(["questline", "validate", "a.yaml", "b.yaml", "--strict"])
            .unwrap();
        let Commands::Validate(args) = cli.command else {
            panic!("expected validate");
        };
        assert_eq!(args.files.len(), 2);
        assert!(args.strict);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "questline",
            "inspect",
            "quest.yaml",
            "-vv",
            "--log-format",
            "json",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Inspect(args) = cli.command else {
            panic!("expected inspect");
        };
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_help_output() {
        let err = Cli::try_parse_from(["questline", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_output() {
        let err = Cli::try_parse_from(["questline", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
