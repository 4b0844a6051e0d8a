//! `inspect` command.
//!
//! Shows what a competition file will run: the initial phase, each
//! variant's catalog and the size of the roster.

use serde::Serialize;

use crate::cli::args::{InspectArgs, OutputFormat};
use crate::config::loader::{ConfigLoader, LoaderOptions};
use crate::config::schema::QuestConfig;
use crate::error::{ConfigError, QuestlineError};
use crate::quest::directory::RosterDirectory;
use crate::quest::gate::{CompetitionPhase, Variant};
use crate::quest::service::configuration_from;
use crate::quest::timer::TimerPolicy;

/// Summary of a competition file.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Competition name
    pub competition: String,
    /// Phase at startup
    pub phase: CompetitionPhase,
    /// Configured variants
    pub variants: Vec<VariantReport>,
    /// Number of teams
    pub teams: usize,
    /// Number of distinct users
    pub users: usize,
}

/// One variant's catalog.
#[derive(Debug, Serialize)]
pub struct VariantReport {
    /// Variant
    pub variant: Variant,
    /// Timer policy, e.g. `per_task`
    pub timer: String,
    /// Skip budget; absent means unlimited
    pub max_skips: Option<u32>,
    /// Tasks in order
    pub tasks: Vec<TaskReport>,
}

/// One task as the engine will see it.
#[derive(Debug, Serialize)]
pub struct TaskReport {
    /// Ordinal
    pub ordinal: usize,
    /// Display name
    pub name: String,
    /// Effective dwell in seconds under the variant's timer
    pub dwell_secs: Option<u64>,
    /// Answer rule kind
    pub answer: &'static str,
}

/// Print a summary of a competition file.
///
/// # Errors
///
/// Returns a config error if the file cannot be loaded.
pub fn run(args: &InspectArgs) -> Result<(), QuestlineError> {
    let load_result = ConfigLoader::new(LoaderOptions::default()).load(&args.config)?;
    let report = report(&load_result.config)?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Human => print_human(&report),
    }
    Ok(())
}

/// Builds the summary of a validated configuration.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a variant cannot be built.
pub fn report(config: &QuestConfig) -> Result<InspectReport, ConfigError> {
    let mut variants = Vec::new();
    let configured = [
        (Variant::Pilot, config.variants.pilot.as_ref()),
        (Variant::Final, config.variants.final_round.as_ref()),
    ];
    for (variant, cfg) in configured {
        let Some(cfg) = cfg else { continue };
        let configuration = configuration_from(variant, cfg)?;
        let timer = &configuration.timer;
        let tasks = configuration
            .catalog
            .iter()
            .map(|task| TaskReport {
                ordinal: task.ordinal,
                name: task.name.clone(),
                dwell_secs: timer.dwell_for(task).map(|d| d.as_secs()),
                answer: task.checker.kind(),
            })
            .collect();
        variants.push(VariantReport {
            variant,
            timer: timer_label(timer),
            max_skips: configuration.max_skips,
            tasks,
        });
    }

    let roster = RosterDirectory::from_config(&config.teams);
    Ok(InspectReport {
        competition: config.competition.name.clone(),
        phase: config.competition.phase,
        variants,
        teams: roster.team_count(),
        users: roster.user_count(),
    })
}

fn timer_label(timer: &TimerPolicy) -> String {
    match timer {
        TimerPolicy::PerTask => "per_task".to_string(),
        TimerPolicy::Disabled => "disabled".to_string(),
        TimerPolicy::Fixed(d) => format!("fixed {}", humantime::format_duration(*d)),
    }
}

fn print_human(report: &InspectReport) {
    println!("{} (starts in phase {})", report.competition, report.phase);
    for variant in &report.variants {
        let skips = variant
            .max_skips
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string());
        println!();
        println!(
            "{}: {} task(s), timer {}, skips {skips}",
            variant.variant,
            variant.tasks.len(),
            variant.timer
        );
        for task in &variant.tasks {
            let dwell = task
                .dwell_secs
                .map_or_else(|| "-".to_string(), |s| format!("{s}s"));
            println!("  {:>3}  {:<24} dwell {dwell:<6} answer {}", task.ordinal, task.name, task.answer);
        }
    }
    println!();
    println!("roster: {} team(s), {} user(s)", report.teams, report.users);
}
