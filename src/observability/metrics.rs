//! Metrics collection for `questline`.
//!
//! Prometheus-compatible counters and gauges. Every recording function is
//! a no-op until [`init_metrics`] installs a recorder.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::QuestlineError;
use crate::quest::gate::{CompetitionPhase, Variant};
use crate::quest::progress::AdvanceReason;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Error categories accepted as labels. Anything else becomes `"other"`.
const KNOWN_CATEGORIES: [&str; 6] = [
    "unknown_requester",
    "not_leader",
    "malformed_answer",
    "invariant",
    "storage",
    "phase_regression",
];

/// Maps an error category onto the fixed label set.
#[must_use]
pub fn sanitize_category_label(category: &str) -> &str {
    if KNOWN_CATEGORIES.contains(&category) {
        category
    } else {
        "other"
    }
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `QuestlineError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), QuestlineError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| QuestlineError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "questline_advances_total",
        "Task advances by variant and reason"
    );
    describe_counter!(
        "questline_answers_total",
        "Submitted answers by variant and result"
    );
    describe_counter!("questline_skips_total", "Skipped tasks by variant");
    describe_counter!(
        "questline_stopped_total",
        "Operations refused because the phase was closed"
    );
    describe_counter!(
        "questline_teams_completed_total",
        "Teams that finished a variant"
    );
    describe_counter!(
        "questline_errors_total",
        "Total number of errors by category"
    );
    describe_gauge!(
        "questline_competition_phase",
        "Current competition phase (0 = not started .. 3 = finished)"
    );
}

/// Records one task advance.
pub fn record_advance(variant: Variant, reason: AdvanceReason) {
    counter!(
        "questline_advances_total",
        "variant" => variant.as_str(),
        "reason" => reason.as_str(),
    )
    .increment(1);
}

/// Records a checked answer.
pub fn record_answer(variant: Variant, correct: bool) {
    let result = if correct { "correct" } else { "wrong" };
    counter!(
        "questline_answers_total",
        "variant" => variant.as_str(),
        "result" => result,
    )
    .increment(1);
}

/// Records a skipped task.
pub fn record_skip(variant: Variant) {
    counter!("questline_skips_total", "variant" => variant.as_str()).increment(1);
}

/// Records an operation refused by the phase gate.
pub fn record_stopped(phase: CompetitionPhase) {
    counter!("questline_stopped_total", "phase" => phase.as_str()).increment(1);
}

/// Records a team reaching the end of a catalog.
pub fn record_team_completed(variant: Variant) {
    counter!("questline_teams_completed_total", "variant" => variant.as_str()).increment(1);
}

/// Records an error by category.
pub fn record_error(category: &str) {
    counter!(
        "questline_errors_total",
        "category" => sanitize_category_label(category).to_owned()
    )
    .increment(1);
}

/// Sets the competition phase gauge.
pub fn set_competition_phase(phase: CompetitionPhase) {
    gauge!("questline_competition_phase").set(f64::from(phase as u8));
}
