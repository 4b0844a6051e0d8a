//! `serve` command.

use std::sync::Arc;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cli::args::ServeArgs;
use crate::config::loader::{ConfigLoader, LoaderOptions};
use crate::error::QuestlineError;
use crate::observability::events::{Event, EventEmitter};
use crate::quest::gate::PhaseGate;
use crate::quest::progress::{JsonDirBackend, MemoryBackend, ProgressBackend};
use crate::quest::service::{PhaseController, QuestService};
use crate::quest::timer::{Clock, SystemClock};
use crate::serve::{AppState, parse_bind_addr};

/// Start the quest server and run until `cancel` fires.
///
/// # Errors
///
/// Returns a config error if the competition file is invalid, a store error
/// if the state directory cannot be opened or read, or an I/O error if the
/// listener cannot bind.
pub async fn run(args: &ServeArgs, cancel: CancellationToken) -> Result<(), QuestlineError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    tracing::info!(config = %args.config.display(), "loading configuration");
    let loader = ConfigLoader::new(LoaderOptions {
        strict: args.strict,
        ..LoaderOptions::default()
    });
    let load_result = loader.load(&args.config)?;
    for warning in &load_result.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
    let config = load_result.config;

    let backend: Arc<dyn ProgressBackend> = if let Some(ref dir) = args.state_dir {
        tracing::info!(state_dir = %dir.display(), "persisting team progress");
        Arc::new(JsonDirBackend::open(dir.clone())?)
    } else {
        tracing::warn!("no --state-dir given; team progress will not survive a restart");
        Arc::new(MemoryBackend)
    };

    let events = Arc::new(if let Some(ref path) = args.events_file {
        EventEmitter::from_file(path)?
    } else {
        EventEmitter::stderr()
    });

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let control = Arc::new(PhaseController::new(
        Arc::new(PhaseGate::new(config.competition.phase)),
        Arc::clone(&clock),
        Arc::clone(&events),
    ));
    let service = QuestService::from_config(
        &config,
        control.source(),
        backend,
        clock,
        Arc::clone(&events),
    )?;
    let restored = service.preload()?;
    tracing::info!(
        competition = %config.competition.name,
        phase = %control.current(),
        restored,
        "competition ready"
    );

    let addr = parse_bind_addr(&args.bind)?;
    let listener = TcpListener::bind(addr).await?;
    events.emit(Event::ServerStarted {
        timestamp: Utc::now(),
        competition: config.competition.name.clone(),
        bind: listener.local_addr()?.to_string(),
    });

    let state = AppState {
        service: Arc::new(service),
        control,
    };
    let result = crate::serve::run(listener, state, cancel).await;

    events.emit(Event::ServerStopped {
        timestamp: Utc::now(),
        reason: match &result {
            Ok(()) => "shutdown".to_string(),
            Err(e) => e.to_string(),
        },
    });
    result.map_err(QuestlineError::from)
}
