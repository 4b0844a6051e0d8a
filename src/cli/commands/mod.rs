//! CLI command dispatch and handlers.
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod inspect;
pub mod serve;
pub mod validate;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands};
use crate::error::QuestlineError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// `cancel` stops a running server.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), QuestlineError> {
    match cli.command {
        Commands::Serve(args) => serve::run(&args, cancel).await,
        Commands::Validate(args) => validate::run(&args),
        Commands::Inspect(args) => inspect::run(&args),
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
