//! Configuration module
//!
//! Loads and validates competition files: phases, messages, the task
//! catalogs of both rounds and the team roster.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions, load_config};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
