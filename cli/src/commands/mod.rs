//! CLI command implementations.

mod config;
mod run;

pub use config::{resolve_config, show_config, Overrides, Role};
pub use run::run_service;
