//! CLI module for docsync
//!
//! Provides command-line interface for:
//! - serve: load config, wire the engine and serve HTTP until ctrl-c
//! - check-config: validate a configuration file

mod args;
mod commands;
mod config;
mod errors;

pub use args::{Cli, Command};
pub use commands::{build_components, check_config, run, run_command, serve, Components};
pub use config::{Config, SessionSettings, SyncSettings, WatcherSettings};
pub use errors::{CliError, CliErrorCode, CliResult};
