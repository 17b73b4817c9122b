//! CLI argument definitions using clap
//!
//! Commands:
//! - docsync serve --config <path> [--port <port>]
//! - docsync check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docsync - collaborative document synchronization server
#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP sync server
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./docsync.json")]
        config: PathBuf,

        /// Override the configured HTTP port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load and validate a configuration file, then exit
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./docsync.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
