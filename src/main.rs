//! docsync entry point
//!
//! Parses arguments and dispatches through `cli::run`; errors go to stderr
//! and the process exits non-zero. All wiring lives in the CLI module.

use docsync::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
