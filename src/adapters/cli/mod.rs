//! CLI Adapter
//!
//! Command-line interface for the whale tracker.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    parse_period, CliApp, Command, HistoryCmd, OutputFormat, RunCmd, SnapshotCmd, StatusCmd,
    TrendCmd, DEFAULT_CONFIG_PATH,
};

/// Initialize the CLI application
pub fn init() -> CliApp {
    use clap::Parser;
    CliApp::parse()
}
