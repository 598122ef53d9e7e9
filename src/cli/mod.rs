//! Command-line interface for onboard_forge.
//!
//! Collects and validates the two run inputs, loads configuration, wires the
//! real clients into the orchestrator and reports the outcome.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands, RunArgs};
