//! CLI module for the reconciliation tool.
//!
//! This module provides the command-line interface for validating,
//! planning and applying manifests of file resources.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
