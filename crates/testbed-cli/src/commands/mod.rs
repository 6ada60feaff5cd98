//! CLI command implementations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use testbed_core::HarnessSettings;

pub mod probe;
pub mod run;

/// testbed - ephemeral service instances for integration tests
#[derive(Parser)]
#[command(name = "testbed")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start an instance, wait for Ctrl+C, then stop and clean up
    Run(run::RunArgs),

    /// Probe a service's health endpoint once
    Probe(probe::ProbeArgs),
}

/// Loads settings from an explicit file, or from `testbed.toml` and the
/// environment.
pub fn load_settings(path: Option<&Path>) -> Result<HarnessSettings> {
    match path {
        Some(path) => HarnessSettings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => HarnessSettings::load().context("failed to load settings"),
    }
}
