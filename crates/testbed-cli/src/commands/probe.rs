//! Probe command implementation.

use super::load_settings;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use testbed_core::{HealthProbe, VersionEndpointProbe};

/// Arguments for the probe command.
#[derive(Args)]
pub struct ProbeArgs {
    /// Service host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Service port
    #[arg(long)]
    pub port: u16,

    /// Settings file (defaults to testbed.toml when present)
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

/// Executes the probe command. Exits with status 1 when unhealthy.
pub async fn execute(args: ProbeArgs) -> Result<()> {
    let settings = load_settings(args.settings.as_deref())?;
    let readiness = &settings.readiness;

    let probe = VersionEndpointProbe::new(args.host, args.port, &readiness.health_path)
        .with_request_timeout(readiness.request_timeout());

    if probe.probe().await.is_healthy() {
        println!("{} healthy", probe.url());
        Ok(())
    } else {
        println!("{} unhealthy", probe.url());
        std::process::exit(1);
    }
}
