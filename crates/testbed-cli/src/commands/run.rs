//! Run command implementation.

use super::load_settings;
use anyhow::{Context, Result, bail};
use clap::Args;
use std::path::PathBuf;
use testbed_core::{AuxiliaryService, InstanceContext, LifecycleController, ProcessEntryPoint};
use tokio::signal;
use tracing::{info, warn};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Settings file (defaults to testbed.toml when present)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Service root directory (overrides the root directory variable)
    #[arg(long)]
    pub root_dir: Option<PathBuf>,

    /// Configuration override, KEY=VALUE
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub overrides: Vec<(String, String)>,

    /// Auxiliary service that needs its own port
    #[arg(long = "aux", value_name = "NAME")]
    pub auxiliary: Vec<String>,

    /// Service program; the generated config path is appended as its last argument
    #[arg(required = true, last = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Executes the run command.
pub async fn execute(args: RunArgs) -> Result<()> {
    let mut settings = load_settings(args.settings.as_deref())?;
    if let Some(root_dir) = args.root_dir {
        settings.root_dir = Some(root_dir);
    }

    let mut context = InstanceContext::new().with_overrides(args.overrides);
    for name in args.auxiliary {
        context = context.with_auxiliary_service(AuxiliaryService::new(name));
    }

    let Some((program, program_args)) = args.command.split_first() else {
        bail!("no service program given");
    };
    let entry = ProcessEntryPoint::new(program).args(program_args);

    let mut instance = LifecycleController::new(settings, context, entry);
    instance.start().await.context("failed to start service")?;

    if let Some(config) = instance.runtime_config() {
        println!("url:     {}", config.base_url());
        println!("config:  {}", config.conf_file().display());
        println!("storage: {}", config.storage_path().display());
        for (name, port) in config.auxiliary_ports() {
            println!("aux:     {name} on port {port}");
        }
    }

    shutdown_signal().await;
    info!("Shutdown signal received, stopping service");

    let report = instance.stop().await.context("failed to stop service")?;
    for warning in &report.warnings {
        warn!(path = %warning.path.display(), "left behind: {}", warning.error);
    }

    Ok(())
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
