//! Test harness for E2E tests.
//!
//! The harness owns a service root and a scratch directory and hands out
//! settings with short timings, so failures surface in seconds.

use crate::fixtures::ServiceRoot;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;
use testbed_core::{
    HarnessSettings, HealthProbe, HealthProbeResult, InstanceContext, LifecycleController,
    PortRange, RuntimeConfig, ServiceEntryPoint, VersionEndpointProbe,
};

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "off".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Test harness for E2E tests.
pub struct TestHarness {
    root: ServiceRoot,
    scratch: TempDir,
    settings: HarnessSettings,
}

impl TestHarness {
    /// Creates a harness whose instances draw ports from `ports`.
    pub fn new(ports: PortRange) -> Result<Self> {
        Self::with_root(ServiceRoot::new()?, ports)
    }

    /// Creates a harness over an existing service root.
    pub fn with_root(root: ServiceRoot, ports: PortRange) -> Result<Self> {
        init_tracing();

        let scratch = TempDir::new().context("failed to create scratch directory")?;
        let mut settings = HarnessSettings {
            root_dir: Some(root.path().to_path_buf()),
            ..HarnessSettings::default()
        };
        settings.ports.service = ports;
        settings.ports.auxiliary = PortRange::new(ports.end + 1, ports.end + 100);
        settings.scratch.base_dir = scratch.path().to_path_buf();
        settings.readiness.poll_interval_ms = 25;
        settings.readiness.startup_timeout_secs = 10;
        settings.readiness.shutdown_timeout_secs = 5;
        settings.readiness.request_timeout_ms = 500;
        settings.readiness.stop_grace_ms = 200;

        Ok(Self {
            root,
            scratch,
            settings,
        })
    }

    /// The service root.
    pub const fn root(&self) -> &ServiceRoot {
        &self.root
    }

    /// Settings handed to controllers.
    pub const fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Mutable settings, for tests that tweak timings or layout.
    pub const fn settings_mut(&mut self) -> &mut HarnessSettings {
        &mut self.settings
    }

    /// Creates a controller for `entry` with the harness settings.
    pub fn controller(
        &self,
        context: InstanceContext,
        entry: impl ServiceEntryPoint,
    ) -> LifecycleController {
        LifecycleController::new(self.settings.clone(), context, entry)
    }

    /// Entries currently present in the scratch directory.
    pub fn scratch_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.scratch.path())
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }

    /// Probes the service described by `config` once.
    pub async fn probe(&self, config: &RuntimeConfig) -> HealthProbeResult {
        VersionEndpointProbe::new(
            config.host(),
            config.port(),
            &self.settings.readiness.health_path,
        )
        .probe()
        .await
    }
}
