//! Instance lifecycle orchestration.
//!
//! ```text
//!   New ──start()──► Starting ──healthy──► Running ──stop()──► Stopping ──unhealthy──► Stopped
//!                       │                                          │
//!                       └──── timeout / exited early ──► Failed ◄──┴──── still healthy
//! ```
//!
//! `start()` materializes the configuration, launches the entry point and
//! waits for the health probe to pass. `stop()` asks the entry point to stop,
//! waits for the probe to fail, then removes the instance's files. Both return
//! only once their phase reaches a terminal outcome.

use crate::cleanup::{CleanupReport, cleanup};
use crate::context::InstanceContext;
use crate::error::{HarnessError, Result};
use crate::materialize::{ConfigMaterializer, RuntimeConfig};
use crate::port::PortLease;
use crate::probe::{HealthProbeResult, VersionEndpointProbe};
use crate::readiness::{PollOutcome, ReadinessPoller};
use crate::settings::HarnessSettings;
use crate::supervisor::{ExecutionStatus, ServiceEntryPoint, ServiceSupervisor};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not started yet.
    New,
    /// Configuration materialized, waiting for readiness.
    Starting,
    /// Service is healthy.
    Running,
    /// Stop requested, waiting for the service to go away.
    Stopping,
    /// Service stopped and files removed.
    Stopped,
    /// Startup or shutdown failed. Absorbing.
    Failed,
}

impl LifecycleState {
    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Returns the state name for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one service instance through its lifecycle.
///
/// Dropping a controller with a live execution cancels it; files are only
/// removed by [`LifecycleController::stop`] or a failed start.
pub struct LifecycleController {
    settings: HarnessSettings,
    context: InstanceContext,
    entry: Arc<dyn ServiceEntryPoint>,
    state: LifecycleState,
    supervisor: ServiceSupervisor,
    config: Option<RuntimeConfig>,
    leases: Vec<PortLease>,
    last_cleanup: Option<CleanupReport>,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl LifecycleController {
    /// Creates a controller in the `New` state.
    #[must_use]
    pub fn new(
        settings: HarnessSettings,
        context: InstanceContext,
        entry: impl ServiceEntryPoint,
    ) -> Self {
        Self::with_shared_entry(settings, context, Arc::new(entry))
    }

    /// Creates a controller around an already shared entry point.
    #[must_use]
    pub fn with_shared_entry(
        settings: HarnessSettings,
        context: InstanceContext,
        entry: Arc<dyn ServiceEntryPoint>,
    ) -> Self {
        Self {
            settings,
            context,
            entry,
            state: LifecycleState::New,
            supervisor: ServiceSupervisor::new(),
            config: None,
            leases: Vec::new(),
            last_cleanup: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Settings this controller was created with.
    #[must_use]
    pub const fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// The materialized configuration, once `start()` got that far.
    #[must_use]
    pub const fn runtime_config(&self) -> Option<&RuntimeConfig> {
        self.config.as_ref()
    }

    /// Base URL of the service, once configured.
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.config.as_ref().map(RuntimeConfig::base_url)
    }

    /// Status of the supervised execution, once launched.
    #[must_use]
    pub fn execution_status(&self) -> Option<ExecutionStatus> {
        self.supervisor.status()
    }

    /// Report of the most recent cleanup pass.
    #[must_use]
    pub const fn last_cleanup(&self) -> Option<&CleanupReport> {
        self.last_cleanup.as_ref()
    }

    /// Starts the service and waits until it reports healthy.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] unless the controller is `New`.
    /// Configuration and port allocation errors are returned as-is.
    /// Returns [`HarnessError::Startup`] if the service does not become
    /// healthy before the deadline or its execution ends first. Every error
    /// except `InvalidState` leaves the controller `Failed`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != LifecycleState::New {
            return Err(HarnessError::invalid_state(format!(
                "start() requires state new, instance is {}",
                self.state
            )));
        }
        self.transition(LifecycleState::Starting);

        let materialized = ConfigMaterializer::new(&self.settings).materialize(&self.context);
        let mut materialized = match materialized {
            Ok(materialized) => materialized,
            Err(e) => {
                tracing::error!("failed to materialize configuration: {}", e);
                self.transition(LifecycleState::Failed);
                return Err(e);
            }
        };

        materialized.release_reservations();
        let conf_file = materialized.config.conf_file().to_path_buf();
        let probe = self.probe_for(&materialized.config);
        tracing::info!(
            url = %materialized.config.base_url(),
            config = %conf_file.display(),
            "starting service"
        );
        self.config = Some(materialized.config);
        self.leases = materialized.leases;

        if let Err(e) = self.supervisor.launch(Arc::clone(&self.entry), conf_file) {
            self.cleanup_instance();
            self.transition(LifecycleState::Failed);
            return Err(e);
        }

        let readiness = &self.settings.readiness;
        let supervisor = &self.supervisor;
        let outcome = ReadinessPoller::new(readiness.poll_interval())
            .wait_until(
                HealthProbeResult::Healthy,
                &probe,
                || supervisor.is_done(),
                readiness.startup_timeout(),
            )
            .await;

        let reason = match outcome {
            PollOutcome::Reached => {
                self.transition(LifecycleState::Running);
                tracing::info!(url = %probe.url(), "service is ready");
                return Ok(());
            }
            PollOutcome::ExitedEarly => "service execution ended before becoming ready".to_string(),
            PollOutcome::TimedOut => format!(
                "service not ready within {}s",
                self.settings.readiness.startup_timeout_secs
            ),
        };

        self.supervisor
            .request_stop(self.settings.readiness.stop_grace())
            .await;
        let status = self
            .supervisor
            .status()
            .unwrap_or(ExecutionStatus::Reclaimed);
        tracing::error!(%status, "{}", reason);
        self.supervisor.mark_failed(&reason);

        self.cleanup_instance();
        self.transition(LifecycleState::Failed);
        Err(HarnessError::startup(format!("{reason} (execution {status})")))
    }

    /// Stops the service, waits until it stops answering, and cleans up.
    ///
    /// Cleanup runs whether or not the service went away in time; its report
    /// is returned on success and is also available from
    /// [`LifecycleController::last_cleanup`].
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] unless the controller is
    /// `Running`, and [`HarnessError::Shutdown`] if the service is still
    /// healthy at the deadline.
    pub async fn stop(&mut self) -> Result<CleanupReport> {
        if self.state != LifecycleState::Running {
            return Err(HarnessError::invalid_state(format!(
                "stop() requires state running, instance is {}",
                self.state
            )));
        }
        let Some(probe) = self.config.as_ref().map(|config| self.probe_for(config)) else {
            return Err(HarnessError::invalid_state(
                "running instance has no configuration",
            ));
        };
        self.transition(LifecycleState::Stopping);

        let readiness = &self.settings.readiness;
        self.supervisor.request_stop(readiness.stop_grace()).await;

        let outcome = ReadinessPoller::new(readiness.poll_interval())
            .wait_until(
                HealthProbeResult::Unhealthy,
                &probe,
                || false,
                readiness.shutdown_timeout(),
            )
            .await;

        let report = self.cleanup_instance();
        if outcome.is_reached() {
            self.transition(LifecycleState::Stopped);
            return Ok(report);
        }

        self.transition(LifecycleState::Failed);
        Err(HarnessError::shutdown(format!(
            "service at {} still healthy after {}s",
            probe.url(),
            self.settings.readiness.shutdown_timeout_secs
        )))
    }

    fn probe_for(&self, config: &RuntimeConfig) -> VersionEndpointProbe {
        let readiness = &self.settings.readiness;
        VersionEndpointProbe::new(config.host(), config.port(), &readiness.health_path)
            .with_request_timeout(readiness.request_timeout())
    }

    fn cleanup_instance(&mut self) -> CleanupReport {
        let report = match &self.config {
            Some(config) => cleanup([config.instance_dir(), config.storage_path()]),
            None => CleanupReport::default(),
        };
        if !report.is_clean() {
            tracing::warn!(warnings = report.warnings.len(), "cleanup left files behind");
        }

        self.leases.clear();
        self.last_cleanup = Some(report.clone());
        report
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!(from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
    }
}
