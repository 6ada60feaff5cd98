//! Polling a health probe until it reports a target result.

use crate::probe::{HealthProbe, HealthProbeResult};
use std::time::Duration;
use tokio::time::Instant;

/// How a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The probe reported the target result.
    Reached,
    /// The early-exit condition fired first.
    ExitedEarly,
    /// The deadline elapsed first.
    TimedOut,
}

impl PollOutcome {
    /// Returns true if the target was reached.
    #[must_use]
    pub const fn is_reached(self) -> bool {
        matches!(self, Self::Reached)
    }
}

/// Repeatedly probes at a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    interval: Duration,
}

impl ReadinessPoller {
    /// Creates a poller that waits `interval` between probes.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Polls `probe` until it reports `target`, `early_exit` returns true, or
    /// `deadline` elapses.
    ///
    /// Each iteration sleeps the interval (clamped to the remaining time), then
    /// probes. The early-exit check runs only after a probe misses the target,
    /// so a target observed on the same iteration wins.
    pub async fn wait_until<P, F>(
        &self,
        target: HealthProbeResult,
        probe: &P,
        early_exit: F,
        deadline: Duration,
    ) -> PollOutcome
    where
        P: HealthProbe + ?Sized,
        F: Fn() -> bool,
    {
        let deadline = Instant::now() + deadline;
        let mut attempts = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.interval.min(remaining)).await;

            attempts += 1;
            if probe.probe().await == target {
                tracing::debug!(?target, attempts, "probe reached target");
                return PollOutcome::Reached;
            }

            if early_exit() {
                tracing::debug!(?target, attempts, "polling stopped early");
                return PollOutcome::ExitedEarly;
            }

            if Instant::now() >= deadline {
                tracing::debug!(?target, attempts, "polling timed out");
                return PollOutcome::TimedOut;
            }
        }
    }
}
