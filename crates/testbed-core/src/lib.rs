//! # testbed-core
//!
//! Ephemeral service instances for integration tests.
//!
//! A [`LifecycleController`] boots one isolated instance of a backend
//! service, waits until its health endpoint reports ready, and later tears it
//! down so the next run starts clean. Concurrent instances never share a port
//! or a storage directory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   LifecycleController                    │
//! │  ┌──────────────────┐ ┌─────────────────┐ ┌───────────┐  │
//! │  │ConfigMaterializer│ │ServiceSupervisor│ │ Readiness │  │
//! │  │        │         │ │        │        │ │  Poller   │  │
//! │  │        ▼         │ │        ▼        │ │     │     │  │
//! │  │  PortAllocator   │ │ServiceEntryPoint│ │HealthProbe│  │
//! │  └──────────────────┘ └─────────────────┘ └───────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                           cleanup
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use testbed_core::{HarnessSettings, InstanceContext, LifecycleController, ProcessEntryPoint};
//!
//! # async fn run() -> testbed_core::Result<()> {
//! let settings = HarnessSettings::load()?;
//! let context = InstanceContext::new().with_override("service.mode", "test");
//! let entry = ProcessEntryPoint::new("./bin/service");
//!
//! let mut instance = LifecycleController::new(settings, context, entry);
//! instance.start().await?;
//! // ... exercise the service at instance.base_url() ...
//! let report = instance.stop().await?;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cleanup;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod materialize;
pub mod port;
pub mod probe;
pub mod readiness;
pub mod settings;
pub mod supervisor;
pub mod template;

pub use cleanup::{CleanupReport, CleanupWarning, cleanup};
pub use context::{AuxiliaryService, InstanceContext};
pub use error::{HarnessError, Result};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use materialize::{ConfigMaterializer, Materialized, RuntimeConfig};
pub use port::{PortAllocator, PortLease, PortRange};
pub use probe::{HealthProbe, HealthProbeResult, VersionEndpointProbe};
pub use readiness::{PollOutcome, ReadinessPoller};
pub use settings::HarnessSettings;
pub use supervisor::{
    BlockingEntryPoint, ExecutionStatus, ProcessEntryPoint, ServiceEntryPoint, ServiceSupervisor,
};
