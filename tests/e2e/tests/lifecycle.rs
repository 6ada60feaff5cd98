//! Lifecycle E2E tests.
//!
//! Start, readiness, stop and cleanup against a healthy fake service.

use futures::future::join_all;
use std::collections::HashSet;
use testbed_core::{
    ExecutionStatus, HealthProbeResult, InstanceContext, LifecycleState, PortRange,
};
use testbed_e2e::{Behavior, FakeService, TestHarness};

// ============================================================================
// Single Instance
// ============================================================================

#[tokio::test]
async fn test_start_without_overrides() {
    let harness = TestHarness::new(PortRange::new(46000, 46199)).expect("failed to create harness");
    let service = FakeService::new(Behavior::Healthy);
    let mut instance = harness.controller(InstanceContext::new(), service.clone());

    instance.start().await.expect("start should succeed");
    assert_eq!(instance.state(), LifecycleState::Running);

    let config = instance.runtime_config().expect("config after start").clone();
    assert!(harness.settings().ports.service.contains(config.port()));
    assert_eq!(harness.probe(&config).await, HealthProbeResult::Healthy);

    let seen = service.seen_config().expect("service should have read its config");
    assert_eq!(seen["server.webserver.httpPort"], config.port().to_string());
    assert_eq!(seen["service.mode"], "template");

    instance.stop().await.expect("stop should succeed");
}

#[tokio::test]
async fn test_stop_makes_service_unreachable_and_cleans_up() {
    let harness = TestHarness::new(PortRange::new(46200, 46399)).expect("failed to create harness");
    let mut instance = harness.controller(InstanceContext::new(), FakeService::new(Behavior::Healthy));

    instance.start().await.expect("start should succeed");
    let config = instance.runtime_config().expect("config after start").clone();
    std::fs::create_dir_all(config.storage_path().join("000001.sst")).expect("fake storage");
    assert!(config.instance_dir().exists());

    let report = instance.stop().await.expect("stop should succeed");
    assert!(report.is_clean(), "unexpected warnings: {:?}", report.warnings);
    assert_eq!(instance.state(), LifecycleState::Stopped);
    assert_eq!(instance.execution_status(), Some(ExecutionStatus::Completed));

    assert_eq!(harness.probe(&config).await, HealthProbeResult::Unhealthy);
    assert!(!config.instance_dir().exists());
    assert!(!config.storage_path().exists());
    assert!(harness.scratch_entries().is_empty());
}

// ============================================================================
// Multiple Instances
// ============================================================================

#[tokio::test]
async fn test_back_to_back_instances_are_isolated() {
    let harness = TestHarness::new(PortRange::new(46400, 46599)).expect("failed to create harness");

    let mut first = harness.controller(InstanceContext::new(), FakeService::new(Behavior::Healthy));
    first.start().await.expect("first start should succeed");
    let mut second = harness.controller(InstanceContext::new(), FakeService::new(Behavior::Healthy));
    second.start().await.expect("second start should succeed");

    let a = first.runtime_config().unwrap().clone();
    let b = second.runtime_config().unwrap().clone();
    assert_ne!(a.port(), b.port());
    assert_ne!(a.storage_path(), b.storage_path());
    assert_ne!(a.instance_dir(), b.instance_dir());

    assert_eq!(harness.probe(&a).await, HealthProbeResult::Healthy);
    assert_eq!(harness.probe(&b).await, HealthProbeResult::Healthy);

    first.stop().await.expect("first stop should succeed");
    assert_eq!(harness.probe(&b).await, HealthProbeResult::Healthy);
    second.stop().await.expect("second stop should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_instances_get_distinct_ports() {
    let harness = TestHarness::new(PortRange::new(46600, 46799)).expect("failed to create harness");

    let mut instances: Vec<_> = (0..4)
        .map(|_| harness.controller(InstanceContext::new(), FakeService::new(Behavior::Healthy)))
        .collect();

    let starts = instances.iter_mut().map(|instance| instance.start());
    for result in join_all(starts).await {
        result.expect("concurrent start should succeed");
    }

    let ports: HashSet<_> = instances
        .iter()
        .map(|i| i.runtime_config().unwrap().port())
        .collect();
    let storage: HashSet<_> = instances
        .iter()
        .map(|i| i.runtime_config().unwrap().storage_path().to_path_buf())
        .collect();
    assert_eq!(ports.len(), instances.len());
    assert_eq!(storage.len(), instances.len());

    for instance in &mut instances {
        instance.stop().await.expect("stop should succeed");
    }
    assert!(harness.scratch_entries().is_empty());
}
