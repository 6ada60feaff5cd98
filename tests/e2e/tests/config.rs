//! Configuration E2E tests.
//!
//! What the service actually sees in its generated configuration.

use testbed_core::{AuxiliaryService, InstanceContext, PortRange};
use testbed_e2e::{Behavior, FakeService, ServiceRoot, TestHarness};

#[tokio::test]
async fn test_caller_overrides_take_precedence() {
    let harness = TestHarness::new(PortRange::new(48000, 48099)).expect("failed to create harness");
    let context = InstanceContext::new()
        .with_override("service.mode", "integration")
        .with_override("feature.flags", "a,b,c")
        .with_override("jdbc.url", "jdbc:h2:mem;MODE=MySQL");

    let service = FakeService::new(Behavior::Healthy);
    let mut instance = harness.controller(context.clone(), service.clone());
    instance.start().await.expect("start should succeed");

    let seen = service.seen_config().expect("service should have read its config");
    for (key, value) in context.overrides() {
        assert_eq!(seen.get(key), Some(value), "override {key} not applied verbatim");
    }
    assert_eq!(seen["service.name"], "fake");

    let conf = std::fs::read_to_string(instance.runtime_config().unwrap().conf_file())
        .expect("config file should exist while running");
    assert!(conf.starts_with("# Fake service configuration"));
    assert!(conf.contains("! storage"));

    instance.stop().await.expect("stop should succeed");
}

#[tokio::test]
async fn test_storage_override_wins_over_computed_path() {
    let harness = TestHarness::new(PortRange::new(48100, 48199)).expect("failed to create harness");
    let storage = tempfile::tempdir().expect("failed to create storage dir");
    let storage_path = storage.path().join("kv");
    let context = InstanceContext::new().with_override(
        "entity.store.kv.rocksdbBackend.storagePath",
        storage_path.to_string_lossy(),
    );

    let service = FakeService::new(Behavior::Healthy);
    let mut instance = harness.controller(context, service.clone());
    instance.start().await.expect("start should succeed");

    assert_eq!(
        instance.runtime_config().unwrap().storage_path(),
        storage_path.as_path()
    );
    assert_eq!(
        service.seen_config().unwrap()["entity.store.kv.rocksdbBackend.storagePath"],
        storage_path.to_string_lossy()
    );

    std::fs::create_dir_all(&storage_path).expect("fake storage");
    instance.stop().await.expect("stop should succeed");
    assert!(!storage_path.exists());
}

#[tokio::test]
async fn test_auxiliary_services() {
    let harness = TestHarness::new(PortRange::new(48200, 48299)).expect("failed to create harness");
    let context = InstanceContext::new()
        .with_auxiliary_service(
            AuxiliaryService::new("iceberg-rest").with_classpath(["libs", "conf"]),
        )
        .with_auxiliary_service(AuxiliaryService::new("metrics"));

    let service = FakeService::new(Behavior::Healthy);
    let mut instance = harness.controller(context, service.clone());
    instance.start().await.expect("start should succeed");

    let config = instance.runtime_config().unwrap().clone();
    let aux = config.auxiliary_ports();
    assert_eq!(aux.len(), 2);
    assert_ne!(aux["iceberg-rest"], aux["metrics"]);
    for port in aux.values() {
        assert!(harness.settings().ports.auxiliary.contains(*port));
        assert_ne!(*port, config.port());
    }

    let seen = service.seen_config().unwrap();
    assert_eq!(
        seen["server.auxService.iceberg-rest.httpPort"],
        aux["iceberg-rest"].to_string()
    );
    assert_eq!(seen["server.auxService.iceberg-rest.classpath"], "libs,conf");
    assert!(!seen.contains_key("server.auxService.metrics.classpath"));

    instance.stop().await.expect("stop should succeed");
}

#[tokio::test]
async fn test_env_template_is_copied_and_removed() {
    let root = ServiceRoot::new().expect("failed to create service root");
    root.add_env_template("service-env.sh.template", "export SERVICE_HEAP=512m\n")
        .expect("failed to write env template");
    let mut harness =
        TestHarness::with_root(root, PortRange::new(48300, 48399)).expect("failed to create harness");
    harness.settings_mut().layout.env_template = Some("service-env.sh.template".to_string());

    let mut instance =
        harness.controller(InstanceContext::new(), FakeService::new(Behavior::Healthy));
    instance.start().await.expect("start should succeed");

    let env_file = instance
        .runtime_config()
        .unwrap()
        .env_file()
        .expect("env file should be generated")
        .to_path_buf();
    assert_eq!(
        std::fs::read_to_string(&env_file).unwrap(),
        "export SERVICE_HEAP=512m\n"
    );

    instance.stop().await.expect("stop should succeed");
    assert!(!env_file.exists());
}

#[tokio::test]
async fn test_template_without_host_uses_default() {
    let root = ServiceRoot::with_template("server.webserver.httpPort = 8090\n")
        .expect("failed to create service root");
    let harness =
        TestHarness::with_root(root, PortRange::new(48400, 48499)).expect("failed to create harness");

    let service = FakeService::new(Behavior::Healthy);
    let mut instance = harness.controller(InstanceContext::new(), service.clone());
    instance.start().await.expect("start should succeed");

    assert_eq!(instance.runtime_config().unwrap().host(), "127.0.0.1");
    assert_eq!(
        service.seen_config().unwrap()["server.webserver.host"],
        "127.0.0.1"
    );
    instance.stop().await.expect("stop should succeed");
}
