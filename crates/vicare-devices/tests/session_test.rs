//! Session lifecycle: failure escalation, persistence and teardown.

mod common;

use common::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use vicare_devices::{
    AUTHENTICATION_REASON, DeviceHost, MemoryDeviceHost, PollOutcome, RemoteError, SessionConfig,
    paths, roles,
};
use vicare_storage::{CURRENT_SCHEMA_VERSION, DeviceStateStore, PathConstraints};

#[tokio::test]
async fn test_unavailable_after_three_failures() {
    let h = harness(&[roles::HEATPUMP], &[paths::HOT_WATER_TEMP]);
    h.session.on_init().await.unwrap();
    h.remote
        .fail_fetches(Some(RemoteError::Transport("connection reset".to_string())))
        .await;

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(h.session.on_poll_tick().await);
        if outcomes.len() == 2 {
            assert_eq!(h.host.is_available().await, None);
        }
    }

    assert_eq!(h.host.is_available().await, Some(false));
    let reason = h.host.unavailable_reason().await.unwrap();
    assert!(reason.starts_with("Remote unavailable"));
    assert!(reason.contains("connection reset"));
    assert!(!outcomes[3].requests_backoff());
    assert!(outcomes[4].requests_backoff());
    assert_eq!(h.session.consecutive_failures().await, 5);
}

#[tokio::test]
async fn test_recovery_resets_failures() {
    let h = harness(&[roles::HEATPUMP], &[paths::HOT_WATER_TEMP]);
    h.session.on_init().await.unwrap();
    h.remote
        .set_features(vec![value_record(paths::HOT_WATER_TEMP, json!(45.0))])
        .await;
    for _ in 0..3 {
        h.remote
            .queue_fetch_error(RemoteError::RateLimited("quota".to_string()))
            .await;
    }

    for _ in 0..3 {
        h.session.on_poll_tick().await;
    }
    assert_eq!(h.host.is_available().await, Some(false));

    assert!(h.session.on_poll_tick().await.is_success());
    assert_eq!(h.host.is_available().await, Some(true));
    assert_eq!(h.session.consecutive_failures().await, 0);
}

#[tokio::test]
async fn test_authentication_failure_reason_and_no_backoff() {
    let h = harness(&[roles::HEATPUMP], &[]);
    h.session.on_init().await.unwrap();
    h.remote
        .fail_fetches(Some(RemoteError::Unauthorized("token expired".to_string())))
        .await;

    let mut last = PollOutcome::Skipped;
    for _ in 0..6 {
        last = h.session.on_poll_tick().await;
    }

    assert_eq!(
        h.host.unavailable_reason().await.as_deref(),
        Some(AUTHENTICATION_REASON)
    );
    match last {
        PollOutcome::FetchFailed {
            consecutive,
            backoff,
            authentication,
        } => {
            assert_eq!(consecutive, 6);
            assert!(!backoff);
            assert!(authentication);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_legacy_state_upgraded_on_init() {
    let store = DeviceStateStore::memory();
    store
        .set("heatpump-1", "features", &vec![paths::HOT_WATER_TEMP.to_string()])
        .unwrap();
    assert_eq!(store.schema_version("heatpump-1").unwrap(), 0);

    let config = SessionConfig::new("heatpump-1", address()).with_roles([roles::HEATPUMP]);
    let h = harness_with(config, store.clone(), Arc::new(MemoryDeviceHost::new()));
    h.session.on_init().await.unwrap();

    assert_eq!(store.schema_version("heatpump-1").unwrap(), CURRENT_SCHEMA_VERSION);
    assert!(h.host.has_capability("measure_temperature.hotWater").await);
    let persisted = store.load("heatpump-1").unwrap();
    assert_eq!(persisted.roles, vec![roles::HEATPUMP.to_string()]);
}

#[tokio::test]
async fn test_newer_schema_refuses_to_start() {
    let store = DeviceStateStore::memory();
    store
        .set("heatpump-1", "schema_version", &(CURRENT_SCHEMA_VERSION + 1))
        .unwrap();
    let config = SessionConfig::new("heatpump-1", address());
    let h = harness_with(config, store, Arc::new(MemoryDeviceHost::new()));

    assert!(h.session.on_init().await.is_err());
}

#[tokio::test]
async fn test_discovered_features_survive_restart() {
    let store = DeviceStateStore::memory();
    let config = SessionConfig::new("heatpump-1", address()).with_roles([roles::HEATPUMP]);

    let first = harness_with(config.clone(), store.clone(), Arc::new(MemoryDeviceHost::new()));
    first.session.on_init().await.unwrap();
    first
        .remote
        .set_features(vec![value_record(paths::OUTSIDE_TEMP, json!(3.5))])
        .await;
    first.session.on_poll_tick().await;
    first.session.on_uninit();

    let second = harness_with(config, store, Arc::new(MemoryDeviceHost::new()));
    let report = second.session.on_init().await.unwrap();
    assert_eq!(report.added, vec!["measure_temperature.outside".to_string()]);
}

#[tokio::test]
async fn test_cached_values_seeded_from_host() {
    let host = Arc::new(MemoryDeviceHost::with_capabilities(["measure_temperature.outside"]));
    host.set_capability_value("measure_temperature.outside", json!(3.5))
        .await
        .unwrap();
    let config = SessionConfig::new("heatpump-1", address())
        .with_roles([roles::HEATPUMP])
        .with_features([paths::OUTSIDE_TEMP]);
    let h = harness_with(config, DeviceStateStore::memory(), host);
    h.session.on_init().await.unwrap();
    h.host.clear_calls().await;

    h.remote
        .set_features(vec![value_record(paths::OUTSIDE_TEMP, json!(3.5))])
        .await;
    h.session.on_poll_tick().await;

    assert_eq!(h.host.value_writes(None).await, 0);
}

#[tokio::test]
async fn test_path_override_moves_feature() {
    let config = SessionConfig::new("heatpump-1", address())
        .with_roles([roles::HEATPUMP])
        .with_features(["heating.circuits.1.operating.modes.active"])
        .with_path_override("circuits.0", "circuits.1");
    let h = harness_with(config, DeviceStateStore::memory(), Arc::new(MemoryDeviceHost::new()));
    h.session.on_init().await.unwrap();
    assert!(h.host.has_capability("thermostat_mode.heating").await);

    h.remote
        .set_features(vec![record(
            "heating.circuits.1.operating.modes.active",
            json!({ "value": { "value": "standby" } }),
        )])
        .await;
    h.session.on_poll_tick().await;
    assert_eq!(
        h.session.capability_value("thermostat_mode.heating").await,
        Some(json!("standby"))
    );

    h.session
        .on_capability_write("thermostat_mode.heating", json!("dhw"))
        .await
        .unwrap();
    assert_eq!(
        h.remote.commands().await[0].feature,
        "heating.circuits.1.operating.modes.active"
    );
}

#[tokio::test(start_paused = true)]
async fn test_poll_finishing_after_teardown_is_dropped() {
    let h = harness(&[roles::HEATPUMP], &[paths::HOT_WATER_TEMP]);
    h.session.on_init().await.unwrap();
    h.remote
        .set_features(vec![value_record(paths::HOT_WATER_TEMP, json!(45.0))])
        .await;
    h.remote.delay_fetches(Duration::from_secs(10)).await;

    let session = h.session.clone();
    let poll = tokio::spawn(async move { session.on_poll_tick().await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.session.on_uninit();

    let outcome = poll.await.unwrap();
    assert!(matches!(outcome, PollOutcome::Skipped));
    assert_eq!(h.host.value_writes(None).await, 0);
    assert_eq!(h.host.is_available().await, None);

    assert!(matches!(h.session.on_poll_tick().await, PollOutcome::Skipped));
    assert!(h
        .session
        .on_capability_write("measure_temperature.hotWater", json!(1))
        .await
        .is_err());
}

#[tokio::test]
async fn test_pairing_constraints_shape_first_provisioning() {
    let mut constraints = BTreeMap::new();
    constraints.insert(
        paths::HOT_WATER_TARGET.to_string(),
        PathConstraints {
            min: Some(10.0),
            max: Some(55.0),
            ..Default::default()
        },
    );
    let config = SessionConfig::new("heatpump-1", address())
        .with_roles([roles::HEATPUMP])
        .with_features([paths::HOT_WATER_TARGET])
        .with_constraints(constraints);
    let store = DeviceStateStore::memory();
    let h = harness_with(config, store.clone(), Arc::new(MemoryDeviceHost::new()));

    h.session.on_init().await.unwrap();

    let options = h
        .host
        .get_capability_options("target_temperature.hotWater")
        .await
        .unwrap();
    assert_eq!(options.max, Some(55.0));
    assert_eq!(
        store.load("heatpump-1").unwrap().constraints[paths::HOT_WATER_TARGET].max,
        Some(55.0)
    );
}
