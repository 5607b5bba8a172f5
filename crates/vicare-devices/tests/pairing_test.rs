//! Pairing discovery against the mock API.

mod common;

use common::*;
use serde_json::json;
use vicare_devices::{
    CapabilityTable, Device, DeviceAddress, Gateway, Installation, discover_devices,
    initial_features, paths,
};

fn device(id: &str, model: &str, roles: &[&str]) -> Device {
    Device {
        id: id.to_string(),
        gateway_serial: None,
        device_type: Some("heating".to_string()),
        model_id: Some(model.to_string()),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_discovery_walks_installations_gateways_devices() {
    let remote = MockRemote::new();
    remote
        .add_installation(Installation {
            id: 1,
            description: Some("Home".to_string()),
        })
        .await;
    remote
        .add_installation(Installation {
            id: 2,
            description: None,
        })
        .await;
    remote
        .add_gateway(Gateway {
            serial: "gw-1".to_string(),
            installation_id: 1,
            gateway_type: None,
        })
        .await;
    remote
        .add_gateway(Gateway {
            serial: "gw-2".to_string(),
            installation_id: 2,
            gateway_type: None,
        })
        .await;
    remote
        .add_device(1, "gw-1", device("0", "E3_Vitocal", &["type:heatpump", "type:E3"]))
        .await;
    remote
        .add_device(2, "gw-2", device("0", "VScotHO1_72", &["type:boiler"]))
        .await;

    let found = discover_devices(&remote).await.unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].name, "E3_Vitocal (Home)");
    assert_eq!(found[0].address, DeviceAddress::new(1, "gw-1", "0"));
    assert_eq!(found[0].roles, vec!["type:heatpump", "type:E3"]);
    assert_eq!(found[1].name, "VScotHO1_72");
    assert_eq!(found[1].device_id(), "2-gw-2-0");
}

#[tokio::test]
async fn test_initial_features_lists_active_paths() {
    let remote = MockRemote::new();
    remote
        .set_features(vec![
            value_record(paths::HOT_WATER_TEMP, json!(45.0)),
            value_record(paths::HOT_WATER_TARGET, json!(50)).with_commands(json!({
                "setTargetTemperature": {
                    "params": { "temperature": { "constraints": { "min": 10, "max": 55, "stepping": 1 } } }
                }
            })),
            record(
                paths::RETURN_TEMP,
                json!({ "status": { "value": "disconnected" } }),
            ),
        ])
        .await;

    let table = CapabilityTable::viessmann();
    let (features, constraints) = initial_features(&remote, &address(), &table)
        .await
        .unwrap();

    assert!(features.contains(paths::HOT_WATER_TEMP));
    assert!(features.contains(paths::HOT_WATER_TARGET));
    assert!(!features.contains(paths::RETURN_TEMP));
    assert_eq!(constraints.len(), 1);
    assert_eq!(constraints[paths::HOT_WATER_TARGET].max, Some(55.0));
}
