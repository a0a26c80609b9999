//! Homebridge provider integration tests
//!
//! Drives the provider against a scripted Homebridge UI API.

use hearth_hub::{
    ActionContext, ActionExecutor, ConnectionTestable, DeviceBinding, DeviceDiscovery,
    DeviceKind, DevicePlugin, DeviceStateReader, Error, HomebridgeProvider, PluginConfig,
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Build and initialize a provider pointed at the mock server
async fn provider_for(server: &MockServer) -> HomebridgeProvider {
    let provider = HomebridgeProvider::new();
    let mut config = PluginConfig::disabled("homebridge", "Homebridge");
    config
        .settings
        .insert("server_url".to_string(), json!(server.uri()));
    config
        .settings
        .insert("username".to_string(), json!("admin"));
    config
        .settings
        .insert("password".to_string(), json!("secret"));
    provider.initialize(&config).await.unwrap();
    provider
}

fn login_response(expires_in: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "tok-1",
        "expires_in": expires_in,
    }))
}

fn light_accessory() -> serde_json::Value {
    json!({
        "uniqueId": "light-1",
        "serviceName": "Ceiling Light",
        "type": "Lightbulb",
        "aid": 2,
        "iid": 8,
        "uuid": "0000-0043",
        "serviceCharacteristics": [
            {"type": "On", "value": 0, "canWrite": true},
            {"type": "Brightness", "value": 80, "canWrite": true},
        ],
    })
}

fn action(device: &str, kind: DeviceKind, new_state: bool, speed: Option<u8>) -> ActionContext {
    ActionContext {
        binding: DeviceBinding {
            plugin_id: "homebridge".to_string(),
            external_device_id: device.to_string(),
            device_type: kind,
            metadata: std::collections::HashMap::new(),
        },
        new_state,
        speed_level: speed,
    }
}

#[tokio::test]
async fn discovery_maps_types_capabilities_and_rooms() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"username": "admin", "password": "secret"})))
        .respond_with(login_response(3600))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            light_accessory(),
            {
                "uniqueId": "fan-1",
                "serviceName": "Bedroom Fan",
                "type": "Fanv2",
                "serviceCharacteristics": [
                    {"type": "On", "value": 1, "canWrite": true},
                    {"type": "RotationSpeed", "value": 60, "canWrite": true},
                ],
            },
            {
                // Read-only On characteristic: not controllable, dropped
                "uniqueId": "switch-ro",
                "serviceName": "Status Switch",
                "type": "Switch",
                "serviceCharacteristics": [
                    {"type": "On", "value": 1, "canWrite": false},
                ],
            },
            {
                // Unmapped service type, dropped
                "uniqueId": "sensor-1",
                "serviceName": "Hallway Sensor",
                "type": "TemperatureSensor",
                "serviceCharacteristics": [
                    {"type": "CurrentTemperature", "value": 21.5, "canWrite": false},
                ],
            },
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories/layout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rooms": [
                {"name": "Living Room", "services": [{"uniqueId": "light-1"}]},
            ],
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let devices = provider.discover_devices().await.unwrap();

    assert_eq!(devices.len(), 2);

    let light = devices.iter().find(|d| d.id == "light-1").unwrap();
    assert_eq!(light.name, "Ceiling Light");
    assert_eq!(light.kind, DeviceKind::Light);
    assert_eq!(light.room.as_deref(), Some("Living Room"));
    assert!(light.capabilities.on);
    assert!(light.capabilities.brightness);
    assert!(!light.capabilities.speed);
    assert_eq!(light.metadata["uniqueId"], json!("light-1"));

    let fan = devices.iter().find(|d| d.id == "fan-1").unwrap();
    assert_eq!(fan.kind, DeviceKind::Fan);
    assert_eq!(fan.room, None);
    assert!(fan.capabilities.speed);
}

#[tokio::test]
async fn token_is_reused_within_its_validity_window() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories/layout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rooms": []})))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    provider.discover_devices().await.unwrap();
    provider.discover_devices().await.unwrap();
}

#[tokio::test]
async fn token_expiring_within_the_buffer_triggers_reauthentication() {
    let server = MockServer::start().await;

    // 60 seconds is inside the 5 minute refresh buffer
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(60))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories/layout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rooms": []})))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    provider.discover_devices().await.unwrap();
    provider.discover_devices().await.unwrap();
}

#[tokio::test]
async fn layout_failure_does_not_fail_discovery() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([light_accessory()])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories/layout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let devices = provider.discover_devices().await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].room, None);
}

#[tokio::test]
async fn auth_failure_surfaces_as_upstream_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let err = provider.discover_devices().await.unwrap_err();

    assert!(matches!(err, Error::Upstream(_)));
    let message = err.to_string();
    assert!(message.contains("401"));
    assert!(message.contains("bad credentials"));
}

#[tokio::test]
async fn action_targets_the_on_characteristic() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/accessories/light-1"))
        .and(body_json(json!({"characteristicType": "On", "value": 1})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let result = provider
        .execute_action(&action("light-1", DeviceKind::Light, true, None))
        .await;

    assert!(result.success);
    assert_eq!(result.new_state, Some(true));
}

#[tokio::test]
async fn fan_speed_targets_the_rotation_speed_characteristic() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/accessories/fan-1"))
        .and(body_json(json!({"characteristicType": "RotationSpeed", "value": 42})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let result = provider
        .execute_action(&action("fan-1", DeviceKind::Fan, true, Some(42)))
        .await;

    assert!(result.success);
}

#[tokio::test]
async fn speed_level_on_a_non_fan_binding_falls_back_to_on_off() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/accessories/light-1"))
        .and(body_json(json!({"characteristicType": "On", "value": 0})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let result = provider
        .execute_action(&action("light-1", DeviceKind::Light, false, Some(42)))
        .await;

    assert!(result.success);
}

#[tokio::test]
async fn rejected_action_becomes_a_failure_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/accessories/light-1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let result = provider
        .execute_action(&action("light-1", DeviceKind::Light, true, None))
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("500"));
    assert!(error.contains("boom"));
}

#[tokio::test]
async fn state_readback_coerces_characteristic_values() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories/fan-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uniqueId": "fan-1",
            "serviceName": "Bedroom Fan",
            "type": "Fanv2",
            "serviceCharacteristics": [
                {"type": "On", "value": "1", "canWrite": true},
                {"type": "RotationSpeed", "value": 25, "canWrite": true},
            ],
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let state = provider.get_device_state("fan-1").await.unwrap();

    assert!(state.state);
    assert_eq!(state.speed_level, Some(25));
}

#[tokio::test]
async fn state_fetch_failure_returns_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    assert!(provider.get_device_state("ghost").await.is_none());
}

#[tokio::test]
async fn connection_test_reports_success_and_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([light_accessory()])))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let result = provider.test_connection().await;
    assert!(result.success);
    assert!(result.message.contains("1 accessories"));

    // Credentials stop working: still a result, never an error
    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    // Fresh session so the cached token is not reused
    provider.shutdown().await.unwrap();
    let mut config = PluginConfig::disabled("homebridge", "Homebridge");
    config
        .settings
        .insert("server_url".to_string(), json!(server.uri()));
    config
        .settings
        .insert("username".to_string(), json!("admin"));
    config
        .settings
        .insert("password".to_string(), json!("wrong"));
    provider.initialize(&config).await.unwrap();

    let result = provider.test_connection().await;
    assert!(!result.success);
    assert!(result.message.contains("authentication failed"));
}

#[tokio::test]
async fn shutdown_clears_the_cached_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(login_response(3600))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/accessories/layout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rooms": []})))
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    provider.discover_devices().await.unwrap();

    // Same instance, new lifecycle: the old token must not be reused
    provider.shutdown().await.unwrap();
    let mut config = PluginConfig::disabled("homebridge", "Homebridge");
    config
        .settings
        .insert("server_url".to_string(), json!(server.uri()));
    config
        .settings
        .insert("username".to_string(), json!("admin"));
    config
        .settings
        .insert("password".to_string(), json!("secret"));
    provider.initialize(&config).await.unwrap();
    provider.discover_devices().await.unwrap();
}

#[tokio::test]
async fn uninitialized_provider_fails_with_config_errors() {
    let provider = HomebridgeProvider::new();

    let err = provider.discover_devices().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let result = provider
        .execute_action(&action("light-1", DeviceKind::Light, true, None))
        .await;
    assert!(!result.success);

    assert!(provider.get_device_state("light-1").await.is_none());
}
