#![allow(clippy::unwrap_used)]
// Integration tests for `DeviceClient` using wiremock.

use std::net::Ipv4Addr;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ember_api::{DeviceClient, Error, SensorKind, TransportConfig, find_reading};

const LOOPBACK: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, DeviceClient) {
    let server = MockServer::start().await;
    let port = url::Url::parse(&server.uri()).unwrap().port().unwrap();
    let client = DeviceClient::new(&TransportConfig {
        timeout: Duration::from_secs(2),
        port,
        ..TransportConfig::default()
    })
    .unwrap();
    (server, client)
}

// ── /info ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_info_success() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mac": "a4:cf:12:0f:3b:9e",
            "status": "online",
            "ip": "192.168.1.42",
            "device": "ESP32-WROOM",
            "uptime": 3600,
            "free_heap": 118_000
        })))
        .mount(&server)
        .await;

    let info = client.info(LOOPBACK).await.unwrap();
    assert_eq!(info.mac.as_deref(), Some("a4:cf:12:0f:3b:9e"));
    assert_eq!(info.uptime, Some(3600));
}

#[tokio::test]
async fn test_info_non_2xx_is_unreachable() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client.info(LOOPBACK).await.unwrap_err();
    assert!(
        matches!(err, Error::Unreachable(_)),
        "expected Unreachable, got: {err:?}"
    );
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() {
    // Nothing listening on this port.
    let client = DeviceClient::new(&TransportConfig {
        timeout: Duration::from_millis(300),
        port: 1,
        ..TransportConfig::default()
    })
    .unwrap();

    let err = client.info(LOOPBACK).await.unwrap_err();
    assert!(err.is_transient(), "refused connection should be transient");
}

// ── /sensors ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sensors_array_shape_normalizes() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/sensors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sensors": [
                {"id": "temperature", "type": "temperature", "name": "Temperature Sensor",
                 "value": 23.5, "unit": "°C"},
                {"id": "soil_moisture", "type": "soil", "name": "Soil Moisture Sensor",
                 "value": 2375.1, "percentage": 42.0, "unit": "%"}
            ]
        })))
        .mount(&server)
        .await;

    let payload = client.sensors(LOOPBACK).await.unwrap();

    let soil = find_reading(SensorKind::SoilMoisture, &payload).unwrap();
    assert!((soil.value - 42.0).abs() < f64::EPSILON);

    let temp = find_reading(SensorKind::Temperature, &payload).unwrap();
    assert!((temp.value - 23.5).abs() < f64::EPSILON);

    assert!(find_reading(SensorKind::Light, &payload).is_none());
}

#[tokio::test]
async fn test_sensors_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/sensors"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.sensors(LOOPBACK).await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }));
}

// ── Actuators ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_relay_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/relay"))
        .and(body_json(json!({"state": true, "pin": 5})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "state": true})),
        )
        .mount(&server)
        .await;

    let ack = client.set_relay(LOOPBACK, true, Some(5)).await.unwrap();
    assert!(ack.state);
}

#[tokio::test]
async fn test_set_relay_rejected_is_protocol_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/relay"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "relay not configured"
        })))
        .mount(&server)
        .await;

    let err = client.set_relay(LOOPBACK, true, None).await.unwrap_err();
    match err {
        Error::Protocol { ref message } => {
            assert!(message.contains("relay not configured"), "got: {message}");
        }
        other => panic!("expected Protocol error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_relay_state_has_no_ack_flag() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/relay"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": true})))
        .mount(&server)
        .await;

    let state = client.relay_state(LOOPBACK).await.unwrap();
    assert!(state.state);
}

// ── Configuration routes ────────────────────────────────────────────

#[tokio::test]
async fn test_set_moisture_interval_sends_milliseconds() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/set-moisture-interval"))
        .and(body_json(json!({"interval": 5000})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Moisture interval set to 5000"
        })))
        .mount(&server)
        .await;

    client.set_moisture_interval(LOOPBACK, 5_000).await.unwrap();
}

#[tokio::test]
async fn test_set_pin_rejection_is_protocol_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/set-relay-pin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": "pin in use"})),
        )
        .mount(&server)
        .await;

    let err = client.set_relay_pin(LOOPBACK, 12).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
}

// ── Camera routes ───────────────────────────────────────────────────

#[tokio::test]
async fn test_inference_parses_bounding_boxes() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/inference"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "has_results": true,
            "bounding_boxes": [
                {"label": "person", "value": 0.91, "x": 10.0, "y": 12.0,
                 "width": 40.0, "height": 80.0}
            ]
        })))
        .mount(&server)
        .await;

    let inference = client.inference(LOOPBACK).await.unwrap();
    assert!(inference.has_results);
    assert_eq!(inference.bounding_boxes.len(), 1);
    assert_eq!(inference.bounding_boxes[0].label, "person");
}

#[tokio::test]
async fn test_stream_url_is_cache_busted() {
    let client = DeviceClient::new(&TransportConfig::default()).unwrap();
    let url = client.stream_url(Ipv4Addr::new(192, 168, 1, 42)).unwrap();

    assert_eq!(url.path(), "/stream");
    assert!(url.query().is_some_and(|q| q.starts_with("t=")));
}
