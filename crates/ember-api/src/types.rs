// Wire types for the ESP32 device HTTP contract.
//
// Firmware revisions differ in which fields they include, so every
// response type is lenient: unknown fields are ignored and most known
// fields are optional with defaults.

use serde::{Deserialize, Serialize};

// ── /info ───────────────────────────────────────────────────────────

/// Response from `GET /info`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    /// MAC address as reported by the firmware.
    pub mac: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Firmware's device model string (e.g. `"ESP32-CAM"`).
    #[serde(default)]
    pub device: Option<String>,
    /// Seconds since boot.
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub free_heap: Option<u64>,
}

// ── /sensors ────────────────────────────────────────────────────────

/// Response from `GET /sensors`.
///
/// Newer firmware returns the `sensors` array; older builds expose bare
/// top-level fields (`temperature`, `light`, ...). Both shapes are kept
/// so normalization in [`crate::sensors`] can search them in order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorsResponse {
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
    /// Bare top-level fields from legacy firmware.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One entry of the `sensors` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Raw reading — ADC counts for moisture/light, °C / %RH for DHT.
    #[serde(default)]
    pub value: Option<f64>,
    /// Pre-computed percentage, when the firmware provides one.
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

// ── /led and /relay ─────────────────────────────────────────────────

/// Response from `GET /led` or `GET /relay` — state only, no ack flag.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ActuatorState {
    pub state: bool,
}

/// Acknowledgement from `POST /led` or `POST /relay`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorAck {
    pub success: bool,
    #[serde(default)]
    pub state: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Request body for `POST /led` / `POST /relay`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActuatorRequest {
    pub state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<u8>,
}

// ── Configuration routes ────────────────────────────────────────────

/// Acknowledgement from the `set-*-pin`, `set-*-interval`, and reset
/// routes.
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct PinRequest {
    pub pin: u8,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct IntervalRequest {
    /// Milliseconds.
    pub interval: u64,
}

// ── /inference ──────────────────────────────────────────────────────

/// Response from `GET /inference` on camera firmware.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceResponse {
    #[serde(default)]
    pub has_results: bool,
    #[serde(default)]
    pub bounding_boxes: Vec<BoundingBox>,
}

/// One detection from the on-device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub value: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

// ── Cloud-sync configuration ────────────────────────────────────────

/// Configuration blob exchanged with `/get-supabase-config` and
/// `/set-supabase-config`: where the device should push readings
/// directly, and which fields it should send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    #[serde(default)]
    pub supabase_url: String,
    #[serde(default)]
    pub supabase_api_key: String,
    #[serde(default)]
    pub data_config: DataToggles,
}

/// Per-field toggles for device-side cloud push.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataToggles {
    pub send_temperature: bool,
    pub send_humidity: bool,
    pub send_soil_moisture: bool,
    pub send_light_level: bool,
    pub send_led_state: bool,
    pub send_relay_state: bool,
}

impl Default for DataToggles {
    fn default() -> Self {
        Self {
            send_temperature: true,
            send_humidity: true,
            send_soil_moisture: true,
            send_light_level: true,
            send_led_state: true,
            send_relay_state: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensors_response_accepts_bare_fields() {
        let raw = r#"{"temperature": 21.5, "light": 2048}"#;
        let parsed: SensorsResponse = serde_json::from_str(raw).expect("parse");
        assert!(parsed.sensors.is_empty());
        assert_eq!(
            parsed.extra.get("temperature").and_then(serde_json::Value::as_f64),
            Some(21.5)
        );
    }

    #[test]
    fn sensors_response_accepts_array_shape() {
        let raw = r#"{"sensors":[{"id":"soil_moisture","type":"soil","value":2000,"percentage":51.2,"unit":"%"}]}"#;
        let parsed: SensorsResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.sensors.len(), 1);
        assert_eq!(parsed.sensors[0].percentage, Some(51.2));
    }

    #[test]
    fn cloud_config_uses_camel_case() {
        let cfg = CloudConfig {
            supabase_url: "https://example.supabase.co".into(),
            supabase_api_key: "anon".into(),
            data_config: DataToggles::default(),
        };
        let json = serde_json::to_value(&cfg).expect("serialize");
        assert!(json.get("supabaseUrl").is_some());
        assert!(json["dataConfig"].get("sendSoilMoisture").is_some());
    }
}
