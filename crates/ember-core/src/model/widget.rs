// ── Widget model ──
//
// A widget is a unit of sensor polling or actuator control attached to
// one device (by MAC). The kind is a closed tagged union: every variant
// carries its own typed configuration, and behavior dispatch is an
// exhaustive match — no string-tag chains.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::config::SessionDefaults;
use crate::error::CoreError;
use crate::model::ids::{MacAddress, UserId, WidgetId};

/// Broad widget class, as stored by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Sensor,
    Control,
}

/// Grid placement on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// One dashboard widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: WidgetId,
    pub owner: UserId,
    /// Foreign reference to the owning device's MAC — not its id, so the
    /// widget survives the device row being re-created.
    pub device_mac: MacAddress,
    pub name: String,
    pub kind: WidgetKind,
    pub pin: Option<u8>,
    pub position: Position,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Widget {
    pub fn new(
        owner: UserId,
        device_mac: MacAddress,
        name: impl Into<String>,
        kind: WidgetKind,
    ) -> Self {
        let now = Utc::now();
        let pin = kind.default_pin();
        Self {
            id: WidgetId::new(),
            owner,
            device_mac,
            name: name.into(),
            kind,
            pin,
            position: Position::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Per-kind configuration ──────────────────────────────────────────

/// Configuration for a plain on/off actuator widget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchConfig {
    /// Last device-confirmed state.
    pub state: bool,
}

/// Configuration for a periodically polled sensor widget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Poll cadence in seconds.
    pub refresh_rate: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            refresh_rate: SessionDefaults::default().moisture_refresh_secs,
        }
    }
}

/// Configuration for the auto-irrigation (water pump) widget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IrrigationConfig {
    /// Last device-confirmed state under manual control. Automation
    /// keeps its own in-memory state and recovers it from the device.
    pub state: bool,
    pub auto_mode: bool,
    /// Moisture percentage below which the pump turns ON.
    pub min_moisture_level: f64,
    /// Closed-loop check cadence (minutes).
    pub check_interval: u64,
    /// Auto-shutoff bound for automation-started runs (seconds).
    pub pump_duration: u64,
}

impl Default for IrrigationConfig {
    fn default() -> Self {
        let defaults = SessionDefaults::default();
        Self {
            state: false,
            auto_mode: false,
            min_moisture_level: defaults.moisture_threshold_pct,
            check_interval: defaults.check_interval_mins,
            pump_duration: defaults.pump_duration_secs,
        }
    }
}

/// Configuration for the auto-lighting (light relay) widget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LightingConfig {
    pub state: bool,
    pub auto_mode: bool,
    /// Light percentage below which the relay turns ON.
    pub light_threshold: f64,
    /// Closed-loop check cadence (minutes).
    pub check_interval: u64,
}

impl Default for LightingConfig {
    fn default() -> Self {
        let defaults = SessionDefaults::default();
        Self {
            state: false,
            auto_mode: false,
            light_threshold: defaults.light_threshold_pct,
            check_interval: defaults.check_interval_mins,
        }
    }
}

/// Configuration for the webcam widget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebcamConfig {
    pub streaming: bool,
    /// Overlay on-device inference results on the stream.
    pub ml_overlay: bool,
    /// Inference poll cadence while streaming (milliseconds).
    pub inference_interval: u64,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            ml_overlay: false,
            inference_interval: SessionDefaults::default().inference_interval_ms,
        }
    }
}

// ── WidgetKind ──────────────────────────────────────────────────────

/// Every widget kind the dashboard understands, with its typed
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor_type", content = "configuration", rename_all = "snake_case")]
pub enum WidgetKind {
    LedControl(SwitchConfig),
    Moisture(PollConfig),
    TemperatureHumidity(PollConfig),
    Light(PollConfig),
    WaterPump(IrrigationConfig),
    LightControl(LightingConfig),
    Webcam(WebcamConfig),
}

impl WidgetKind {
    /// Moisture sensor with the configured default cadence.
    pub fn moisture(defaults: &SessionDefaults) -> Self {
        Self::Moisture(PollConfig {
            refresh_rate: defaults.moisture_refresh_secs,
        })
    }

    pub fn temperature_humidity(defaults: &SessionDefaults) -> Self {
        Self::TemperatureHumidity(PollConfig {
            refresh_rate: defaults.climate_refresh_secs,
        })
    }

    pub fn light(defaults: &SessionDefaults) -> Self {
        Self::Light(PollConfig {
            refresh_rate: defaults.light_refresh_secs,
        })
    }

    /// The registry's `sensor_type` tag for this kind.
    pub fn sensor_type(&self) -> &'static str {
        match self {
            Self::LedControl(_) => "led_control",
            Self::Moisture(_) => "moisture",
            Self::TemperatureHumidity(_) => "temperature_humidity",
            Self::Light(_) => "light",
            Self::WaterPump(_) => "water_pump",
            Self::LightControl(_) => "light_control",
            Self::Webcam(_) => "webcam",
        }
    }

    /// The registry's `widget_type` tag for this kind.
    pub fn widget_type(&self) -> WidgetType {
        match self {
            Self::Moisture(_) | Self::TemperatureHumidity(_) | Self::Light(_) | Self::Webcam(_) => {
                WidgetType::Sensor
            }
            Self::LedControl(_) | Self::WaterPump(_) | Self::LightControl(_) => WidgetType::Control,
        }
    }

    /// Configuration as the registry's open attribute map.
    pub fn configuration(&self) -> serde_json::Value {
        match self {
            Self::LedControl(c) => serde_json::to_value(c),
            Self::Moisture(c) | Self::TemperatureHumidity(c) | Self::Light(c) => {
                serde_json::to_value(c)
            }
            Self::WaterPump(c) => serde_json::to_value(c),
            Self::LightControl(c) => serde_json::to_value(c),
            Self::Webcam(c) => serde_json::to_value(c),
        }
        .unwrap_or_default()
    }

    /// Rebuild from the registry's `sensor_type` tag and configuration
    /// map. Missing configuration fields fall back to defaults, so rows
    /// written by older revisions still load.
    pub fn from_stored(
        sensor_type: &str,
        configuration: &serde_json::Value,
    ) -> Result<Self, CoreError> {
        fn cfg<T: serde::de::DeserializeOwned + Default>(value: &serde_json::Value) -> T {
            serde_json::from_value(value.clone()).unwrap_or_default()
        }

        match sensor_type {
            "led_control" => Ok(Self::LedControl(cfg(configuration))),
            "moisture" => Ok(Self::Moisture(cfg(configuration))),
            "temperature_humidity" => Ok(Self::TemperatureHumidity(cfg(configuration))),
            "light" => Ok(Self::Light(cfg(configuration))),
            "water_pump" => Ok(Self::WaterPump(cfg(configuration))),
            "light_control" => Ok(Self::LightControl(cfg(configuration))),
            "webcam" => Ok(Self::Webcam(cfg(configuration))),
            other => Err(CoreError::Validation {
                message: format!("unknown sensor_type '{other}'"),
            }),
        }
    }

    /// Firmware default pin for this kind, used when a widget is created
    /// without an explicit pin.
    pub fn default_pin(&self) -> Option<u8> {
        match self {
            Self::LedControl(_) => Some(2),
            Self::TemperatureHumidity(_) => Some(4),
            Self::WaterPump(_) => Some(5),
            Self::LightControl(_) => Some(0),
            Self::Moisture(_) => Some(34),
            Self::Light(_) => Some(35),
            Self::Webcam(_) => None,
        }
    }

    /// Poll cadence for pure sensor kinds.
    pub fn poll_interval(&self) -> Option<Duration> {
        match self {
            Self::Moisture(c) | Self::TemperatureHumidity(c) | Self::Light(c) => {
                Some(Duration::from_secs(c.refresh_rate.max(1)))
            }
            Self::Webcam(c) => Some(Duration::from_millis(c.inference_interval.max(50))),
            Self::LedControl(_) | Self::WaterPump(_) | Self::LightControl(_) => None,
        }
    }

    /// Closed-loop check cadence, for the kinds that automate.
    pub fn check_interval(&self) -> Option<Duration> {
        match self {
            Self::WaterPump(c) => Some(Duration::from_secs(c.check_interval.max(1) * 60)),
            Self::LightControl(c) => Some(Duration::from_secs(c.check_interval.max(1) * 60)),
            _ => None,
        }
    }

    /// Whether automation is currently enabled on this widget.
    pub fn auto_mode(&self) -> bool {
        match self {
            Self::WaterPump(c) => c.auto_mode,
            Self::LightControl(c) => c.auto_mode,
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_stored_form() {
        let kind = WidgetKind::WaterPump(IrrigationConfig {
            state: true,
            auto_mode: true,
            min_moisture_level: 45.0,
            check_interval: 5,
            pump_duration: 20,
        });

        let restored =
            WidgetKind::from_stored(kind.sensor_type(), &kind.configuration()).unwrap();
        assert_eq!(kind, restored);
    }

    #[test]
    fn stored_configuration_uses_original_keys() {
        let kind = WidgetKind::WaterPump(IrrigationConfig::default());
        let config = kind.configuration();
        assert!(config.get("autoMode").is_some());
        assert!(config.get("minMoistureLevel").is_some());
        assert!(config.get("pumpDuration").is_some());
    }

    #[test]
    fn partial_stored_configuration_falls_back_to_defaults() {
        let config = serde_json::json!({ "autoMode": true });
        let kind = WidgetKind::from_stored("water_pump", &config).unwrap();
        match kind {
            WidgetKind::WaterPump(c) => {
                assert!(c.auto_mode);
                assert!((c.min_moisture_level - 30.0).abs() < f64::EPSILON);
            }
            other => panic!("expected WaterPump, got {other:?}"),
        }
    }

    #[test]
    fn unknown_sensor_type_is_rejected() {
        assert!(WidgetKind::from_stored("thermostat", &serde_json::json!({})).is_err());
    }

    #[test]
    fn widget_type_split_matches_kind() {
        let defaults = SessionDefaults::default();
        assert_eq!(
            WidgetKind::moisture(&defaults).widget_type(),
            WidgetType::Sensor
        );
        assert_eq!(
            WidgetKind::WaterPump(IrrigationConfig::default()).widget_type(),
            WidgetType::Control
        );
    }

    #[test]
    fn new_widget_gets_kind_default_pin() {
        let widget = Widget::new(
            UserId::new(),
            MacAddress::new("a4:cf:12:0f:3b:9e"),
            "Pump",
            WidgetKind::WaterPump(IrrigationConfig::default()),
        );
        assert_eq!(widget.pin, Some(5));
    }
}
