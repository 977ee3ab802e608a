// Sensor payload normalization.
//
// Devices report sensors in several shapes: an array of typed entries,
// a `{value, percentage}` pair, or a bare top-level field. Callers ask
// for a kind; the search order is (a) array entry matched by known
// synonyms, (b) bare field with a kind-specific name, (c) not found.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::{SensorEntry, SensorsResponse};

/// Full scale of the ESP32's 12-bit ADC.
pub const ADC_MAX: f64 = 4095.0;

/// The sensor kinds the dashboard understands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    SoilMoisture,
    Light,
}

impl SensorKind {
    /// Names accepted for this kind in an entry's `type`, `id`, or
    /// `name` field. Matching is case-insensitive.
    fn synonyms(self) -> &'static [&'static str] {
        match self {
            Self::Temperature => &["temperature", "temp", "dht_temperature"],
            Self::Humidity => &["humidity", "hum", "dht_humidity"],
            Self::SoilMoisture => &["soil", "soil_moisture", "moisture"],
            Self::Light => &["light", "light_level", "ldr", "lux"],
        }
    }

    /// Bare top-level field names used by legacy firmware.
    fn bare_fields(self) -> &'static [&'static str] {
        match self {
            Self::Temperature => &["temperature"],
            Self::Humidity => &["humidity"],
            Self::SoilMoisture => &["soil_moisture", "moisture"],
            Self::Light => &["light"],
        }
    }

    /// Whether the raw reading is ADC counts needing percentage
    /// conversion (as opposed to an already-meaningful unit).
    fn is_adc(self) -> bool {
        matches!(self, Self::SoilMoisture | Self::Light)
    }
}

/// A normalized sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub kind: SensorKind,
    /// Raw value as reported, when present.
    pub raw: Option<f64>,
    /// Normalized value: °C, %RH, or a `[0, 100]` percentage for
    /// ADC-backed kinds.
    pub value: f64,
    pub unit: Option<String>,
}

/// Moisture percentage from a raw ADC reading. Inverted: wetter soil
/// means lower resistance, so a lower raw count.
pub fn moisture_percentage(raw: f64) -> f64 {
    100.0 - (raw / ADC_MAX * 100.0).clamp(0.0, 100.0)
}

/// Light percentage from a raw ADC reading (direct scale).
pub fn light_percentage(raw: f64) -> f64 {
    (raw / ADC_MAX * 100.0).clamp(0.0, 100.0)
}

/// Find and normalize the reading for `kind` in a `/sensors` payload.
///
/// Returns `None` when the payload carries nothing recognizable for the
/// requested kind.
pub fn find_reading(kind: SensorKind, payload: &SensorsResponse) -> Option<SensorReading> {
    if let Some(entry) = payload.sensors.iter().find(|e| entry_matches(kind, e)) {
        return normalize_entry(kind, entry);
    }

    for field in kind.bare_fields() {
        if let Some(raw) = payload.extra.get(*field).and_then(serde_json::Value::as_f64) {
            return Some(SensorReading {
                kind,
                raw: Some(raw),
                value: scale(kind, raw),
                unit: None,
            });
        }
    }

    None
}

fn entry_matches(kind: SensorKind, entry: &SensorEntry) -> bool {
    let fields = [&entry.kind, &entry.id, &entry.name];
    fields.into_iter().flatten().any(|field| {
        let field = field.to_lowercase();
        kind.synonyms().iter().any(|syn| field == *syn)
    })
}

fn normalize_entry(kind: SensorKind, entry: &SensorEntry) -> Option<SensorReading> {
    // Firmware-computed percentage wins when present.
    let value = match (entry.percentage, entry.value) {
        (Some(pct), _) if kind.is_adc() => pct.clamp(0.0, 100.0),
        (_, Some(raw)) => scale(kind, raw),
        (Some(pct), None) => pct.clamp(0.0, 100.0),
        (None, None) => return None,
    };

    Some(SensorReading {
        kind,
        raw: entry.value,
        value,
        unit: entry.unit.clone(),
    })
}

fn scale(kind: SensorKind, raw: f64) -> f64 {
    match kind {
        SensorKind::SoilMoisture => moisture_percentage(raw),
        SensorKind::Light => light_percentage(raw),
        // DHT readings are already in °C / %RH.
        SensorKind::Temperature | SensorKind::Humidity => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> SensorsResponse {
        serde_json::from_str(json).expect("payload parses")
    }

    #[test]
    fn moisture_percentage_inverts_raw_scale() {
        assert!((moisture_percentage(0.0) - 100.0).abs() < f64::EPSILON);
        assert!(moisture_percentage(4095.0).abs() < f64::EPSILON);
        assert!((moisture_percentage(2047.5) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn moisture_percentage_clamps_out_of_range_raw() {
        assert!((moisture_percentage(-50.0) - 100.0).abs() < f64::EPSILON);
        assert!(moisture_percentage(9000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn light_percentage_is_direct() {
        assert!(light_percentage(0.0).abs() < f64::EPSILON);
        assert!((light_percentage(4095.0) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn array_entry_matched_by_type_synonym() {
        let p = payload(r#"{"sensors":[{"id":"s1","type":"soil","value":1000}]}"#);
        let reading = find_reading(SensorKind::SoilMoisture, &p).expect("found");
        assert!((reading.value - moisture_percentage(1000.0)).abs() < 1e-9);
    }

    #[test]
    fn array_entry_matched_by_id_when_type_differs() {
        let p = payload(r#"{"sensors":[{"id":"soil_moisture","type":"analog","value":1000}]}"#);
        assert!(find_reading(SensorKind::SoilMoisture, &p).is_some());
    }

    #[test]
    fn firmware_percentage_preferred_over_raw() {
        let p = payload(r#"{"sensors":[{"type":"light","value":0,"percentage":77.0}]}"#);
        let reading = find_reading(SensorKind::Light, &p).expect("found");
        assert!((reading.value - 77.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bare_field_fallback() {
        let p = payload(r#"{"light": 2048}"#);
        let reading = find_reading(SensorKind::Light, &p).expect("found");
        assert!((reading.value - light_percentage(2048.0)).abs() < 1e-9);
    }

    #[test]
    fn temperature_value_passes_through_unscaled() {
        let p = payload(r#"{"sensors":[{"type":"temperature","value":23.5,"unit":"°C"}]}"#);
        let reading = find_reading(SensorKind::Temperature, &p).expect("found");
        assert!((reading.value - 23.5).abs() < f64::EPSILON);
        assert_eq!(reading.unit.as_deref(), Some("°C"));
    }

    #[test]
    fn missing_kind_is_none() {
        let p = payload(r#"{"sensors":[{"type":"temperature","value":23.5}]}"#);
        assert!(find_reading(SensorKind::Light, &p).is_none());
    }
}
