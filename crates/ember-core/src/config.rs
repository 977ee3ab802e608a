// ── Runtime tuning defaults ──
//
// These are configuration defaults, not invariants: firmware revisions
// and deployments disagree on the "right" cadence, so every value here
// can be overridden per widget. Core never reads config files — the
// embedding layer (ember-config) builds a `SessionDefaults` and hands
// it in.

/// Defaults applied to newly created widgets and to automation behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    /// Soil-moisture poll cadence (seconds).
    pub moisture_refresh_secs: u64,
    /// Temperature/humidity poll cadence (seconds).
    pub climate_refresh_secs: u64,
    /// Light-level poll cadence (seconds).
    pub light_refresh_secs: u64,
    /// Camera inference overlay cadence while streaming (milliseconds).
    pub inference_interval_ms: u64,
    /// Closed-loop check cadence (minutes).
    pub check_interval_mins: u64,
    /// Auto-shutoff bound for automation-started irrigation (seconds).
    pub pump_duration_secs: u64,
    /// Moisture percentage below which auto irrigation turns ON.
    pub moisture_threshold_pct: f64,
    /// Light percentage below which auto lighting turns ON.
    pub light_threshold_pct: f64,
    /// Gap between the ON and OFF thresholds (percentage points).
    pub hysteresis_band_pct: f64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            moisture_refresh_secs: 10,
            climate_refresh_secs: 5,
            light_refresh_secs: 5,
            inference_interval_ms: 250,
            check_interval_mins: 15,
            pump_duration_secs: 30,
            moisture_threshold_pct: 30.0,
            light_threshold_pct: 30.0,
            hysteresis_band_pct: 10.0,
        }
    }
}
