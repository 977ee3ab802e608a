// In-memory simulated ESP32.
//
// Answers the same contract as real firmware so the session and
// automation layers can be exercised without hardware. Owned and
// injected by whoever builds the [`crate::Transport`] — there is no
// ambient singleton.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Error;
use crate::types::{
    Ack, ActuatorAck, ActuatorState, BoundingBox, CloudConfig, DeviceInfo, InferenceResponse,
    SensorEntry, SensorsResponse,
};

/// Reserved address answered by the simulator when one is installed on
/// the transport. All other addresses pass through to HTTP unmodified.
pub const SIMULATED_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 200);

/// MAC reported by the simulated device (Espressif OUI).
pub const SIMULATED_MAC: &str = "24:0a:c4:00:51:ee";

struct SimState {
    rng: StdRng,
    walk: bool,
    led_on: bool,
    relay_on: bool,
    temperature: f64,
    humidity: f64,
    soil_moisture_pct: f64,
    light_pct: f64,
    relay_pin: u8,
    led_pin: u8,
    dht_pin: u8,
    moisture_pin: u8,
    light_pin: u8,
    moisture_interval_ms: u64,
    pump_check_interval_ms: u64,
    cloud: Option<CloudConfig>,
    detections: Vec<BoundingBox>,
    reject_actuators: bool,
    reject_config: bool,
    reject_sensors: bool,
    info_calls: u64,
    started: Instant,
    latency: Option<Duration>,
}

/// Handle to one simulated device. Cloning shares the underlying state,
/// so a test can hold a handle while the transport answers from it.
#[derive(Clone)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<SimState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::with_seed(0x5eed_e5b3_2u64)
    }

    /// Deterministic simulator: the random walk is reproducible for a
    /// given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                rng: StdRng::seed_from_u64(seed),
                walk: true,
                led_on: false,
                relay_on: false,
                temperature: 23.5,
                humidity: 65.0,
                soil_moisture_pct: 42.0,
                light_pct: 78.0,
                relay_pin: 5,
                led_pin: 2,
                dht_pin: 4,
                moisture_pin: 34,
                light_pin: 35,
                moisture_interval_ms: 10_000,
                pump_check_interval_ms: 900_000,
                cloud: None,
                detections: Vec::new(),
                reject_actuators: false,
                reject_config: false,
                reject_sensors: false,
                info_calls: 0,
                started: Instant::now(),
                latency: None,
            })),
        }
    }

    /// Emulate device latency: the transport sleeps this long before
    /// answering from the simulator.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        self.state().latency
    }

    // ── Test controls ────────────────────────────────────────────────

    /// Disable the random walk so readings stay exactly where tests put
    /// them.
    pub fn freeze(&self) {
        self.state().walk = false;
    }

    pub fn set_temperature(&self, celsius: f64) {
        self.state().temperature = celsius;
    }

    pub fn set_humidity(&self, pct: f64) {
        self.state().humidity = pct;
    }

    pub fn set_soil_moisture(&self, pct: f64) {
        self.state().soil_moisture_pct = pct;
    }

    pub fn set_light_level(&self, pct: f64) {
        self.state().light_pct = pct;
    }

    pub fn set_detections(&self, boxes: Vec<BoundingBox>) {
        self.state().detections = boxes;
    }

    /// Fault injection: actuator commands answer `success: false`.
    pub fn reject_actuator_commands(&self, reject: bool) {
        self.state().reject_actuators = reject;
    }

    /// Fault injection: pin/interval configuration answers
    /// `success: false`.
    pub fn reject_config_commands(&self, reject: bool) {
        self.state().reject_config = reject;
    }

    /// Fault injection: sensor reads fail, as an offline device would.
    pub fn reject_sensor_reads(&self, reject: bool) {
        self.state().reject_sensors = reject;
    }

    /// How many times `/info` has been answered — lets tests assert
    /// that a suppressed reconnect sweep attempted nothing.
    pub fn info_call_count(&self) -> u64 {
        self.state().info_calls
    }

    /// Device-confirmed relay state, for assertions.
    pub fn relay_on(&self) -> bool {
        self.state().relay_on
    }

    pub fn led_on(&self) -> bool {
        self.state().led_on
    }

    pub fn relay_pin(&self) -> u8 {
        self.state().relay_pin
    }

    pub fn led_pin(&self) -> u8 {
        self.state().led_pin
    }

    pub fn dht_pin(&self) -> u8 {
        self.state().dht_pin
    }

    pub fn moisture_pin(&self) -> u8 {
        self.state().moisture_pin
    }

    pub fn light_pin(&self) -> u8 {
        self.state().light_pin
    }

    pub fn moisture_interval_ms(&self) -> u64 {
        self.state().moisture_interval_ms
    }

    pub fn pump_check_interval_ms(&self) -> u64 {
        self.state().pump_check_interval_ms
    }

    // ── Contract endpoints ───────────────────────────────────────────

    pub(crate) fn info(&self) -> DeviceInfo {
        let mut state = self.state();
        state.info_calls += 1;
        DeviceInfo {
            mac: Some(SIMULATED_MAC.to_owned()),
            status: Some("online".into()),
            ip: Some(SIMULATED_ADDR.to_string()),
            device: Some("ESP32-SIM".into()),
            uptime: Some(state.started.elapsed().as_secs()),
            free_heap: Some(120_000),
        }
    }

    pub(crate) fn sensors(&self) -> Result<SensorsResponse, Error> {
        let mut state = self.state();
        if state.reject_sensors {
            return Err(Error::Protocol {
                message: "sensor read failed".into(),
            });
        }
        if state.walk {
            step(&mut state);
        }

        let soil_raw = (1.0 - state.soil_moisture_pct / 100.0) * crate::sensors::ADC_MAX;
        let light_raw = state.light_pct / 100.0 * crate::sensors::ADC_MAX;

        Ok(SensorsResponse {
            sensors: vec![
                entry("temperature", "temperature", state.temperature, None, "°C"),
                entry("humidity", "humidity", state.humidity, None, "%"),
                entry(
                    "soil_moisture",
                    "soil",
                    soil_raw,
                    Some(state.soil_moisture_pct),
                    "%",
                ),
                entry("light", "light", light_raw, Some(state.light_pct), "%"),
            ],
            extra: serde_json::Map::new(),
        })
    }

    pub(crate) fn led_state(&self) -> ActuatorState {
        ActuatorState {
            state: self.state().led_on,
        }
    }

    pub fn set_led(&self, on: bool) -> Result<ActuatorAck, Error> {
        let mut state = self.state();
        if state.reject_actuators {
            return Err(Error::Protocol {
                message: "LED command rejected".into(),
            });
        }
        state.led_on = on;
        Ok(ActuatorAck {
            success: true,
            state: on,
            error: None,
        })
    }

    pub(crate) fn relay_state(&self) -> ActuatorState {
        ActuatorState {
            state: self.state().relay_on,
        }
    }

    pub fn set_relay(&self, on: bool) -> Result<ActuatorAck, Error> {
        let mut state = self.state();
        if state.reject_actuators {
            return Err(Error::Protocol {
                message: "relay command rejected".into(),
            });
        }
        state.relay_on = on;
        Ok(ActuatorAck {
            success: true,
            state: on,
            error: None,
        })
    }

    pub(crate) fn set_pin(&self, which: PinTarget, pin: u8) -> Result<Ack, Error> {
        let mut state = self.state();
        if state.reject_config {
            return Err(Error::Protocol {
                message: "pin update rejected".into(),
            });
        }
        let label = match which {
            PinTarget::Relay => {
                state.relay_pin = pin;
                "Relay"
            }
            PinTarget::Led => {
                state.led_pin = pin;
                "LED"
            }
            PinTarget::Dht => {
                state.dht_pin = pin;
                "DHT"
            }
            PinTarget::Moisture => {
                state.moisture_pin = pin;
                "Moisture"
            }
            PinTarget::Light => {
                state.light_pin = pin;
                "Light"
            }
        };
        Ok(ok_ack(format!("{label} pin set to {pin}")))
    }

    pub(crate) fn set_moisture_interval(&self, interval_ms: u64) -> Result<Ack, Error> {
        let mut state = self.state();
        if state.reject_config {
            return Err(Error::Protocol {
                message: "interval update rejected".into(),
            });
        }
        state.moisture_interval_ms = interval_ms;
        Ok(ok_ack(format!("Moisture interval set to {interval_ms}")))
    }

    pub(crate) fn set_pump_check_interval(&self, interval_ms: u64) -> Result<Ack, Error> {
        let mut state = self.state();
        if state.reject_config {
            return Err(Error::Protocol {
                message: "interval update rejected".into(),
            });
        }
        state.pump_check_interval_ms = interval_ms;
        Ok(ok_ack(format!("Pump check interval set to {interval_ms}")))
    }

    pub(crate) fn inference(&self) -> InferenceResponse {
        let state = self.state();
        InferenceResponse {
            has_results: !state.detections.is_empty(),
            bounding_boxes: state.detections.clone(),
        }
    }

    pub(crate) fn reset(&self, what: &str) -> Ack {
        ok_ack(format!("{what} reset"))
    }

    pub(crate) fn cloud_config(&self) -> CloudConfig {
        self.state().cloud.clone().unwrap_or_default()
    }

    pub(crate) fn set_cloud_config(&self, config: &CloudConfig) -> Ack {
        self.state().cloud = Some(config.clone());
        ok_ack("Cloud configuration updated".into())
    }

    pub(crate) fn clear_cloud_config(&self) -> Ack {
        self.state().cloud = None;
        ok_ack("Cloud configuration cleared".into())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PinTarget {
    Relay,
    Led,
    Dht,
    Moisture,
    Light,
}

fn ok_ack(message: String) -> Ack {
    Ack {
        success: true,
        message: Some(message),
        error: None,
    }
}

fn entry(id: &str, kind: &str, value: f64, percentage: Option<f64>, unit: &str) -> SensorEntry {
    SensorEntry {
        id: Some(id.to_owned()),
        kind: Some(kind.to_owned()),
        name: None,
        value: Some(value),
        percentage,
        unit: Some(unit.to_owned()),
    }
}

/// Advance the bounded random walk one step. Amplitudes and bounds match
/// the sensor families the firmware ships with.
fn step(state: &mut SimState) {
    let mut nudge = |amplitude: f64| state.rng.gen_range(-amplitude..=amplitude);

    let t = nudge(1.0);
    let h = nudge(2.5);
    let s = nudge(1.5);
    let l = nudge(4.0);

    state.temperature = (state.temperature + t).clamp(10.0, 35.0);
    state.humidity = (state.humidity + h).clamp(30.0, 90.0);
    state.soil_moisture_pct = (state.soil_moisture_pct + s).clamp(10.0, 90.0);
    state.light_pct = (state.light_pct + l).clamp(5.0, 95.0);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn actuator_toggle_is_remembered() {
        let sim = SimulatedDevice::new();
        assert!(!sim.relay_state().state);

        sim.set_relay(true).unwrap();
        assert!(sim.relay_state().state);

        sim.set_relay(false).unwrap();
        assert!(!sim.relay_state().state);
    }

    #[test]
    fn random_walk_stays_in_bounds() {
        let sim = SimulatedDevice::with_seed(7);
        for _ in 0..500 {
            let payload = sim.sensors().unwrap();
            for entry in &payload.sensors {
                if let Some(pct) = entry.percentage {
                    assert!((0.0..=100.0).contains(&pct), "percentage out of range");
                }
            }
        }
    }

    #[test]
    fn frozen_readings_stay_put() {
        let sim = SimulatedDevice::new();
        sim.freeze();
        sim.set_soil_moisture(25.0);

        for _ in 0..3 {
            let payload = sim.sensors().unwrap();
            let soil = payload
                .sensors
                .iter()
                .find(|e| e.id.as_deref() == Some("soil_moisture"))
                .unwrap();
            assert!((soil.percentage.unwrap() - 25.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn rejected_config_reports_protocol_error() {
        let sim = SimulatedDevice::new();
        sim.reject_config_commands(true);

        let err = sim.set_moisture_interval(5_000).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        // Value unchanged on rejection.
        assert_eq!(sim.moisture_interval_ms(), 10_000);
    }

    #[test]
    fn cloud_config_round_trip() {
        let sim = SimulatedDevice::new();
        let cfg = CloudConfig {
            supabase_url: "https://example.supabase.co".into(),
            supabase_api_key: "anon".into(),
            data_config: crate::types::DataToggles::default(),
        };
        sim.set_cloud_config(&cfg);
        assert_eq!(sim.cloud_config().supabase_url, cfg.supabase_url);

        sim.clear_cloud_config();
        assert!(sim.cloud_config().supabase_url.is_empty());
    }
}
