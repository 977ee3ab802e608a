// ember-api: async client for the ESP32 dashboard device HTTP contract.
//
// One `DeviceClient` serves the whole fleet (the target IP is a call
// parameter). `Transport` composes the client with an optional
// in-memory `SimulatedDevice` so the higher layers can run against
// hardware and simulation through the same seam.

pub mod client;
pub mod error;
pub mod sensors;
pub mod sim;
pub mod transport;
pub mod types;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::DeviceClient;
pub use error::Error;
pub use sensors::{SensorKind, SensorReading, find_reading, light_percentage, moisture_percentage};
pub use sim::{SIMULATED_ADDR, SIMULATED_MAC, SimulatedDevice};
pub use transport::{Transport, TransportConfig};
pub use types::{
    Ack, ActuatorAck, ActuatorState, BoundingBox, CloudConfig, DataToggles, DeviceInfo,
    InferenceResponse, SensorEntry, SensorsResponse,
};
