// Shared transport configuration and call routing.
//
// `TransportConfig` owns the reqwest builder settings every device call
// shares. `Transport` is the seam the core layers talk through: calls
// aimed at the reserved simulator address are answered in-process when a
// simulator is installed, everything else goes out over HTTP. Selection
// happens at construction time — nothing global is patched.

use std::net::Ipv4Addr;
use std::time::Duration;

use url::Url;

use crate::client::DeviceClient;
use crate::error::Error;
use crate::sim::{PinTarget, SIMULATED_ADDR, SimulatedDevice};
use crate::types::{
    Ack, ActuatorAck, ActuatorState, CloudConfig, DeviceInfo, InferenceResponse, SensorsResponse,
};

/// Shared settings for building the HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout, independent of any polling cadence.
    pub timeout: Duration,
    /// Device HTTP port. Real firmware serves on 80; tests point this at
    /// a loopback mock server.
    pub port: u16,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(4),
            port: 80,
            user_agent: concat!("ember/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        Ok(reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()?)
    }
}

/// The call seam between the core layers and devices.
#[derive(Clone)]
pub struct Transport {
    http: DeviceClient,
    simulator: Option<SimulatedDevice>,
}

enum Target<'a> {
    Http,
    Sim(&'a SimulatedDevice),
}

impl Transport {
    /// HTTP-only transport.
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: DeviceClient::new(config)?,
            simulator: None,
        })
    }

    /// Install a simulator answering calls to [`SIMULATED_ADDR`].
    pub fn with_simulator(mut self, sim: SimulatedDevice) -> Self {
        self.simulator = Some(sim);
        self
    }

    pub fn simulator(&self) -> Option<&SimulatedDevice> {
        self.simulator.as_ref()
    }

    fn target(&self, ip: Ipv4Addr) -> Target<'_> {
        match &self.simulator {
            Some(sim) if ip == SIMULATED_ADDR => Target::Sim(sim),
            _ => Target::Http,
        }
    }

    /// Emulated device latency, when the simulator is configured with
    /// one. Keeps simulated calls honest suspension points.
    async fn sim_delay(sim: &SimulatedDevice) {
        if let Some(latency) = sim.latency() {
            tokio::time::sleep(latency).await;
        }
    }

    // ── Contract surface ─────────────────────────────────────────────

    pub async fn info(&self, ip: Ipv4Addr) -> Result<DeviceInfo, Error> {
        match self.target(ip) {
            Target::Http => self.http.info(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.info())
            }
        }
    }

    pub async fn sensors(&self, ip: Ipv4Addr) -> Result<SensorsResponse, Error> {
        match self.target(ip) {
            Target::Http => self.http.sensors(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.sensors()
            }
        }
    }

    pub async fn led_state(&self, ip: Ipv4Addr) -> Result<ActuatorState, Error> {
        match self.target(ip) {
            Target::Http => self.http.led_state(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.led_state())
            }
        }
    }

    pub async fn set_led(
        &self,
        ip: Ipv4Addr,
        state: bool,
        pin: Option<u8>,
    ) -> Result<ActuatorAck, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_led(ip, state, pin).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_led(state)
            }
        }
    }

    pub async fn relay_state(&self, ip: Ipv4Addr) -> Result<ActuatorState, Error> {
        match self.target(ip) {
            Target::Http => self.http.relay_state(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.relay_state())
            }
        }
    }

    pub async fn set_relay(
        &self,
        ip: Ipv4Addr,
        state: bool,
        pin: Option<u8>,
    ) -> Result<ActuatorAck, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_relay(ip, state, pin).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_relay(state)
            }
        }
    }

    pub async fn set_relay_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_relay_pin(ip, pin).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_pin(PinTarget::Relay, pin)
            }
        }
    }

    pub async fn set_led_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_led_pin(ip, pin).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_pin(PinTarget::Led, pin)
            }
        }
    }

    pub async fn set_dht_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_dht_pin(ip, pin).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_pin(PinTarget::Dht, pin)
            }
        }
    }

    pub async fn set_moisture_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_moisture_pin(ip, pin).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_pin(PinTarget::Moisture, pin)
            }
        }
    }

    pub async fn set_light_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_light_pin(ip, pin).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_pin(PinTarget::Light, pin)
            }
        }
    }

    pub async fn set_moisture_interval(
        &self,
        ip: Ipv4Addr,
        interval_ms: u64,
    ) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_moisture_interval(ip, interval_ms).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_moisture_interval(interval_ms)
            }
        }
    }

    pub async fn set_pump_check_interval(
        &self,
        ip: Ipv4Addr,
        interval_ms: u64,
    ) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_pump_check_interval(ip, interval_ms).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                sim.set_pump_check_interval(interval_ms)
            }
        }
    }

    pub async fn inference(&self, ip: Ipv4Addr) -> Result<InferenceResponse, Error> {
        match self.target(ip) {
            Target::Http => self.http.inference(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.inference())
            }
        }
    }

    pub async fn reset_camera(&self, ip: Ipv4Addr) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.reset_camera(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.reset("Camera"))
            }
        }
    }

    pub async fn hard_reset(&self, ip: Ipv4Addr) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.hard_reset(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.reset("Device"))
            }
        }
    }

    pub async fn reset_streams(&self, ip: Ipv4Addr) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.reset_streams(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.reset("Streams"))
            }
        }
    }

    pub async fn cloud_config(&self, ip: Ipv4Addr) -> Result<CloudConfig, Error> {
        match self.target(ip) {
            Target::Http => self.http.cloud_config(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.cloud_config())
            }
        }
    }

    pub async fn set_cloud_config(&self, ip: Ipv4Addr, config: &CloudConfig) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.set_cloud_config(ip, config).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.set_cloud_config(config))
            }
        }
    }

    pub async fn clear_cloud_config(&self, ip: Ipv4Addr) -> Result<Ack, Error> {
        match self.target(ip) {
            Target::Http => self.http.clear_cloud_config(ip).await,
            Target::Sim(sim) => {
                Self::sim_delay(sim).await;
                Ok(sim.clear_cloud_config())
            }
        }
    }

    /// MJPEG stream URL. The simulator has no stream to serve, so the
    /// URL is built the same way for every target.
    pub fn stream_url(&self, ip: Ipv4Addr) -> Result<Url, Error> {
        self.http.stream_url(ip)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserved_address_routes_to_simulator() {
        let sim = SimulatedDevice::new();
        let transport = Transport::new(&TransportConfig::default())
            .unwrap()
            .with_simulator(sim.clone());

        let info = transport.info(SIMULATED_ADDR).await.unwrap();
        assert_eq!(info.mac.as_deref(), Some(crate::sim::SIMULATED_MAC));

        transport.set_relay(SIMULATED_ADDR, true, None).await.unwrap();
        assert!(sim.relay_on());
    }

    #[tokio::test]
    async fn other_addresses_pass_through_to_http() {
        // No server listening — the call must fail with a transport
        // error rather than being answered by the simulator.
        let transport = Transport::new(&TransportConfig {
            timeout: Duration::from_millis(200),
            ..TransportConfig::default()
        })
        .unwrap()
        .with_simulator(SimulatedDevice::new());

        let err = transport
            .info(Ipv4Addr::new(127, 0, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Unreachable(_) | Error::Timeout { .. }
        ));
    }
}
