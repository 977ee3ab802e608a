// Hand-crafted async HTTP client for the ESP32 device contract.
//
// Every call is a single bounded-timeout request against
// `http://{ip}:{port}/{endpoint}`. No retries here — retry policy
// belongs to callers.

use std::net::Ipv4Addr;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::transport::TransportConfig;
use crate::types::{
    Ack, ActuatorAck, ActuatorRequest, ActuatorState, CloudConfig, DeviceInfo, InferenceResponse,
    IntervalRequest, PinRequest, SensorsResponse,
};

/// Async client for one ESP32-class device family.
///
/// Stateless per call: the target IP is a parameter, so a single client
/// (and its connection pool) serves the whole fleet.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    port: u16,
    timeout_secs: u64,
}

impl DeviceClient {
    /// Build from a transport config.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            port: transport.port,
            timeout_secs: transport.timeout.as_secs(),
        })
    }

    /// Wrap an existing `reqwest::Client` (caller manages timeouts).
    pub fn from_reqwest(http: reqwest::Client, port: u16, timeout_secs: u64) -> Self {
        Self {
            http,
            port,
            timeout_secs,
        }
    }

    // ── URL builder ──────────────────────────────────────────────────

    fn url(&self, ip: Ipv4Addr, path: &str) -> Result<Url, Error> {
        Ok(Url::parse(&format!("http://{ip}:{}/{path}", self.port))?)
    }

    /// MJPEG stream URL for `ip`, cache-busted so a re-mounted consumer
    /// gets a fresh stream instead of a stale cached frame.
    pub fn stream_url(&self, ip: Ipv4Addr) -> Result<Url, Error> {
        let ts = chrono::Utc::now().timestamp_millis();
        self.url(ip, &format!("stream?t={ts}"))
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, ip: Ipv4Addr, path: &str) -> Result<T, Error> {
        let url = self.url(ip, path)?;
        debug!("GET {url}");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.translate(e))?;
        self.handle_response(resp).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        ip: Ipv4Addr,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(ip, path)?;
        debug!("POST {url}");

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.translate(e))?;
        self.handle_response(resp).await
    }

    // ── Response handling ────────────────────────────────────────────

    fn translate(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Unreachable(err)
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        // Non-2xx means the device (or something between us and it) is
        // not serving the contract — callers treat it as unreachable.
        let resp = resp.error_for_status()?;

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview = &body[..body.len().min(200)];
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }

    /// Promote `success: false` acks into [`Error::Protocol`].
    fn require_ack(ack: Ack, what: &str) -> Result<Ack, Error> {
        if ack.success {
            Ok(ack)
        } else {
            Err(Error::Protocol {
                message: ack
                    .error
                    .or(ack.message)
                    .unwrap_or_else(|| format!("{what} rejected by device")),
            })
        }
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    // ── Identity and sensors ─────────────────────────────────────────

    pub async fn info(&self, ip: Ipv4Addr) -> Result<DeviceInfo, Error> {
        self.get(ip, "info").await
    }

    pub async fn sensors(&self, ip: Ipv4Addr) -> Result<SensorsResponse, Error> {
        self.get(ip, "sensors").await
    }

    // ── Actuators ────────────────────────────────────────────────────

    pub async fn led_state(&self, ip: Ipv4Addr) -> Result<ActuatorState, Error> {
        self.get(ip, "led").await
    }

    pub async fn set_led(
        &self,
        ip: Ipv4Addr,
        state: bool,
        pin: Option<u8>,
    ) -> Result<ActuatorAck, Error> {
        let ack: ActuatorAck = self.post(ip, "led", &ActuatorRequest { state, pin }).await?;
        if ack.success {
            Ok(ack)
        } else {
            Err(Error::Protocol {
                message: ack.error.unwrap_or_else(|| "LED command rejected".into()),
            })
        }
    }

    pub async fn relay_state(&self, ip: Ipv4Addr) -> Result<ActuatorState, Error> {
        self.get(ip, "relay").await
    }

    pub async fn set_relay(
        &self,
        ip: Ipv4Addr,
        state: bool,
        pin: Option<u8>,
    ) -> Result<ActuatorAck, Error> {
        let ack: ActuatorAck = self
            .post(ip, "relay", &ActuatorRequest { state, pin })
            .await?;
        if ack.success {
            Ok(ack)
        } else {
            Err(Error::Protocol {
                message: ack.error.unwrap_or_else(|| "relay command rejected".into()),
            })
        }
    }

    // ── Pin configuration ────────────────────────────────────────────

    pub async fn set_relay_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        let ack = self.post(ip, "set-relay-pin", &PinRequest { pin }).await?;
        Self::require_ack(ack, "relay pin")
    }

    pub async fn set_led_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        let ack = self.post(ip, "set-led-pin", &PinRequest { pin }).await?;
        Self::require_ack(ack, "LED pin")
    }

    pub async fn set_dht_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        let ack = self.post(ip, "set-dht-pin", &PinRequest { pin }).await?;
        Self::require_ack(ack, "DHT pin")
    }

    pub async fn set_moisture_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        let ack = self
            .post(ip, "set-moisture-pin", &PinRequest { pin })
            .await?;
        Self::require_ack(ack, "moisture pin")
    }

    pub async fn set_light_pin(&self, ip: Ipv4Addr, pin: u8) -> Result<Ack, Error> {
        let ack = self.post(ip, "set-light-pin", &PinRequest { pin }).await?;
        Self::require_ack(ack, "light pin")
    }

    // ── Interval configuration ───────────────────────────────────────

    pub async fn set_moisture_interval(&self, ip: Ipv4Addr, interval_ms: u64) -> Result<Ack, Error> {
        let ack = self
            .post(
                ip,
                "set-moisture-interval",
                &IntervalRequest {
                    interval: interval_ms,
                },
            )
            .await?;
        Self::require_ack(ack, "moisture interval")
    }

    pub async fn set_pump_check_interval(
        &self,
        ip: Ipv4Addr,
        interval_ms: u64,
    ) -> Result<Ack, Error> {
        let ack = self
            .post(
                ip,
                "set-pump-check-interval",
                &IntervalRequest {
                    interval: interval_ms,
                },
            )
            .await?;
        Self::require_ack(ack, "pump check interval")
    }

    // ── Camera ───────────────────────────────────────────────────────

    pub async fn inference(&self, ip: Ipv4Addr) -> Result<InferenceResponse, Error> {
        self.get(ip, "inference").await
    }

    pub async fn reset_camera(&self, ip: Ipv4Addr) -> Result<Ack, Error> {
        let ack = self.get(ip, "reset-camera").await?;
        Self::require_ack(ack, "camera reset")
    }

    pub async fn hard_reset(&self, ip: Ipv4Addr) -> Result<Ack, Error> {
        let ack = self.get(ip, "hard-reset").await?;
        Self::require_ack(ack, "hard reset")
    }

    pub async fn reset_streams(&self, ip: Ipv4Addr) -> Result<Ack, Error> {
        let ack = self.get(ip, "reset-streams").await?;
        Self::require_ack(ack, "stream reset")
    }

    // ── Cloud-sync configuration ─────────────────────────────────────

    pub async fn cloud_config(&self, ip: Ipv4Addr) -> Result<CloudConfig, Error> {
        self.get(ip, "get-supabase-config").await
    }

    pub async fn set_cloud_config(&self, ip: Ipv4Addr, config: &CloudConfig) -> Result<Ack, Error> {
        let ack = self.post(ip, "set-supabase-config", config).await?;
        Self::require_ack(ack, "cloud config")
    }

    pub async fn clear_cloud_config(&self, ip: Ipv4Addr) -> Result<Ack, Error> {
        let ack = self.get(ip, "clear-supabase-config").await?;
        Self::require_ack(ack, "cloud config clear")
    }
}
