use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::ids::{DeviceId, MacAddress, UserId};

/// A registered ESP32-class node reachable by IP.
///
/// Identity is the registry-assigned [`DeviceId`]; the MAC address is the
/// secondary natural key widgets attach to. The IP is kept as entered —
/// it is validated to an IPv4 literal only when a connection is actually
/// attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub owner: UserId,
    pub name: String,
    pub mac: MacAddress,
    pub ip_address: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// New device record for manual registration. The MAC starts as a
    /// placeholder and is replaced by the device-reported one on first
    /// successful connection.
    pub fn new(owner: UserId, name: impl Into<String>, ip_address: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DeviceId::new(),
            owner,
            name: name.into(),
            mac: placeholder_mac(),
            ip_address,
            last_connected_at: None,
            is_favorite: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Device row for the built-in simulated ESP32, registered at the
    /// reserved simulator address so it flows through the same code
    /// paths as real hardware.
    pub fn simulated(owner: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: DeviceId::new(),
            owner,
            name: "Simulated ESP32".into(),
            mac: MacAddress::new(ember_api::SIMULATED_MAC),
            ip_address: Some(ember_api::SIMULATED_ADDR.to_string()),
            last_connected_at: None,
            is_favorite: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The device's IP as a validated IPv4 literal.
    pub fn ipv4(&self) -> Result<Ipv4Addr, CoreError> {
        let raw = self.ip_address.as_deref().ok_or(CoreError::MissingAddress)?;
        raw.parse().map_err(|_| CoreError::InvalidAddress {
            address: raw.to_owned(),
        })
    }
}

/// Placeholder MAC for devices that have not reported theirs yet.
fn placeholder_mac() -> MacAddress {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    MacAddress::new(format!("esp32-{}", &suffix[..6]))
}

/// Display ordering used by the dashboard: favorites first, newest
/// within each group.
pub fn sort_for_display(devices: &mut [Device]) {
    devices.sort_by(|a, b| {
        b.is_favorite
            .cmp(&a.is_favorite)
            .then(b.created_at.cmp(&a.created_at))
    });
}

/// Parse a batch IP entry: newline- or comma-separated IPv4 literals.
///
/// The whole batch is validated before anything is registered; invalid
/// entries are reported together so the user can fix them in one pass.
pub fn parse_ip_batch(input: &str) -> Result<Vec<Ipv4Addr>, CoreError> {
    let entries: Vec<&str> = input
        .split(['\n', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if entries.is_empty() {
        return Err(CoreError::Validation {
            message: "enter at least one IP address".into(),
        });
    }

    let invalid: Vec<&str> = entries
        .iter()
        .filter(|s| s.parse::<Ipv4Addr>().is_err())
        .copied()
        .collect();

    if !invalid.is_empty() {
        return Err(CoreError::InvalidAddress {
            address: invalid.join(", "),
        });
    }

    Ok(entries
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect())
}
