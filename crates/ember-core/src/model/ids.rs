// ── Core identity types ──
//
// Registry-assigned UUIDs for devices, widgets, and owners, plus the
// normalized MAC address that ties widgets to physical hardware across
// re-registration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id! {
    /// Registry-assigned device identity.
    DeviceId
}

uuid_id! {
    /// Registry-assigned widget identity.
    WidgetId
}

uuid_id! {
    /// Authenticated owner identity, as issued by the identity provider.
    UserId
}

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated form.
///
/// The secondary natural key for devices: widgets reference their device
/// by MAC so they survive the device row being deleted and re-added.
/// Placeholder MACs (assigned before the device first reports its real
/// one) are kept verbatim apart from normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Normalize from any common format: colon-separated,
    /// dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase().replace('-', ":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn device_id_round_trips_through_display() {
        let id = DeviceId::new();
        let parsed: DeviceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn mac_address_normalizes_case_and_dashes() {
        let mac = MacAddress::new("A4-CF-12-0F-3B-9E");
        assert_eq!(mac.as_str(), "a4:cf:12:0f:3b:9e");
    }

    #[test]
    fn placeholder_mac_survives_normalization() {
        let mac = MacAddress::new("ESP32-0F3B9E");
        assert_eq!(mac.as_str(), "esp32:0f3b9e");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = WidgetId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
