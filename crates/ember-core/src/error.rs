// ── Core error types ──
//
// User-facing errors from ember-core. These are NOT transport-specific --
// consumers never see reqwest failures or JSON parse errors directly.
// The `From<ember_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

use crate::model::{DeviceId, MacAddress, WidgetId};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    /// Malformed or missing IP — caught locally, never reaches the
    /// network.
    #[error("Invalid device address: {address}")]
    InvalidAddress { address: String },

    #[error("Device has no IP address on record")]
    MissingAddress,

    /// An explicit user-initiated connect failed. Carries the device
    /// name so the message is actionable as-is.
    #[error("Couldn't connect to {name}: check the IP and make sure it's powered on")]
    ConnectionFailed { name: String, reason: String },

    #[error("Device unreachable: {reason}")]
    DeviceUnreachable { reason: String },

    /// 2xx answer without the expected acknowledgement, or an explicit
    /// device-side rejection.
    #[error("Device protocol error: {message}")]
    DeviceProtocol { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {id}")]
    DeviceNotFound { id: DeviceId },

    #[error("Widget not found: {id}")]
    WidgetNotFound { id: WidgetId },

    /// MAC uniqueness (per owner) violated in the registry.
    #[error("A device with MAC {mac} already exists")]
    MacConflict { mac: MacAddress },

    /// Persistence layer failure.
    #[error("Registry error: {message}")]
    Registry { message: String },

    /// Local session cache failure. The cache is best-effort; this only
    /// surfaces from explicit load/save calls.
    #[error("Session store error: {message}")]
    SessionStore { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Operation not supported for this widget kind: {operation}")]
    Unsupported { operation: String },
}

impl CoreError {
    /// Returns `true` for failures that should be swallowed during
    /// automatic reconnection or routine polling (spoken, not shouted).
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnreachable { .. } | Self::ConnectionFailed { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ember_api::Error> for CoreError {
    fn from(err: ember_api::Error) -> Self {
        match err {
            ember_api::Error::InvalidAddress { address } => CoreError::InvalidAddress { address },
            ember_api::Error::Unreachable(e) => CoreError::DeviceUnreachable {
                reason: e.to_string(),
            },
            ember_api::Error::Timeout { timeout_secs } => CoreError::DeviceUnreachable {
                reason: format!("request timed out after {timeout_secs}s"),
            },
            ember_api::Error::InvalidUrl(e) => CoreError::InvalidAddress {
                address: e.to_string(),
            },
            ember_api::Error::Protocol { message } => CoreError::DeviceProtocol { message },
            ember_api::Error::Deserialization { message, body: _ } => CoreError::DeviceProtocol {
                message: format!("malformed device response: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_is_routine() {
        let err = CoreError::DeviceUnreachable {
            reason: "connection refused".into(),
        };
        assert!(err.is_routine());
    }

    #[test]
    fn registry_failure_is_not_routine() {
        let err = CoreError::Registry {
            message: "insert failed".into(),
        };
        assert!(!err.is_routine());
    }

    #[test]
    fn timeout_translates_to_unreachable() {
        let err: CoreError = ember_api::Error::Timeout { timeout_secs: 4 }.into();
        assert!(matches!(err, CoreError::DeviceUnreachable { .. }));
    }
}
