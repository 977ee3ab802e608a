use thiserror::Error;

/// Top-level error type for the `ember-api` crate.
///
/// Covers every failure mode of a single device call: local address
/// validation, transport, and protocol-level rejection. `ember-core`
/// maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Local validation ────────────────────────────────────────────
    /// Target is not a syntactically valid IPv4 literal. Never reaches
    /// the network.
    #[error("Invalid device address: {address}")]
    InvalidAddress { address: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, non-2xx status, DNS
    /// failure, etc.)
    #[error("Device unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// URL construction error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Protocol ────────────────────────────────────────────────────
    /// The device answered 2xx but rejected the command (`success:
    /// false`) or the body lacked the expected acknowledgement.
    #[error("Device protocol error: {message}")]
    Protocol { message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient failure worth retrying by a
    /// caller with a retry policy (this crate itself never retries).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` for failures that never reached the device.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::InvalidAddress { .. } | Self::InvalidUrl(_))
    }

    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unreachable(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
