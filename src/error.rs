//! Error types for the VPN control client.

/// Stable error codes for programmatic error handling.
///
/// These codes are part of the public API contract. Match on them instead of
/// parsing Display output.
pub mod error_codes {
    /// The control endpoint URL could not be built.
    pub const INVALID_URL: &str = "INVALID_URL";

    /// Transport or connectivity failure.
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";

    /// The control API answered with a non-2xx status.
    pub const INVALID_RESPONSE: &str = "INVALID_RESPONSE";

    /// The response body was not a JSON object.
    pub const DECODING_ERROR: &str = "DECODING_ERROR";

    /// Invalid or unreadable configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Local I/O failure.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Top-level error type for the control client.
///
/// The first four variants form the gateway taxonomy. Each is terminal for the
/// call that produced it; nothing in the crate retries automatically.
#[derive(Debug, thiserror::Error)]
pub enum VpnError {
    /// Malformed control endpoint.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport or connectivity failure (DNS, TLS, timeout, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The server replied with a status outside 200-299.
    #[error("invalid response from control API (HTTP {status})")]
    InvalidResponse {
        /// HTTP status code returned by the server.
        status: u16,
    },

    /// The response body was not a JSON object.
    #[error("could not decode control API response: {0}")]
    Decoding(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VpnError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => error_codes::INVALID_URL,
            Self::Network(_) => error_codes::NETWORK_ERROR,
            Self::InvalidResponse { .. } => error_codes::INVALID_RESPONSE,
            Self::Decoding(_) => error_codes::DECODING_ERROR,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Returns true for errors produced by the control API gateway.
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::Network(_)
                | Self::InvalidResponse { .. }
                | Self::Decoding(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VpnError>;
