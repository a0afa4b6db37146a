//! Control API gateway.
//!
//! Defines the [`ControlApi`] trait the reconciliation engine drives and the
//! typed [`ControlResponse`] every call is decoded into. The HTTP
//! implementation lives in [`http`].
//!
//! Gateway calls never retry and never touch local state. Retry and
//! reconciliation policy belong to the caller.

pub mod http;

pub use http::HttpControlApi;

use crate::error::{Result, VpnError};
use crate::state::VpnAction;
use async_trait::async_trait;

/// Decoded control API response.
///
/// Only `message` is consumed. Extra fields are ignored, and a `message` that
/// is missing or not a string decodes as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlResponse {
    /// Free-text status message.
    pub message: Option<String>,
}

impl ControlResponse {
    /// Response carrying a message.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// Decode a response body.
    ///
    /// # Errors
    ///
    /// Returns `VpnError::Decoding` if the body is not valid JSON or is valid
    /// JSON but not an object.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| VpnError::Decoding(format!("invalid JSON: {e}")))?;

        match value {
            serde_json::Value::Object(map) => Ok(Self {
                message: map
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned),
            }),
            other => Err(VpnError::Decoding(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Remote operations the engine needs from the control service.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Request a lifecycle action.
    async fn send_action(&self, action: VpnAction) -> Result<ControlResponse>;

    /// Fetch the current status.
    async fn fetch_status(&self) -> Result<ControlResponse>;
}
