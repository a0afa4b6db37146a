//! HTTP implementation of the control API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | [`ControlApi::send_action`] | `POST {base}/vpn` with `{"action": "start" \| "stop"}` |
//! | [`ControlApi::fetch_status`] | `GET {base}/vpn/status` |
//!
//! Both send the key in the `x-api-key` header and accept only 2xx replies
//! whose body is a JSON object.

use super::{ControlApi, ControlResponse};
use crate::config::ApiConfig;
use crate::error::{Result, VpnError};
use crate::state::VpnAction;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

const ACTION_PATH: &str = "/vpn";
const STATUS_PATH: &str = "/vpn/status";

#[derive(Serialize)]
struct ActionRequest {
    action: VpnAction,
}

/// Control API client over HTTPS.
pub struct HttpControlApi {
    base_url: String,
    api_key: RwLock<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpControlApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpControlApi")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpControlApi {
    /// Create a client for the configured endpoint.
    ///
    /// An empty key is accepted; the server will reject the requests.
    ///
    /// # Errors
    ///
    /// Returns `VpnError::Config` if the HTTP client cannot be initialised.
    pub fn new(config: &ApiConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| VpnError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: RwLock::new(api_key.into()),
            client,
        })
    }

    /// Replace the key used by subsequent requests.
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        *self.api_key.write().unwrap_or_else(PoisonError::into_inner) = api_key.into();
    }

    fn api_key(&self) -> String {
        self.api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url> {
        let raw = format!("{}{path}", self.base_url);
        reqwest::Url::parse(&raw).map_err(|e| VpnError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Map the HTTP exchange onto the gateway error taxonomy.
    async fn decode(response: reqwest::Response) -> Result<ControlResponse> {
        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "control API rejected request");
            return Err(VpnError::InvalidResponse {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| VpnError::Network(format!("failed to read response body: {e}")))?;
        ControlResponse::from_slice(&body)
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn send_action(&self, action: VpnAction) -> Result<ControlResponse> {
        let url = self.endpoint(ACTION_PATH)?;
        debug!(%action, "sending control action");

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, self.api_key())
            .json(&ActionRequest { action })
            .send()
            .await
            .map_err(|e| VpnError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    async fn fetch_status(&self) -> Result<ControlResponse> {
        let url = self.endpoint(STATUS_PATH)?;
        debug!("fetching control API status");

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, self.api_key())
            .send()
            .await
            .map_err(|e| VpnError::Network(e.to_string()))?;

        Self::decode(response).await
    }
}
