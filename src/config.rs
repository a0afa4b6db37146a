//! Configuration types for the VPN control client.

use crate::error::{Result, VpnError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder endpoint shipped before a deployment is configured.
pub const DEFAULT_BASE_URL: &str =
    "https://put-your-api-gateway-url-here.execute-api.us-east-1.amazonaws.com/Prod";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Control API endpoint settings.
    pub api: ApiConfig,
    /// Poll loop settings.
    pub polling: PollingConfig,
    /// Where the last known status is persisted.
    pub storage: StorageConfig,
    /// Where the API key lives in the platform secret store.
    pub credentials: CredentialsConfig,
}

/// Control API endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL; `/vpn` and `/vpn/status` are appended.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Poll loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between status checks while the instance is transitioning.
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

impl PollingConfig {
    /// Poll interval as a [`Duration`]. Zero is clamped to one millisecond.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Persisted status location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the status record (None = [`crate::app_dirs::state_dir`]).
    pub state_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved state directory.
    #[must_use]
    pub fn effective_state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(crate::app_dirs::state_dir)
    }
}

/// Secret store coordinates of the API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Secret store service name.
    pub service: String,
    /// Key under which the API key is stored.
    pub account: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            service: "vpn-control".to_owned(),
            account: "vpnApiKey".to_owned(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            VpnError::Config(format!(
                "failed to parse config file '{}': {e}",
                path.display()
            ))
        })
    }

    /// Load configuration, using defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Save configuration atomically (temp file, fsync, rename), creating
    /// parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VpnError::Config(format!("failed to serialize config: {e}")))?;

        crate::persist::write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }
}
