//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data (persisted status) | `~/Library/Application Support/vpn-control/` | `~/.local/share/vpn-control/` |
//! | Config | `~/Library/Application Support/vpn-control/` | `~/.config/vpn-control/` |
//!
//! # Environment Overrides
//!
//! - `VPN_CONTROL_DATA_DIR` overrides [`data_dir`]
//! - `VPN_CONTROL_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

const APP_DIR_NAME: &str = "vpn-control";

/// Application data root directory.
///
/// Holds the last-known status record.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VPN_CONTROL_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("/tmp/vpn-control-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VPN_CONTROL_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("/tmp/vpn-control-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Directory holding persisted status records (`data_dir()/state/`).
#[must_use]
pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}
