//! Client-observed VPN state, lifecycle actions, and the persisted snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the remote VPN instance as inferred by this client.
///
/// The server is authoritative. Values only ever come from parsing a server
/// message or from the initial default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnState {
    /// Instance is stopped (initial default).
    #[default]
    Stopped,
    /// Instance is booting.
    Starting,
    /// Instance is up.
    Running,
    /// Instance is shutting down.
    Stopping,
}

impl VpnState {
    /// Human-readable label for status displays.
    #[must_use]
    pub const fn display_text(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
        }
    }

    /// `starting` and `stopping` are expected to resolve on their own and
    /// drive automatic polling.
    #[must_use]
    pub const fn is_transitioning(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    /// `stopped` and `running` need no further polling.
    #[must_use]
    pub const fn is_stable(self) -> bool {
        !self.is_transitioning()
    }
}

impl std::fmt::Display for VpnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Lifecycle action accepted by the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnAction {
    /// Boot the instance.
    Start,
    /// Shut the instance down.
    Stop,
}

impl VpnAction {
    /// Wire value of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    /// Action a toggle issues from `state`.
    ///
    /// Only `stopped` starts. Every other state, transitional ones included,
    /// stops, which lets a pending start be reversed.
    #[must_use]
    pub const fn for_state(state: VpnState) -> Self {
        match state {
            VpnState::Stopped => Self::Start,
            VpnState::Starting | VpnState::Running | VpnState::Stopping => Self::Stop,
        }
    }
}

impl std::fmt::Display for VpnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known status, the unit of persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Parsed lifecycle state.
    pub state: VpnState,
    /// Instance identifier extracted from the server message, if any.
    pub instance_id: Option<String>,
    /// When this snapshot was produced.
    pub last_updated: DateTime<Utc>,
    /// Raw server message the snapshot was derived from.
    pub message: String,
}
