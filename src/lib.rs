//! vpn-control: remote control client for a cloud-hosted VPN instance.
//!
//! The instance is started and stopped through an HTTPS control API that
//! answers with free-text status messages. This crate turns those messages
//! into a typed state machine and keeps a local view in sync with the
//! remote lifecycle.
//!
//! # Architecture
//!
//! - **Gateway** ([`gateway`]): `POST /vpn` and `GET /vpn/status` over `reqwest`
//! - **Parser** ([`parser`]): keyword and identifier extraction from messages
//! - **Store** ([`store`]): last known status, persisted as JSON
//! - **Engine** ([`engine`]): request guard, poll loop, state reconciliation
//! - **Credentials** ([`credentials`]): API key in the OS credential store
//!
//! The `vpnctl` binary wires these together from a [`ClientConfig`].

pub mod app_dirs;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod parser;
mod persist;
pub mod state;
pub mod store;

pub use config::ClientConfig;
pub use engine::{CheckOutcome, EngineEvent, ReconcileEngine, ToggleOutcome, ViewState};
pub use error::{Result, VpnError};
pub use gateway::{ControlApi, ControlResponse, HttpControlApi};
pub use state::{StatusSnapshot, VpnAction, VpnState};
pub use store::{JsonFileStore, MemoryStatusStore, StatusStore};
