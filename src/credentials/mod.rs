//! Secret storage for the control API key.
//!
//! The key lives in a platform secret store behind the [`SecretStore`] trait:
//!
//! - [`KeyringSecretStore`]: OS credential store via the `keyring` crate
//! - [`MemorySecretStore`]: process-local map, for tests and ephemeral runs
//!
//! [`ApiKeySettings`] sits on top and owns the current key for the session.
//!
//! ## Usage
//!
//! ```no_run
//! use vpn_control::credentials::{ApiKeySettings, KeyringSecretStore};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = KeyringSecretStore::new("vpn-control");
//! let mut settings = ApiKeySettings::load(Box::new(store), "vpnApiKey");
//! settings.set_api_key("k3y")?;
//! assert!(settings.has_api_key());
//! # Ok(())
//! # }
//! ```

mod keyring_store;
mod memory;
mod settings;
mod types;

pub use keyring_store::KeyringSecretStore;
pub use memory::MemorySecretStore;
pub use settings::ApiKeySettings;
pub use types::CredentialError;

/// Key-value secret storage.
pub trait SecretStore: Send + Sync {
    /// Read the secret stored under `key`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` if a secret exists
    /// - `Ok(None)` if nothing is stored under `key`
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::StorageError` if platform storage access fails.
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::StorageError` if the platform storage fails.
    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    /// Remove the secret stored under `key`.
    ///
    /// Deleting a key that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::StorageError` if platform storage access fails.
    fn delete(&self, key: &str) -> Result<(), CredentialError>;
}
