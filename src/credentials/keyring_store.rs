//! Cross-platform encrypted credential storage.
//!
//! Uses the `keyring` crate which provides OS-appropriate secure storage:
//! - **macOS**: Keychain Services
//! - **Linux**: Secret Service (GNOME Keyring, KWallet) over D-Bus, with
//!   keyutils as a session cache, so keys survive a reboot
//! - **Windows**: Windows Credential Manager

use super::{CredentialError, SecretStore};

/// Secret store backed by the platform credential store.
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    /// Create a store whose entries live under `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(&self.service, key).map_err(|e| {
            CredentialError::StorageError(format!("Failed to create keyring entry: {e}"))
        })
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::StorageError(format!(
                "Failed to retrieve credential: {e}"
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.entry(key)?.set_password(value).map_err(|e| {
            CredentialError::StorageError(format!("Failed to store credential: {e}"))
        })
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::StorageError(format!(
                "Failed to delete credential: {e}"
            ))),
        }
    }
}
