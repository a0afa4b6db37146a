//! Session-level API key management.

use super::{CredentialError, SecretStore};
use tracing::warn;

/// Message returned when an empty key is offered.
pub const INVALID_KEY_MESSAGE: &str = "Please enter a valid API key";

/// Holds the control API key for the current session.
///
/// A missing key is a normal state: the key is simply empty and requests go
/// out unauthenticated, to be rejected by the server.
pub struct ApiKeySettings {
    store: Box<dyn SecretStore>,
    key_name: String,
    api_key: String,
}

impl std::fmt::Debug for ApiKeySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeySettings")
            .field("key_name", &self.key_name)
            .field("has_api_key", &self.has_api_key())
            .finish()
    }
}

impl ApiKeySettings {
    /// Read the key from `store`. Absence or a storage failure yields an
    /// empty key; failures are logged.
    pub fn load(store: Box<dyn SecretStore>, key_name: impl Into<String>) -> Self {
        let key_name = key_name.into();
        let api_key = match store.get(&key_name) {
            Ok(Some(key)) => key,
            Ok(None) => String::new(),
            Err(e) => {
                warn!("failed to retrieve API key from secret store: {e}");
                String::new()
            }
        };
        Self {
            store,
            key_name,
            api_key,
        }
    }

    /// Current key (empty when unset).
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Whether a non-empty key is set.
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Persist a new key. The in-memory key changes only if storage succeeds.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::InvalidKey` for an empty or blank key, or the
    /// store's error if persisting fails.
    pub fn set_api_key(&mut self, new_key: &str) -> Result<(), CredentialError> {
        let new_key = new_key.trim();
        if new_key.is_empty() {
            return Err(CredentialError::InvalidKey(INVALID_KEY_MESSAGE.to_owned()));
        }
        self.store.set(&self.key_name, new_key)?;
        self.api_key = new_key.to_owned();
        Ok(())
    }

    /// Remove the key from storage and clear it for the session.
    ///
    /// # Errors
    ///
    /// Returns the store's error if deletion fails; the key is kept in that case.
    pub fn clear_api_key(&mut self) -> Result<(), CredentialError> {
        self.store.delete(&self.key_name)?;
        self.api_key.clear();
        Ok(())
    }
}
