//! Core types for credential management.

/// Errors from secret store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The value offered for storage is not acceptable.
    #[error("{0}")]
    InvalidKey(String),

    /// Platform storage failed.
    #[error("Storage error: {0}")]
    StorageError(String),
}
