//! Error types for media-keyvault

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("Credentials already exist at {0}")]
    CredentialsExist(String),

    #[error("Credentials not found at {0}")]
    CredentialsNotFound(String),

    #[error("Invalid credentials JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Authentication failed - wrong password?")]
    AuthFailed,

    #[error("Too many failed attempts - retry in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Password rejected by policy: {}", .0.join("; "))]
    WeakPassword(Vec<String>),

    #[error("Unsupported KDF version: {0}")]
    UnsupportedKdf(u8),

    #[error("Invalid salt length: expected {expected}, got {actual}")]
    InvalidSalt { expected: usize, actual: usize },

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error("User presence check declined")]
    PresenceDeclined,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KeyVaultError>;

impl KeyVaultError {
    /// Errors that must look identical to a wrong password from the outside.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthFailed | Self::PresenceDeclined)
    }

    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed | Self::RateLimitExceeded { .. } | Self::KeyDerivationFailed(_)
        )
    }
}
