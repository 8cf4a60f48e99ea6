//! Media Vault - Error Types

use media_keyvault::KeyVaultError;
use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// Tampered data or wrong key. Deliberately carries no detail.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // FORMAT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Incomplete header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    #[error("Corrupted chunk length at chunk {chunk}: {reason}")]
    CorruptedChunkLength { chunk: u64, reason: String },

    // ═══════════════════════════════════════════════════════════════
    // FILE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // VAULT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Vault already exists at: {0}")]
    VaultAlreadyExists(String),

    #[error("Vault not found at: {0}")]
    VaultNotFound(String),

    #[error("Too many failed attempts - retry in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Operation cancelled")]
    CancellationRequested,

    #[error("Entry path outside the vault: {0}")]
    InvalidEntryPath(String),

    // ═══════════════════════════════════════════════════════════════
    // ROTATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("A password change is in progress - resume it first")]
    RotationPending,

    #[error("Rotation failed for {} entries (rolled back: {rolled_back})", .failed.len())]
    RotationFailed { failed: Vec<String>, rolled_back: bool },

    #[error("No password change to resume")]
    NoPendingRotation,

    // ═══════════════════════════════════════════════════════════════
    // KEY MANAGEMENT / SERIALIZATION
    // ═══════════════════════════════════════════════════════════════

    #[error("Key vault error: {0}")]
    KeyVault(KeyVaultError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl VaultError {
    /// Truncation or a malformed container, as opposed to a failed tag check.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            VaultError::IncompleteHeader { .. } | VaultError::CorruptedChunkLength { .. }
        )
    }

    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::AuthenticationFailed | VaultError::RateLimitExceeded { .. }
        )
    }

    /// Message for the presentation layer. Wrong password, tampering, foreign
    /// files and truncation all read the same so the UI is not an oracle.
    pub fn user_message(&self) -> &'static str {
        match self {
            VaultError::AuthenticationFailed
            | VaultError::UnsupportedFormat(_)
            | VaultError::IncompleteHeader { .. }
            | VaultError::CorruptedChunkLength { .. }
            | VaultError::KeyDerivationFailed(_) => "Couldn't unlock or read this item",
            VaultError::RateLimitExceeded { .. } => "Too many attempts, try again later",
            VaultError::CancellationRequested => "Cancelled",
            VaultError::VaultLocked => "The vault is locked",
            _ => "Something went wrong",
        }
    }
}

impl From<KeyVaultError> for VaultError {
    fn from(e: KeyVaultError) -> Self {
        match e {
            KeyVaultError::AuthFailed | KeyVaultError::PresenceDeclined => {
                VaultError::AuthenticationFailed
            }
            KeyVaultError::RateLimitExceeded { retry_after_secs } => {
                VaultError::RateLimitExceeded { retry_after_secs }
            }
            KeyVaultError::KeyDerivationFailed(msg) => VaultError::KeyDerivationFailed(msg),
            KeyVaultError::Io(io) => VaultError::Io(io),
            other => VaultError::KeyVault(other),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}
