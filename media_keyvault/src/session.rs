//! Unlocked session: the key pair every entry operation borrows

use zeroize::Zeroize;

use crate::crypto::VaultKey;

/// The in-memory key set of an unlocked vault.
///
/// Passed by reference to every storage operation. There is no global key
/// cache: whoever owns the session owns the key lifetime, and `zero_and_drop`
/// ends it explicitly. Dropping without calling it still zeroizes the keys.
pub struct VaultSession {
    encryption_key: VaultKey,
    integrity_key: VaultKey,
}

impl VaultSession {
    pub fn new(encryption_key: VaultKey, integrity_key: VaultKey) -> Self {
        Self {
            encryption_key,
            integrity_key,
        }
    }

    /// AES-256-GCM key for content chunks and metadata
    pub fn encryption_key(&self) -> &VaultKey {
        &self.encryption_key
    }

    /// HMAC-SHA256 key for metadata blocks and legacy entries
    pub fn integrity_key(&self) -> &VaultKey {
        &self.integrity_key
    }

    /// Wipe both keys and consume the session (called on lock/logout).
    pub fn zero_and_drop(mut self) {
        self.encryption_key.zeroize();
        self.integrity_key.zeroize();
        tracing::debug!("session keys zeroized");
    }
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession")
            .field("encryption_key", &"[REDACTED]")
            .field("integrity_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_and_zero() {
        let session = VaultSession::new(VaultKey::new([1u8; 32]), VaultKey::new([2u8; 32]));
        assert_eq!(session.encryption_key().expose(), &[1u8; 32]);
        assert_eq!(session.integrity_key().expose(), &[2u8; 32]);
        assert!(format!("{session:?}").contains("REDACTED"));
        session.zero_and_drop();
    }
}
