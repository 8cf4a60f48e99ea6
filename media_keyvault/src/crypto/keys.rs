//! Key containers with automatic zeroization

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyVaultError, Result};

/// Length of every symmetric key handled by the vault (AES-256 / HMAC-SHA256)
pub const KEY_LEN: usize = 32;

/// Length of the per-vault salt
pub const SALT_LEN: usize = 32;

/// 256-bit symmetric key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    bytes: [u8; KEY_LEN],
}

impl VaultKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Expose the raw key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Random key from the OS CSPRNG
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("OS RNG unavailable: {e}")))?;
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Output of the password hash. Only lives long enough to expand sub-keys.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    pub(crate) fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Public random salt mixed into key derivation. Not secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SALT_LEN] = bytes.try_into().map_err(|_| KeyVaultError::InvalidSalt {
            expected: SALT_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; SALT_LEN];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("OS RNG unavailable: {e}")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let a = VaultKey::generate().unwrap();
        let b = VaultKey::generate().unwrap();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = VaultKey::new([0x41; KEY_LEN]);
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("65"));
    }

    #[test]
    fn test_salt_length_checked() {
        assert!(Salt::from_slice(&[0u8; 16]).is_err());
        assert!(Salt::from_slice(&[0u8; SALT_LEN]).is_ok());
    }
}
