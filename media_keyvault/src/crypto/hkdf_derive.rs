//! HKDF-SHA256 expansion of the master key into domain-separated sub-keys

use hkdf::Hkdf;
use sha2::Sha256;

use super::keys::{MasterKey, Salt, VaultKey, KEY_LEN};
use crate::error::{KeyVaultError, Result};

/// Domain-separation labels. Each label yields an independent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubkeyLabel {
    /// AES-256-GCM key for entry content and metadata
    Encryption,
    /// HMAC-SHA256 key for metadata blocks and legacy entries
    Hmac,
    /// Password check value, the only derived value that is persisted
    Verifier,
}

impl SubkeyLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encryption => "encryption",
            Self::Hmac => "hmac",
            Self::Verifier => "verifier",
        }
    }
}

/// Expand `master` into the sub-key for `label`.
pub fn derive_subkey(master: &MasterKey, salt: &Salt, label: SubkeyLabel) -> Result<VaultKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), master.as_bytes());
    let mut okm = [0u8; KEY_LEN];
    hk.expand(label.as_str().as_bytes(), &mut okm)
        .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("HKDF expand: {e}")))?;

    let key = VaultKey::new(okm);
    zeroize::Zeroize::zeroize(&mut okm);
    Ok(key)
}
