//! Password verifier and session derivation
//!
//! The verifier is the `"verifier"` HKDF expansion of the master key. It is
//! stored on disk and compared on unlock; the encryption key is only derived
//! after the comparison succeeds, and can never be recovered from the stored
//! value.

use secrecy::SecretString;
use subtle::ConstantTimeEq;

use crate::crypto::{
    derive_master_key, derive_subkey, KdfParams, MasterKey, Salt, SubkeyLabel, VaultKey, KEY_LEN,
};
use crate::error::{KeyVaultError, Result};
use crate::session::VaultSession;

/// Persistable password check value.
#[derive(Clone, PartialEq, Eq)]
pub struct Verifier([u8; KEY_LEN]);

impl Verifier {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            KeyVaultError::KeyDerivationFailed(format!(
                "verifier must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Constant-time comparison
    pub fn matches(&self, other: &Verifier) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Verifier([..])")
    }
}

fn verifier_from_master(master: &MasterKey, salt: &Salt) -> Result<Verifier> {
    let key = derive_subkey(master, salt, SubkeyLabel::Verifier)?;
    Ok(Verifier(*key.expose()))
}

fn session_from_master(master: &MasterKey, salt: &Salt) -> Result<VaultSession> {
    let encryption = derive_subkey(master, salt, SubkeyLabel::Encryption)?;
    let integrity = derive_subkey(master, salt, SubkeyLabel::Hmac)?;
    Ok(VaultSession::new(encryption, integrity))
}

/// Derive only the verifier for `password`.
pub fn derive_verifier(password: &SecretString, salt: &Salt, params: &KdfParams) -> Result<Verifier> {
    let master = derive_master_key(password, salt, params)?;
    verifier_from_master(&master, salt)
}

/// Password-to-sub-key in one step (password hash, then expansion).
pub fn derive_password_subkey(
    password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
    label: SubkeyLabel,
) -> Result<VaultKey> {
    let master = derive_master_key(password, salt, params)?;
    derive_subkey(&master, salt, label)
}

/// Derive verifier and session with a single password hash (vault setup and
/// password change).
pub fn derive_session_keys(
    password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
) -> Result<(Verifier, VaultSession)> {
    let master = derive_master_key(password, salt, params)?;
    let verifier = verifier_from_master(&master, salt)?;
    let session = session_from_master(&master, salt)?;
    Ok((verifier, session))
}

/// Check `password` against `expected` and, only if it matches, derive the
/// session keys.
pub fn open_session(
    password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
    expected: &Verifier,
) -> Result<VaultSession> {
    let master = derive_master_key(password, salt, params)?;
    let candidate = verifier_from_master(&master, salt)?;
    if !candidate.matches(expected) {
        return Err(KeyVaultError::AuthFailed);
    }
    session_from_master(&master, salt)
}
