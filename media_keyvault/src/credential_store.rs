//! Secure credential store interface
//!
//! The vault never owns hardware-bound secret storage. The platform supplies a
//! store for the master password (Keychain, Keystore, Secret Service, ...) and
//! a user-presence gate (biometric prompt). Both are consumed through these
//! traits and fail closed: a missing entry is `None`, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::error::{KeyVaultError, Result};

/// Well-known store key names
pub mod keys {
    /// The master password, stored only when the user opts into quick unlock
    pub const MASTER_PASSWORD: &str = "media-vault.master-password";
}

/// Byte-oriented secret storage supplied by the platform.
pub trait CredentialStore: Send + Sync {
    /// Store `bytes` under `key`, optionally requiring user presence to read.
    fn store(&self, key: &str, bytes: &[u8], require_user_presence: bool) -> Result<()>;

    /// `Ok(None)` when nothing is stored.
    fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Deleting a missing key is a no-op.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Biometric / device-credential prompt.
pub trait UserPresenceGate: Send + Sync {
    fn confirm(&self, reason: &str) -> bool;
}

/// Gate that always answers the same way (headless hosts, tests).
pub struct FixedPresence(pub bool);

impl UserPresenceGate for FixedPresence {
    fn confirm(&self, _reason: &str) -> bool {
        self.0
    }
}

struct StoredSecret {
    bytes: Zeroizing<Vec<u8>>,
    require_user_presence: bool,
}

/// Process-local store. Useful on hosts without a platform keychain and in tests.
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, StoredSecret>>,
    gate: Option<Arc<dyn UserPresenceGate>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            gate: None,
        }
    }

    pub fn with_gate(gate: Arc<dyn UserPresenceGate>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            gate: Some(gate),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store(&self, key: &str, bytes: &[u8], require_user_presence: bool) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            StoredSecret {
                bytes: Zeroizing::new(bytes.to_vec()),
                require_user_presence,
            },
        );
        tracing::debug!(key, require_user_presence, "stored secret");
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let entries = self.entries.lock();
        let Some(secret) = entries.get(key) else {
            return Ok(None);
        };

        if secret.require_user_presence {
            let confirmed = self
                .gate
                .as_ref()
                .map(|gate| gate.confirm("Unlock media vault"))
                .unwrap_or(false);
            if !confirmed {
                tracing::warn!(key, "user presence not confirmed");
                return Err(KeyVaultError::PresenceDeclined);
            }
        }

        Ok(Some(secret.bytes.clone()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        if self.entries.lock().remove(key).is_some() {
            tracing::debug!(key, "deleted secret");
        }
        Ok(())
    }
}

/// Platform keychain via the `keyring` crate.
///
/// The user-presence flag is left to the platform keychain's own access
/// control; when a gate is attached it is consulted before every read.
#[cfg(feature = "platform-keyring")]
pub struct KeyringCredentialStore {
    service: String,
    gate: Option<Arc<dyn UserPresenceGate>>,
}

#[cfg(feature = "platform-keyring")]
impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>, gate: Option<Arc<dyn UserPresenceGate>>) -> Self {
        Self {
            service: service.into(),
            gate,
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| KeyVaultError::CredentialStore(format!("keychain entry: {e}")))
    }
}

#[cfg(feature = "platform-keyring")]
impl CredentialStore for KeyringCredentialStore {
    fn store(&self, key: &str, bytes: &[u8], _require_user_presence: bool) -> Result<()> {
        self.entry(key)?
            .set_secret(bytes)
            .map_err(|e| KeyVaultError::CredentialStore(format!("keychain store '{key}': {e}")))?;
        tracing::debug!(key, "stored secret in platform keychain");
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        if let Some(gate) = &self.gate {
            if !gate.confirm("Unlock media vault") {
                return Err(KeyVaultError::PresenceDeclined);
            }
        }
        match self.entry(key)?.get_secret() {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeyVaultError::CredentialStore(format!("keychain get '{key}': {e}"))),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeyVaultError::CredentialStore(format!("keychain delete '{key}': {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_retrieve_delete() {
        let store = MemoryCredentialStore::new();
        assert!(store.retrieve("k").unwrap().is_none());

        store.store("k", b"value", false).unwrap();
        assert_eq!(store.retrieve("k").unwrap().unwrap().as_slice(), b"value");

        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(store.retrieve("k").unwrap().is_none());
    }

    #[test]
    fn test_presence_gate() {
        let denied = MemoryCredentialStore::with_gate(Arc::new(FixedPresence(false)));
        denied.store("k", b"value", true).unwrap();
        assert!(matches!(denied.retrieve("k"), Err(KeyVaultError::PresenceDeclined)));

        let allowed = MemoryCredentialStore::with_gate(Arc::new(FixedPresence(true)));
        allowed.store("k", b"value", true).unwrap();
        assert!(allowed.retrieve("k").unwrap().is_some());
    }

    #[test]
    fn test_presence_required_without_gate_fails_closed() {
        let store = MemoryCredentialStore::new();
        store.store("k", b"value", true).unwrap();
        assert!(store.retrieve("k").is_err());
    }
}
