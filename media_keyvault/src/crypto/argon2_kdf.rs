//! Argon2id password hash: password + salt -> master key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::keys::{MasterKey, Salt, KEY_LEN};
use crate::error::{KeyVaultError, Result};

/// KDF algorithm generation: Argon2id, version 0x13.
pub const KDF_V1_ARGON2ID: u8 = 1;

/// Argon2id parameters. Persisted with the credentials so that stronger
/// presets can be introduced without locking out existing vaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Algorithm generation (see `KDF_V1_ARGON2ID`)
    pub algorithm_version: u8,
    /// Memory in KiB
    pub memory_cost_kib: u32,
    /// Iterations (time cost)
    pub time_cost: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm_version: KDF_V1_ARGON2ID,
            memory_cost_kib: 64 * 1024, // 64 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }
}

impl KdfParams {
    /// Weak devices
    pub fn low_memory() -> Self {
        Self {
            memory_cost_kib: 16 * 1024,
            time_cost: 4,
            parallelism: 1,
            ..Default::default()
        }
    }

    pub fn high_security() -> Self {
        Self {
            memory_cost_kib: 256 * 1024,
            time_cost: 4,
            parallelism: 4,
            ..Default::default()
        }
    }

    /// Cheap parameters for tests. Never use for a real vault.
    #[doc(hidden)]
    pub fn insecure_fast() -> Self {
        Self {
            memory_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
            ..Default::default()
        }
    }

    fn to_argon2(&self) -> Result<Argon2<'static>> {
        if self.algorithm_version != KDF_V1_ARGON2ID {
            return Err(KeyVaultError::UnsupportedKdf(self.algorithm_version));
        }
        let params = Params::new(
            self.memory_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("invalid Argon2 params: {e}")))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Derive the 256-bit master key from a password.
pub fn derive_master_key(
    password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
) -> Result<MasterKey> {
    let password = password.expose_secret();
    if password.is_empty() {
        return Err(KeyVaultError::KeyDerivationFailed("empty password".into()));
    }

    let argon2 = params.to_argon2()?;

    let mut output = [0u8; KEY_LEN];
    let hashed = argon2.hash_password_into(password.as_bytes(), salt.as_bytes(), &mut output);
    if let Err(e) = hashed {
        output.zeroize();
        return Err(KeyVaultError::KeyDerivationFailed(format!("Argon2id failed: {e}")));
    }

    let key = MasterKey::new(output);
    output.zeroize();
    Ok(key)
}

/// Turn raw bytes (e.g. from a credential store) into a password.
pub fn password_from_bytes(bytes: &[u8]) -> Result<SecretString> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| KeyVaultError::KeyDerivationFailed("password is not valid UTF-8".into()))?;
    Ok(SecretString::from(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password(s: &str) -> SecretString {
        SecretString::from(s.to_owned())
    }

    #[test]
    fn test_derive_deterministic() {
        let salt = Salt::from_bytes([1u8; 32]);
        let params = KdfParams::insecure_fast();

        let k1 = derive_master_key(&password("test_password"), &salt, &params).unwrap();
        let k2 = derive_master_key(&password("test_password"), &salt, &params).unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_salt_changes_key() {
        let params = KdfParams::insecure_fast();
        let k1 = derive_master_key(&password("pw"), &Salt::from_bytes([1u8; 32]), &params).unwrap();
        let k2 = derive_master_key(&password("pw"), &Salt::from_bytes([2u8; 32]), &params).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_empty_password_rejected() {
        let salt = Salt::from_bytes([1u8; 32]);
        let result = derive_master_key(&password(""), &salt, &KdfParams::insecure_fast());
        assert!(matches!(result, Err(KeyVaultError::KeyDerivationFailed(_))));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let salt = Salt::from_bytes([1u8; 32]);
        let params = KdfParams {
            memory_cost_kib: 1,
            ..KdfParams::insecure_fast()
        };
        let result = derive_master_key(&password("pw"), &salt, &params);
        assert!(matches!(result, Err(KeyVaultError::KeyDerivationFailed(_))));
    }

    #[test]
    fn test_unknown_kdf_version() {
        let salt = Salt::from_bytes([1u8; 32]);
        let params = KdfParams {
            algorithm_version: 9,
            ..KdfParams::insecure_fast()
        };
        let result = derive_master_key(&password("pw"), &salt, &params);
        assert!(matches!(result, Err(KeyVaultError::UnsupportedKdf(9))));
    }

    #[test]
    fn test_password_from_bytes_rejects_invalid_utf8() {
        assert!(password_from_bytes(&[0xff, 0xfe]).is_err());
        let pw = password_from_bytes("zażółć".as_bytes()).unwrap();
        assert_eq!(pw.expose_secret(), "zażółć");
    }
}
