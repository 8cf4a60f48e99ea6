//! Key derivation - Argon2id master key, HKDF sub-keys, zeroizing key types

mod argon2_kdf;
mod hkdf_derive;
mod keys;

pub use argon2_kdf::{derive_master_key, password_from_bytes, KdfParams, KDF_V1_ARGON2ID};
pub use hkdf_derive::{derive_subkey, SubkeyLabel};
pub use keys::{MasterKey, Salt, VaultKey, KEY_LEN, SALT_LEN};
