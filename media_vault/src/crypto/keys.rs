//! Media Vault - Key re-exports and nonce generation

use rand::RngCore;

pub use media_keyvault::{VaultKey, VaultSession};

/// Nonce length for AES-GCM (96 bits)
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// HMAC-SHA256 output length
pub const HMAC_LEN: usize = 32;

/// Fresh random nonce from the OS-seeded CSPRNG
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
