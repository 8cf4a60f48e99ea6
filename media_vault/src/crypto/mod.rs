//! Media Vault - Cryptographic Core
//!
//! AES-256-GCM with detached tags for chunks and metadata, HMAC-SHA256 for
//! the metadata block and legacy entries.

pub mod aead;
pub mod keys;

pub use aead::*;
pub use keys::*;
