//! # Media Vault
//!
//! Encrypted, password-protected local storage for photos and videos.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       MEDIA VAULT                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │  MediaVault  │  │  entry ops   │  │  rotation +    │  │
//! │  │  (async)     │──│  encrypt /   │──│  journal       │  │
//! │  │  workers     │  │  decrypt     │  │                │  │
//! │  └──────┬───────┘  └──────┬───────┘  └───────┬────────┘  │
//! │         │                 │                  │           │
//! │  ┌──────┴─────────────────┴──────────────────┴────────┐  │
//! │  │     format: SVSTRM01 stream  |  legacy (xattrs)    │  │
//! │  │     crypto: AES-256-GCM chunks, HMAC-SHA256        │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                                                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ media-       │  │ secure erase │  │ secure_fs      │  │
//! │  │ keyvault     │  │ 3 passes     │  │ atomic rename  │  │
//! │  └──────────────┘  └──────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Every chunk sealed with AES-256-GCM under a fresh random nonce
//! - Metadata sealed and HMAC'd, re-embedded unchanged on rotation
//! - Decrypted data only in `Zeroizing` buffers or erased temp files
//! - An entry is replaced by atomic rename, never rewritten in place
//! - Session keys zeroized on lock

pub mod config;
pub mod control;
pub mod crypto;
pub mod entry;
pub mod erase;
pub mod error;
pub mod format;
pub mod journal;
pub mod locks;
pub mod metadata;
pub mod rotation;
pub mod secure_fs;
pub mod vault;

pub use config::VaultConfig;
pub use control::{Phase, Progress, StreamControl};
pub use crypto::{VaultKey, VaultSession};
pub use entry::{
    decrypt_entry, decrypt_entry_to_file, decrypt_entry_to_vec, encrypt_entry, erase_entry,
    read_metadata, rotate_entry, DecryptedEntry,
};
pub use erase::{EraseReport, DEFAULT_ERASE_CEILING};
pub use error::{VaultError, VaultResult};
pub use format::{sniff, AttributeStore, FileFormat, MediaType, MemoryAttributeStore, StreamHeader, XattrStore};
pub use metadata::{EntryMetadata, GeoLocation};
pub use rotation::{RotateOptions, RotationOutcome};
pub use vault::{EntryKind, MediaVault};

pub use tokio_util::sync::CancellationToken;

/// Media Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
