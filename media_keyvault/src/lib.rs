//! # media-keyvault
//!
//! Password → key material for the media vault.
//!
//! ```text
//! password + salt ──Argon2id──► MasterKey ──HKDF──┬─► "encryption" ─┐
//!                                                 ├─► "hmac" ───────┴─► VaultSession
//!                                                 └─► "verifier" ──────► credentials.json
//! ```
//!
//! - Only the salt, KDF parameters and verifier are persisted
//! - The master key is dropped (zeroized) as soon as sub-keys exist
//! - `VaultSession::zero_and_drop` ends key lifetime on lock
//! - The master password itself lives in a platform `CredentialStore`

pub mod credential_store;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod keyvault;
pub mod policy;
pub mod session;
pub mod verifier;

pub use credential_store::{CredentialStore, FixedPresence, MemoryCredentialStore, UserPresenceGate};
#[cfg(feature = "platform-keyring")]
pub use credential_store::KeyringCredentialStore;
pub use credentials::VaultCredentials;
pub use crypto::{KdfParams, Salt, SubkeyLabel, VaultKey};
pub use error::{KeyVaultError, Result};
pub use keyvault::{KeyVault, PendingRotation};
pub use policy::{AttemptLimiter, UnlockPolicy};
pub use session::VaultSession;
pub use verifier::{derive_password_subkey, derive_verifier, Verifier};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
