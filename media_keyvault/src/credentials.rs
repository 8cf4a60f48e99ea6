//! Persisted vault credentials: salt, KDF parameters and verifier
//!
//! Stored as JSON next to the vault content. Nothing in this file is secret.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::crypto::{KdfParams, Salt};
use crate::error::{KeyVaultError, Result};
use crate::session::VaultSession;
use crate::verifier::{self, Verifier};

pub const CREDENTIALS_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultCredentials {
    pub format_version: u32,
    pub kdf: KdfParams,
    /// Salt (base64)
    pub salt: String,
    /// Password verifier (base64)
    pub verifier: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<DateTime<Utc>>,
}

impl VaultCredentials {
    /// Fresh salt + verifier for `password`; also returns the matching session.
    pub fn generate(password: &SecretString, kdf: KdfParams) -> Result<(Self, VaultSession)> {
        let salt = Salt::generate()?;
        let (verifier, session) = verifier::derive_session_keys(password, &salt, &kdf)?;

        let credentials = Self {
            format_version: CREDENTIALS_FORMAT_VERSION,
            kdf,
            salt: STANDARD.encode(salt.as_bytes()),
            verifier: STANDARD.encode(verifier.as_bytes()),
            created_at: Utc::now(),
            rotated_at: None,
        };
        Ok((credentials, session))
    }

    pub fn salt(&self) -> Result<Salt> {
        Salt::from_slice(&STANDARD.decode(&self.salt)?)
    }

    pub fn verifier(&self) -> Result<Verifier> {
        Verifier::from_slice(&STANDARD.decode(&self.verifier)?)
    }

    /// Verify `password` and derive the session. `AuthFailed` on mismatch.
    pub fn open_session(&self, password: &SecretString) -> Result<VaultSession> {
        verifier::open_session(password, &self.salt()?, &self.kdf, &self.verifier()?)
    }

    /// Password check without deriving the encryption key.
    pub fn check_password(&self, password: &SecretString) -> Result<bool> {
        let candidate = verifier::derive_verifier(password, &self.salt()?, &self.kdf)?;
        Ok(candidate.matches(&self.verifier()?))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KeyVaultError::CredentialsNotFound(path.display().to_string()));
        }
        let data = fs::read(path)?;
        let credentials: Self = serde_json::from_slice(&data)?;
        if credentials.format_version != CREDENTIALS_FORMAT_VERSION {
            return Err(KeyVaultError::KeyDerivationFailed(format!(
                "unsupported credentials format {}",
                credentials.format_version
            )));
        }
        Ok(credentials)
    }

    /// Write atomically: temp sibling, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data)
    }
}

pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path)?;
    let written = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    })();

    let renamed = written.and_then(|()| fs::rename(&temp_path, path).map_err(KeyVaultError::from));
    if let Err(e) = renamed {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    sync_parent_dir(path)
}

/// Hidden, unique sibling name: `.credentials.json.tmp-<32 hex>`
fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let mut id = [0u8; 16];
    getrandom::getrandom(&mut id)
        .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("OS RNG unavailable: {e}")))?;
    let id: String = id.iter().map(|b| format!("{b:02x}")).collect();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(path.with_file_name(format!(".{name}.tmp-{id}")))
}

/// fsync the directory holding `path` so the rename is durable.
fn sync_parent_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
