//! KeyVault - credentials file, unlock flow and password change preparation

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString};

use crate::credential_store::{keys, CredentialStore};
use crate::credentials::VaultCredentials;
use crate::crypto::{password_from_bytes, KdfParams};
use crate::error::{KeyVaultError, Result};
use crate::policy::{AttemptLimiter, UnlockPolicy};
use crate::session::VaultSession;

/// New credentials and session for a password change, not yet persisted.
pub struct PendingRotation {
    pub credentials: VaultCredentials,
    pub session: VaultSession,
}

pub struct KeyVault {
    path: PathBuf,
    credentials: RwLock<VaultCredentials>,
    limiter: Mutex<AttemptLimiter>,
    policy: UnlockPolicy,
}

impl KeyVault {
    /// Set up credentials for a new vault at `path` (the credentials file).
    pub fn create(
        path: &Path,
        password: &SecretString,
        kdf: KdfParams,
        policy: UnlockPolicy,
    ) -> Result<(Self, VaultSession)> {
        if path.exists() {
            return Err(KeyVaultError::CredentialsExist(path.display().to_string()));
        }
        policy.validate_password(password.expose_secret())?;

        let (credentials, session) = VaultCredentials::generate(password, kdf)?;
        credentials.save(path)?;
        tracing::info!(path = %path.display(), "vault credentials created");

        let vault = Self {
            path: path.to_path_buf(),
            credentials: RwLock::new(credentials),
            limiter: Mutex::new(AttemptLimiter::new()),
            policy,
        };
        Ok((vault, session))
    }

    pub fn open(path: &Path, policy: UnlockPolicy) -> Result<Self> {
        let credentials = VaultCredentials::load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            credentials: RwLock::new(credentials),
            limiter: Mutex::new(AttemptLimiter::new()),
            policy,
        })
    }

    pub fn credentials(&self) -> VaultCredentials {
        self.credentials.read().clone()
    }

    pub fn policy(&self) -> &UnlockPolicy {
        &self.policy
    }

    /// Verify the password and derive the session, subject to rate limiting.
    pub fn unlock(&self, password: &SecretString) -> Result<VaultSession> {
        self.limiter.lock().check(Utc::now())?;

        let credentials = self.credentials();
        match credentials.open_session(password) {
            Ok(session) => {
                self.limiter.lock().record_success();
                tracing::info!("vault unlocked");
                Ok(session)
            }
            Err(KeyVaultError::AuthFailed) => {
                let mut limiter = self.limiter.lock();
                if limiter.record_failure(Utc::now(), &self.policy) {
                    tracing::warn!(
                        lockout_secs = self.policy.lockout_seconds,
                        "too many failed unlock attempts"
                    );
                } else {
                    tracing::warn!(
                        remaining = limiter.remaining_attempts(&self.policy),
                        "unlock failed"
                    );
                }
                Err(KeyVaultError::AuthFailed)
            }
            Err(e) => Err(e),
        }
    }

    /// Unlock with the password held by the platform credential store.
    pub fn unlock_from_store(&self, store: &dyn CredentialStore) -> Result<VaultSession> {
        let bytes = store
            .retrieve(keys::MASTER_PASSWORD)?
            .ok_or(KeyVaultError::AuthFailed)?;
        let password = password_from_bytes(&bytes)?;
        self.unlock(&password)
    }

    /// Save the password to the credential store for quick unlock. The
    /// password is checked first so a typo is never remembered.
    pub fn remember_password(
        &self,
        store: &dyn CredentialStore,
        password: &SecretString,
        require_user_presence: bool,
    ) -> Result<()> {
        if !self.credentials().check_password(password)? {
            return Err(KeyVaultError::AuthFailed);
        }
        store.store(
            keys::MASTER_PASSWORD,
            password.expose_secret().as_bytes(),
            require_user_presence,
        )
    }

    pub fn forget_password(&self, store: &dyn CredentialStore) -> Result<()> {
        store.delete(keys::MASTER_PASSWORD)
    }

    /// Derive credentials for a new password without persisting anything.
    pub fn prepare_rotation(
        &self,
        new_password: &SecretString,
        kdf: Option<KdfParams>,
    ) -> Result<PendingRotation> {
        self.policy.validate_password(new_password.expose_secret())?;
        let kdf = kdf.unwrap_or_else(|| self.credentials.read().kdf.clone());
        let (mut credentials, session) = VaultCredentials::generate(new_password, kdf)?;
        credentials.created_at = self.credentials.read().created_at;
        Ok(PendingRotation {
            credentials,
            session,
        })
    }

    /// Persist rotated credentials. Call only after every entry was re-encrypted.
    pub fn commit_rotation(&self, credentials: &VaultCredentials) -> Result<()> {
        let mut committed = credentials.clone();
        committed.rotated_at = Some(Utc::now());
        committed.save(&self.path)?;
        *self.credentials.write() = committed;
        tracing::info!("vault credentials rotated");
        Ok(())
    }
}
