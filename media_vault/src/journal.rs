//! Rotation journal (`rotation.journal.json`)
//!
//! Written before the first entry is re-encrypted and removed after the new
//! credentials are committed. While it exists the vault refuses a plain
//! unlock; the password change has to be resumed.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use media_keyvault::VaultCredentials;
use serde::{Deserialize, Serialize};

use crate::error::VaultResult;
use crate::secure_fs::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationJournal {
    pub started_at: DateTime<Utc>,
    /// Salt, verifier and KDF parameters of the new password
    pub new_credentials: VaultCredentials,
    /// Entries (relative to the vault root) already re-encrypted
    pub committed: BTreeSet<String>,
    #[serde(skip)]
    path: PathBuf,
}

impl RotationJournal {
    /// Create and persist a journal at `path`.
    pub fn begin(path: &Path, new_credentials: VaultCredentials) -> VaultResult<Self> {
        let journal = Self {
            started_at: Utc::now(),
            new_credentials,
            committed: BTreeSet::new(),
            path: path.to_path_buf(),
        };
        journal.save()?;
        log::info!("Rotation journal started at {}", path.display());
        Ok(journal)
    }

    pub fn load(path: &Path) -> VaultResult<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => {
                let mut journal: Self = serde_json::from_slice(&bytes)?;
                journal.path = path.to_path_buf();
                Ok(Some(journal))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn is_committed(&self, entry: &str) -> bool {
        self.committed.contains(entry)
    }

    /// Record `entry` as rotated and persist.
    pub fn mark_committed(&mut self, entry: &str) -> VaultResult<()> {
        self.committed.insert(entry.to_string());
        self.save()
    }

    /// Record `entry` as back under the old keys and persist.
    pub fn mark_reverted(&mut self, entry: &str) -> VaultResult<()> {
        self.committed.remove(entry);
        self.save()
    }

    fn save(&self) -> VaultResult<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(self)?)
    }

    /// Delete the journal file (rotation finished or fully rolled back).
    pub fn finish(self) -> VaultResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        crate::secure_fs::sync_parent_dir(&self.path)?;
        log::info!("Rotation journal closed");
        Ok(())
    }
}
