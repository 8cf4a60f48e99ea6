//! Vault configuration (`vault.json`)

use std::fs;
use std::io;
use std::path::Path;

use media_keyvault::{KdfParams, UnlockPolicy};
use serde::{Deserialize, Serialize};

use crate::erase::DEFAULT_ERASE_CEILING;
use crate::error::VaultResult;
use crate::format::{MediaType, DEFAULT_CHUNK_SIZE};
use crate::secure_fs::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault name
    pub name: String,
    /// Plaintext bytes per chunk for newly written entries
    pub chunk_size: u32,
    /// Files above this size are unlinked without overwrite passes
    pub erase_ceiling: u64,
    /// Concurrent blocking crypto/IO jobs
    pub workers: usize,
    /// KDF parameters for new credentials
    pub kdf: KdfParams,
    pub unlock_policy: UnlockPolicy,
    /// Re-read every rotated entry under the new keys before swapping it in
    pub verify_after_rotation: bool,
    /// Assumed media type of legacy entries, which carry no header
    pub legacy_media_type: MediaType,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "Media Vault".into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            erase_ceiling: DEFAULT_ERASE_CEILING,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .clamp(1, 8),
            kdf: KdfParams::default(),
            unlock_policy: UnlockPolicy::default(),
            verify_after_rotation: true,
            legacy_media_type: MediaType::Photo,
        }
    }
}

impl VaultConfig {
    /// Load from `path`; defaults when the file does not exist.
    pub fn load(path: &Path) -> VaultResult<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> VaultResult<()> {
        write_atomic(path, &serde_json::to_vec_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = VaultConfig::load(&dir.path().join("vault.json")).unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.erase_ceiling, 100 * 1024 * 1024);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json");
        fs::write(&path, br#"{"chunk_size": 65536}"#).unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.kdf, KdfParams::default());
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json");
        let config = VaultConfig {
            workers: 3,
            kdf: KdfParams::insecure_fast(),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(VaultConfig::load(&path).unwrap(), config);
    }
}
