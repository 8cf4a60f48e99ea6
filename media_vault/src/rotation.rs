//! Media Vault - Key Rotation
//!
//! Re-encrypts entries from one session to another. A single entry is never
//! torn: the new file is fully written (and re-read) under a hidden sibling
//! name and renamed over the original in one step. A vault-wide rotation
//! records progress in a [`RotationJournal`] and rolls committed entries back
//! if any entry fails.

use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::control::{Phase, StreamControl};
use crate::crypto::VaultSession;
use crate::erase::DEFAULT_ERASE_CEILING;
use crate::error::{VaultError, VaultResult};
use crate::format::stream::{drain_chunks, encrypt_to_file, open_stream};
use crate::format::{detect_format, AttributeStore, EncryptOptions, FileFormat, MediaType};
use crate::journal::RotationJournal;
use crate::locks::EntryLocks;
use crate::secure_fs::{replace_atomically, sibling_temp_path, PartialFile, TempPlaintext};

#[derive(Debug, Clone)]
pub struct RotateOptions {
    /// Chunk size for the rewritten file; `None` keeps the entry's own
    pub chunk_size: Option<u32>,
    /// Ceiling for erasing the temporary plaintext
    pub erase_ceiling: u64,
    /// Re-read the new file under the new keys before swapping it in
    pub verify: bool,
    /// Media type recorded for legacy entries, which have no header
    pub legacy_media_type: MediaType,
}

impl Default for RotateOptions {
    fn default() -> Self {
        Self {
            chunk_size: None,
            erase_ceiling: DEFAULT_ERASE_CEILING,
            verify: true,
            legacy_media_type: MediaType::Photo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationOutcome {
    pub bytes: u64,
    /// The entry was in the legacy format and is now a stream file
    pub migrated_legacy: bool,
    pub metadata_preserved: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// SINGLE ENTRY
// ═══════════════════════════════════════════════════════════════════════════

/// Re-encrypt the entry at `path` from `old` to `new`.
///
/// On error the original file is untouched. The temporary plaintext is
/// erased on every path out of this function.
pub fn rotate_entry(
    path: &Path,
    old: &VaultSession,
    new: &VaultSession,
    attrs: &dyn AttributeStore,
    options: &RotateOptions,
    control: &StreamControl,
) -> VaultResult<RotationOutcome> {
    let format = detect_format(path)?;
    let reader = format.reader(attrs);

    // 1. metadata, raw bytes so it is re-embedded unchanged
    let metadata = match reader.read_metadata(path, old) {
        Ok(metadata) => metadata,
        Err(e) => {
            log::warn!("Metadata of {} unreadable, rotating without it: {}", path.display(), e);
            None
        }
    };

    let (media_type, chunk_size) = match format {
        FileFormat::Stream(header) => (header.media_type, header.chunk_size),
        FileFormat::Legacy => (options.legacy_media_type, crate::format::DEFAULT_CHUNK_SIZE),
    };

    // 2. decrypt to private temp plaintext
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut plaintext = TempPlaintext::new_in(dir, options.erase_ceiling)?;
    let bytes = {
        let file = plaintext.file_mut()?;
        let bytes = reader.decrypt_into(path, old, file, control)?;
        file.sync_data()?;
        file.seek(SeekFrom::Start(0))?;
        bytes
    };

    // 3. encrypt under the new keys at a sibling name
    let sibling = sibling_temp_path(path, "rotating");
    let mut encrypt_options = EncryptOptions::new(media_type)
        .with_chunk_size(options.chunk_size.unwrap_or(chunk_size));
    encrypt_options.metadata = metadata.as_ref().map(|m| m.to_vec());

    encrypt_to_file(plaintext.file_mut()?, &sibling, new, &encrypt_options, control)?;
    let pending = PartialFile::new(&sibling);

    if options.verify {
        let verified = verify_stream(&sibling, new, control)?;
        if verified != bytes {
            return Err(VaultError::CorruptedChunkLength {
                chunk: 0,
                reason: format!("rewritten entry holds {verified} of {bytes} bytes"),
            });
        }
    }

    // 4. swap in
    replace_atomically(&sibling, path)?;
    pending.commit();
    if let Err(e) = attrs.clear(path) {
        log::warn!("Failed to clear legacy attributes of {}: {}", path.display(), e);
    }

    log::info!(
        "Rotated {} ({} bytes{})",
        path.display(),
        bytes,
        if format == FileFormat::Legacy { ", migrated from legacy" } else { "" }
    );

    // 5. `plaintext` is erased on drop
    Ok(RotationOutcome {
        bytes,
        migrated_legacy: format == FileFormat::Legacy,
        metadata_preserved: metadata.is_some(),
    })
}

fn verify_stream(path: &Path, session: &VaultSession, control: &StreamControl) -> VaultResult<u64> {
    let reader = open_stream(path)?;
    let total = reader.header().original_size;
    let chunks = reader.into_chunks(session)?;
    drain_chunks(chunks, &mut io::sink(), control, Phase::Verify, Some(total))
}

// ═══════════════════════════════════════════════════════════════════════════
// WHOLE VAULT
// ═══════════════════════════════════════════════════════════════════════════

/// Journal key of an entry: its path relative to the vault root, `/`-separated
pub fn entry_key(root: &Path, path: &Path) -> VaultResult<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| VaultError::InvalidEntryPath(path.display().to_string()))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Everything a vault-wide rotation works with
pub struct VaultRotation<'a> {
    pub root: &'a Path,
    pub old: &'a VaultSession,
    pub new: &'a VaultSession,
    pub attrs: &'a dyn AttributeStore,
    pub locks: &'a EntryLocks,
    pub options: &'a RotateOptions,
    pub control: &'a StreamControl,
}

impl VaultRotation<'_> {
    /// Rotate every entry not yet committed in `journal`.
    ///
    /// When `resuming`, an entry that fails under the old keys but opens under
    /// the new ones is counted as done (it was swapped in before the journal
    /// write), and an entry journaled as done that does not open under the new
    /// keys is rotated again (rolled back before the journal write). On failure every committed entry is rotated back; the returned
    /// `RotationFailed` says whether that rollback completed.
    pub fn run(
        &self,
        journal: &mut RotationJournal,
        entries: &[PathBuf],
        resuming: bool,
    ) -> VaultResult<usize> {
        let mut failed = Vec::new();
        let mut cancelled = false;
        let mut rotated = 0;

        for path in entries {
            let key = entry_key(self.root, path)?;
            let _guard = self.locks.blocking_lock(path);
            if journal.is_committed(&key) {
                if !resuming || opens_with(path, self.new, self.attrs) {
                    continue;
                }
                // reverted on disk but the journal write was lost
                log::warn!("{} is journaled as rotated but still under the old keys", key);
                journal.mark_reverted(&key)?;
            }

            match rotate_entry(path, self.old, self.new, self.attrs, self.options, self.control) {
                Ok(_) => {
                    journal.mark_committed(&key)?;
                    rotated += 1;
                }
                Err(VaultError::CancellationRequested) => {
                    cancelled = true;
                    failed.push(key);
                    break;
                }
                Err(e) => {
                    if resuming && opens_with(path, self.new, self.attrs) {
                        log::info!("{} already rotated, recording it", key);
                        journal.mark_committed(&key)?;
                        continue;
                    }
                    log::error!("Rotation of {} failed: {}", key, e);
                    failed.push(key);
                    break;
                }
            }
        }

        if failed.is_empty() {
            return Ok(rotated);
        }

        let rolled_back = self.roll_back(journal);
        if cancelled && rolled_back {
            return Err(VaultError::CancellationRequested);
        }
        Err(VaultError::RotationFailed {
            failed,
            rolled_back,
        })
    }

    fn roll_back(&self, journal: &mut RotationJournal) -> bool {
        let undo = StreamControl::new();
        let mut complete = true;

        for key in journal.committed.clone() {
            let path = self.root.join(&key);
            let _guard = self.locks.blocking_lock(&path);
            let reverted = rotate_entry(&path, self.new, self.old, self.attrs, self.options, &undo)
                .and_then(|_| journal.mark_reverted(&key));
            if let Err(e) = reverted {
                log::error!("Rollback of {} failed: {}", key, e);
                complete = false;
            }
        }

        if complete {
            log::warn!("Rotation rolled back, old password still in effect");
        }
        complete
    }
}

/// True when the entry fully decrypts under `session`.
fn opens_with(path: &Path, session: &VaultSession, attrs: &dyn AttributeStore) -> bool {
    crate::entry::verify_entry(path, session, attrs, &StreamControl::new()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::VaultKey;
    use crate::format::legacy::write_legacy_fixture;
    use crate::format::stream::{decrypt_to_vec, read_metadata};
    use crate::format::MemoryAttributeStore;
    use media_keyvault::{KdfParams, VaultCredentials};
    use secrecy::SecretString;
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn session(seed: u8) -> VaultSession {
        VaultSession::new(VaultKey::new([seed; 32]), VaultKey::new([seed ^ 0x55; 32]))
    }

    fn write_entry(path: &Path, s: &VaultSession, data: &[u8], metadata: Option<&[u8]>) {
        let mut options = EncryptOptions::new(MediaType::Video).with_chunk_size(1024);
        options.metadata = metadata.map(<[u8]>::to_vec);
        encrypt_to_file(&mut Cursor::new(data), path, s, &options, &StreamControl::new()).unwrap();
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_rotate_keeps_content_and_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.enc");
        let (old, new) = (session(1), session(2));
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let doc = br#"{"filename":"clip.mp4","favorite":false}"#;
        write_entry(&path, &old, &data, Some(doc));

        let attrs = MemoryAttributeStore::new();
        let outcome =
            rotate_entry(&path, &old, &new, &attrs, &RotateOptions::default(), &StreamControl::new()).unwrap();
        assert_eq!(outcome.bytes, 5000);
        assert!(outcome.metadata_preserved);
        assert!(!outcome.migrated_legacy);

        assert_eq!(decrypt_to_vec(&path, &new, &StreamControl::new()).unwrap().as_slice(), data.as_slice());
        assert!(decrypt_to_vec(&path, &old, &StreamControl::new()).is_err());
        assert_eq!(read_metadata(&path, &new).unwrap().unwrap().as_slice(), doc);
        assert_eq!(dir_names(dir.path()), vec!["clip.enc"]);
    }

    #[test]
    fn test_failure_before_swap_leaves_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.enc");
        let (old, new) = (session(3), session(4));
        write_entry(&path, &old, &vec![7u8; 4096], None);
        let before = fs::read(&path).unwrap();

        // cancel as soon as the encrypt phase reports progress
        let control = StreamControl::new();
        let trigger = control.clone();
        let control = control.on_progress(move |p| {
            if p.phase == Phase::Encrypt {
                trigger.cancel();
            }
        });

        let attrs = MemoryAttributeStore::new();
        let result = rotate_entry(&path, &old, &new, &attrs, &RotateOptions::default(), &control);
        assert!(matches!(result, Err(VaultError::CancellationRequested)));

        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(
            decrypt_to_vec(&path, &old, &StreamControl::new()).unwrap().as_slice(),
            vec![7u8; 4096].as_slice()
        );
        assert_eq!(dir_names(dir.path()), vec!["a.enc"]);
    }

    #[test]
    fn test_wrong_old_key_changes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.enc");
        write_entry(&path, &session(5), b"data", None);
        let before = fs::read(&path).unwrap();

        let attrs = MemoryAttributeStore::new();
        let result = rotate_entry(
            &path,
            &session(6),
            &session(7),
            &attrs,
            &RotateOptions::default(),
            &StreamControl::new(),
        );
        assert!(matches!(result, Err(VaultError::AuthenticationFailed)));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(dir_names(dir.path()), vec!["a.enc"]);
    }

    #[test]
    fn test_legacy_entry_migrates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.enc");
        let (old, new) = (session(8), session(9));
        let attrs = MemoryAttributeStore::new();
        write_legacy_fixture(&path, &old, b"legacy photo", &attrs).unwrap();

        let options = RotateOptions {
            legacy_media_type: MediaType::Photo,
            ..Default::default()
        };
        let outcome = rotate_entry(&path, &old, &new, &attrs, &options, &StreamControl::new()).unwrap();
        assert!(outcome.migrated_legacy);
        assert!(!outcome.metadata_preserved);

        match detect_format(&path).unwrap() {
            FileFormat::Stream(header) => assert_eq!(header.media_type, MediaType::Photo),
            FileFormat::Legacy => panic!("entry still legacy"),
        }
        assert_eq!(decrypt_to_vec(&path, &new, &StreamControl::new()).unwrap().as_slice(), b"legacy photo");
        assert!(attrs.get(&path, crate::format::legacy::NONCE_ATTR).unwrap().is_none());
    }

    fn journal(dir: &Path) -> RotationJournal {
        let password = SecretString::from("password2".to_owned());
        let (credentials, _) = VaultCredentials::generate(&password, KdfParams::insecure_fast()).unwrap();
        RotationJournal::begin(&dir.join("rotation.journal.json"), credentials).unwrap()
    }

    #[test]
    fn test_vault_rotation_rolls_back_on_failure() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir_all(&media).unwrap();
        let (old, new) = (session(10), session(11));

        let good = media.join("a.enc");
        let bad = media.join("b.enc");
        write_entry(&good, &old, b"first", None);
        // foreign key: fails under `old`
        write_entry(&bad, &session(12), b"second", None);

        let attrs = MemoryAttributeStore::new();
        let locks = EntryLocks::new();
        let options = RotateOptions::default();
        let control = StreamControl::new();
        let rotation = VaultRotation {
            root: dir.path(),
            old: &old,
            new: &new,
            attrs: &attrs,
            locks: &locks,
            options: &options,
            control: &control,
        };

        let mut journal = journal(dir.path());
        let result = rotation.run(&mut journal, &[good.clone(), bad.clone()], false);
        match result {
            Err(VaultError::RotationFailed { failed, rolled_back }) => {
                assert_eq!(failed, vec!["media/b.enc".to_string()]);
                assert!(rolled_back);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(journal.committed.is_empty());
        assert_eq!(decrypt_to_vec(&good, &old, &StreamControl::new()).unwrap().as_slice(), b"first");
    }

    #[test]
    fn test_resume_counts_already_rotated_entries() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir_all(&media).unwrap();
        let (old, new) = (session(13), session(14));

        let done = media.join("a.enc");
        let todo = media.join("b.enc");
        // swapped in before the journal recorded it
        write_entry(&done, &new, b"rotated", None);
        write_entry(&todo, &old, b"pending", None);

        let attrs = MemoryAttributeStore::new();
        let locks = EntryLocks::new();
        let options = RotateOptions::default();
        let control = StreamControl::new();
        let rotation = VaultRotation {
            root: dir.path(),
            old: &old,
            new: &new,
            attrs: &attrs,
            locks: &locks,
            options: &options,
            control: &control,
        };

        let mut journal = journal(dir.path());
        let rotated = rotation.run(&mut journal, &[done.clone(), todo.clone()], true).unwrap();
        assert_eq!(rotated, 1);
        assert!(journal.is_committed("media/a.enc"));
        assert!(journal.is_committed("media/b.enc"));
        assert_eq!(decrypt_to_vec(&todo, &new, &StreamControl::new()).unwrap().as_slice(), b"pending");
    }

    #[test]
    fn test_resume_rerotates_entry_reverted_before_journal_write() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir_all(&media).unwrap();
        let (old, new) = (session(15), session(16));

        let reverted = media.join("a.enc");
        let todo = media.join("b.enc");
        // rolled back on disk, journal still lists it as rotated
        write_entry(&reverted, &old, b"alpha", None);
        write_entry(&todo, &old, b"beta", None);

        let attrs = MemoryAttributeStore::new();
        let locks = EntryLocks::new();
        let options = RotateOptions::default();
        let control = StreamControl::new();
        let rotation = VaultRotation {
            root: dir.path(),
            old: &old,
            new: &new,
            attrs: &attrs,
            locks: &locks,
            options: &options,
            control: &control,
        };

        let mut journal = journal(dir.path());
        journal.mark_committed("media/a.enc").unwrap();

        let rotated = rotation.run(&mut journal, &[reverted.clone(), todo.clone()], true).unwrap();
        assert_eq!(rotated, 2);
        assert!(journal.is_committed("media/a.enc"));
        assert!(journal.is_committed("media/b.enc"));
        assert_eq!(decrypt_to_vec(&reverted, &new, &StreamControl::new()).unwrap().as_slice(), b"alpha");
        assert_eq!(decrypt_to_vec(&todo, &new, &StreamControl::new()).unwrap().as_slice(), b"beta");
    }

    #[test]
    fn test_committed_entries_skipped_without_resume() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir_all(&media).unwrap();
        let (old, new) = (session(17), session(18));

        let done = media.join("a.enc");
        write_entry(&done, &new, b"already", None);

        let attrs = MemoryAttributeStore::new();
        let locks = EntryLocks::new();
        let options = RotateOptions::default();
        let control = StreamControl::new();
        let rotation = VaultRotation {
            root: dir.path(),
            old: &old,
            new: &new,
            attrs: &attrs,
            locks: &locks,
            options: &options,
            control: &control,
        };

        let mut journal = journal(dir.path());
        journal.mark_committed("media/a.enc").unwrap();
        assert_eq!(rotation.run(&mut journal, &[done.clone()], false).unwrap(), 0);
        assert_eq!(decrypt_to_vec(&done, &new, &StreamControl::new()).unwrap().as_slice(), b"already");
    }

    #[test]
    fn test_entry_key() {
        let root = Path::new("/vault");
        assert_eq!(entry_key(root, Path::new("/vault/media/x.enc")).unwrap(), "media/x.enc");
        assert!(entry_key(root, Path::new("/elsewhere/x.enc")).is_err());
    }
}
