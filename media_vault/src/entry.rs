//! Media Vault - Entry Operations
//!
//! Format-agnostic operations on a single entry file, each taking the
//! session explicitly. Reads detect the format once and dispatch to the
//! matching [`EntryReader`]; writes always produce the stream format.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use zeroize::Zeroizing;

use crate::control::StreamControl;
use crate::crypto::VaultSession;
use crate::erase::{erase_file, EraseReport};
use crate::error::{VaultError, VaultResult};
use crate::format::legacy::decrypt_legacy;
use crate::format::stream::{encrypt_to_file, open_stream};
use crate::format::{
    detect_format, AttributeStore, ChunkReader, EncryptOptions, FileFormat, MediaType, StreamSummary,
};
use crate::metadata::EntryMetadata;
use crate::secure_fs::{create_new, replace_atomically, sibling_temp_path, PartialFile};

pub use crate::rotation::{rotate_entry, RotateOptions, RotationOutcome};

/// Encrypt `source` into a new stream-format entry at `dest`.
pub fn encrypt_entry(
    source: &mut dyn Read,
    dest: &Path,
    session: &VaultSession,
    media_type: MediaType,
    metadata: Option<&EntryMetadata>,
    chunk_size: u32,
    control: &StreamControl,
) -> VaultResult<StreamSummary> {
    let mut options = EncryptOptions::new(media_type).with_chunk_size(chunk_size);
    options.metadata = metadata.map(EntryMetadata::to_bytes).transpose()?;
    encrypt_to_file(source, dest, session, &options, control)
}

/// Lazily decrypted entry content
pub enum DecryptedEntry<'s> {
    Stream(ChunkReader<'s, BufReader<File>>),
    /// Legacy bodies are authenticated as a whole, so they arrive in one piece
    Legacy(Option<Zeroizing<Vec<u8>>>),
}

impl DecryptedEntry<'_> {
    pub fn format_name(&self) -> &'static str {
        match self {
            DecryptedEntry::Stream(_) => "stream",
            DecryptedEntry::Legacy(_) => "legacy",
        }
    }
}

impl Iterator for DecryptedEntry<'_> {
    type Item = VaultResult<Zeroizing<Vec<u8>>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            DecryptedEntry::Stream(chunks) => chunks.next(),
            DecryptedEntry::Legacy(body) => body.take().map(Ok),
        }
    }
}

/// Open an entry for chunk-by-chunk decryption.
pub fn decrypt_entry<'s>(
    path: &Path,
    session: &'s VaultSession,
    attrs: &dyn AttributeStore,
) -> VaultResult<DecryptedEntry<'s>> {
    match detect_format(path)? {
        FileFormat::Stream(_) => Ok(DecryptedEntry::Stream(open_stream(path)?.into_chunks(session)?)),
        FileFormat::Legacy => Ok(DecryptedEntry::Legacy(Some(decrypt_legacy(path, session, attrs)?))),
    }
}

/// Decrypt an entry into `sink`; returns the plaintext byte count.
pub fn decrypt_entry_into(
    path: &Path,
    session: &VaultSession,
    attrs: &dyn AttributeStore,
    sink: &mut dyn Write,
    control: &StreamControl,
) -> VaultResult<u64> {
    detect_format(path)?
        .reader(attrs)
        .decrypt_into(path, session, sink, control)
}

/// Decrypt an entry into memory. Nothing is returned unless every part
/// authenticated.
pub fn decrypt_entry_to_vec(
    path: &Path,
    session: &VaultSession,
    attrs: &dyn AttributeStore,
    control: &StreamControl,
) -> VaultResult<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(Vec::new());
    decrypt_entry_into(path, session, attrs, &mut *out, control)?;
    Ok(out)
}

/// Decrypt an entry to a new plaintext file at `dest`, via a hidden sibling
/// that is renamed into place only after the whole entry authenticated.
pub fn decrypt_entry_to_file(
    path: &Path,
    dest: &Path,
    session: &VaultSession,
    attrs: &dyn AttributeStore,
    control: &StreamControl,
) -> VaultResult<u64> {
    if dest.exists() {
        return Err(VaultError::FileAlreadyExists(dest.display().to_string()));
    }

    let temp = sibling_temp_path(dest, "partial");
    let mut file = create_new(&temp)?;
    let pending = PartialFile::new(&temp);

    let bytes = decrypt_entry_into(path, session, attrs, &mut file, control)?;
    file.sync_all()?;
    drop(file);

    replace_atomically(&temp, dest)?;
    pending.commit();
    Ok(bytes)
}

/// Decrypt the whole entry without keeping any plaintext.
pub fn verify_entry(
    path: &Path,
    session: &VaultSession,
    attrs: &dyn AttributeStore,
    control: &StreamControl,
) -> VaultResult<u64> {
    decrypt_entry_into(path, session, attrs, &mut io::sink(), control)
}

/// Embedded metadata of an entry; `None` for legacy entries and stream files
/// written without metadata.
pub fn read_metadata(
    path: &Path,
    session: &VaultSession,
    attrs: &dyn AttributeStore,
) -> VaultResult<Option<EntryMetadata>> {
    let raw = detect_format(path)?.reader(attrs).read_metadata(path, session)?;
    raw.map(|bytes| EntryMetadata::from_bytes(&bytes)).transpose()
}

/// Securely erase an entry file.
pub fn erase_entry(path: &Path, erase_ceiling: u64) -> VaultResult<EraseReport> {
    erase_file(path, erase_ceiling)
}
