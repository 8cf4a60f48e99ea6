//! Media Vault - On-disk Formats
//!
//! Every entry is either a chunked stream file (`SVSTRM01`, read and written)
//! or a legacy whole-file AEAD blob whose nonce and HMAC live in extended
//! attributes (read only). The format is detected once per file by looking at
//! its first bytes and dispatched through [`EntryReader`].

pub mod header;
pub mod legacy;
pub mod stream;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use zeroize::Zeroizing;

pub use header::{
    MediaType, StreamHeader, DEFAULT_CHUNK_SIZE, HEADER_LEN_V1, HEADER_LEN_V2, MAGIC,
    MAX_CHUNK_SIZE,
};
pub use legacy::{AttributeStore, LegacyFormat, MemoryAttributeStore, XattrStore};
pub use stream::{ChunkReader, EncryptOptions, StreamFormat, StreamReader, StreamSummary, StreamWriter};

use crate::control::StreamControl;
use crate::crypto::VaultSession;
use crate::error::{VaultError, VaultResult};
use crate::secure_fs::open_existing;

/// Detected container format of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Stream(StreamHeader),
    Legacy,
}

impl FileFormat {
    /// Reader for this format. Legacy entries need the attribute store that
    /// holds their nonce and HMAC.
    pub fn reader<'a>(&self, attrs: &'a dyn AttributeStore) -> Box<dyn EntryReader + 'a> {
        match *self {
            FileFormat::Stream(header) => Box::new(StreamFormat::new(header)),
            FileFormat::Legacy => Box::new(LegacyFormat::new(attrs)),
        }
    }

    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            FileFormat::Stream(header) => Some(header.media_type),
            FileFormat::Legacy => None,
        }
    }
}

/// Decryption interface shared by both formats
pub trait EntryReader {
    /// Decrypt the entry body into `sink`; returns the plaintext byte count.
    fn decrypt_into(
        &self,
        path: &Path,
        session: &VaultSession,
        sink: &mut dyn Write,
        control: &StreamControl,
    ) -> VaultResult<u64>;

    /// Raw embedded metadata document, if the format carries one.
    fn read_metadata(
        &self,
        path: &Path,
        session: &VaultSession,
    ) -> VaultResult<Option<Zeroizing<Vec<u8>>>>;
}

/// True when `bytes` start with the stream magic
pub fn has_stream_magic(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
}

/// Classify a file prefix. Never fails: anything that is not a well-formed
/// stream header is `Legacy`.
pub fn sniff(bytes: &[u8]) -> FileFormat {
    if !has_stream_magic(bytes) {
        return FileFormat::Legacy;
    }
    let mut cursor = bytes;
    match StreamHeader::decode(&mut cursor) {
        Ok(header) => FileFormat::Stream(header),
        Err(_) => FileFormat::Legacy,
    }
}

/// Classify the file at `path`. Unlike [`sniff`], a file carrying the stream
/// magic with a truncated or unsupported header is reported as an error
/// rather than handed to the legacy reader.
pub fn detect_format(path: &Path) -> VaultResult<FileFormat> {
    let mut file: File = open_existing(path)?;
    let mut prefix = [0u8; MAGIC.len()];
    let n = read_full(&mut file, &mut prefix)?;
    if !has_stream_magic(&prefix[..n]) {
        return Ok(FileFormat::Legacy);
    }

    let mut chained = (&prefix[..]).chain(file);
    Ok(FileFormat::Stream(StreamHeader::decode(&mut chained)?))
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub(crate) fn not_found(path: &Path) -> VaultError {
    VaultError::FileNotFound(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_sniff_stream_header() {
        let header = StreamHeader::new(MediaType::Photo, 1024, 0);
        assert_eq!(sniff(&header.encode()), FileFormat::Stream(header));
    }

    #[test]
    fn test_sniff_foreign_bytes_is_legacy() {
        assert_eq!(sniff(b""), FileFormat::Legacy);
        assert_eq!(sniff(b"\xff\xd8\xff\xe0JFIF"), FileFormat::Legacy);
        assert_eq!(sniff(b"SVSTRM0"), FileFormat::Legacy);
    }

    #[test]
    fn test_detect_truncated_stream_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.enc");
        let header = StreamHeader::new(MediaType::Video, 1024, 0).encode();
        std::fs::write(&path, &header[..20]).unwrap();

        assert!(matches!(
            detect_format(&path),
            Err(VaultError::IncompleteHeader { actual: 20, .. })
        ));
    }

    #[test]
    fn test_detect_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            detect_format(&dir.path().join("nope")),
            Err(VaultError::FileNotFound(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_sniff_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = sniff(&bytes);
        }

        #[test]
        fn prop_without_magic_is_legacy(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assume!(!has_stream_magic(&bytes));
            prop_assert_eq!(sniff(&bytes), FileFormat::Legacy);
        }
    }
}
