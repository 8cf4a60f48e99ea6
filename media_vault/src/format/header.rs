//! Stream header and the metadata block
//!
//! ```text
//! [MAGIC 8B]["SVSTRM01"]
//! [VERSION 1B][0x01 | 0x02]
//! [MEDIA_TYPE 1B][0x01 photo | 0x02 video]
//! [RESERVED 2B][0x0000]
//! [ORIGINAL_SIZE 8B LE]
//! [CHUNK_SIZE 4B LE]
//! [METADATA_LEN 4B LE]                          (v2 only)
//! [NONCE 12B][HMAC 32B][CIPHERTEXT+TAG]         (v2, METADATA_LEN > 0)
//! ```

use std::io::Read;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::read_full;
use crate::crypto::{compute_hmac, open, seal, verify_hmac, SealedBox, VaultSession, HMAC_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{VaultError, VaultResult};

/// Magic bytes identifying a stream-format entry
pub const MAGIC: &[u8; 8] = b"SVSTRM01";

pub const VERSION_1: u8 = 0x01;
pub const VERSION_2: u8 = 0x02;

/// Version emitted by the writer
pub const CURRENT_VERSION: u8 = VERSION_2;

/// MAGIC + VERSION + MEDIA_TYPE + RESERVED + ORIGINAL_SIZE + CHUNK_SIZE
pub const HEADER_LEN_V1: usize = 8 + 1 + 1 + 2 + 8 + 4;

/// v1 header + METADATA_LEN
pub const HEADER_LEN_V2: usize = HEADER_LEN_V1 + 4;

/// Offset of ORIGINAL_SIZE, patched when the writer finalizes
pub const ORIGINAL_SIZE_OFFSET: u64 = 12;

/// NONCE + HMAC in front of the metadata ciphertext
pub const METADATA_OVERHEAD: usize = NONCE_LEN + HMAC_LEN;

/// 4 MiB
pub const DEFAULT_CHUNK_SIZE: u32 = 4 * 1024 * 1024;

/// Largest chunk size a reader will allocate for
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

/// Largest metadata block a reader will allocate for
pub const MAX_METADATA_LEN: u32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    pub fn to_byte(self) -> u8 {
        match self {
            MediaType::Photo => 0x01,
            MediaType::Video => 0x02,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(MediaType::Photo),
            0x02 => Some(MediaType::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u8,
    pub media_type: MediaType,
    pub original_size: u64,
    pub chunk_size: u32,
    /// Always 0 for version 1
    pub metadata_len: u32,
}

impl StreamHeader {
    pub fn new(media_type: MediaType, chunk_size: u32, metadata_len: u32) -> Self {
        Self {
            version: CURRENT_VERSION,
            media_type,
            original_size: 0,
            chunk_size,
            metadata_len,
        }
    }

    pub fn header_len(&self) -> usize {
        if self.version >= VERSION_2 {
            HEADER_LEN_V2
        } else {
            HEADER_LEN_V1
        }
    }

    /// Offset of the first chunk record
    pub fn body_offset(&self) -> u64 {
        self.header_len() as u64 + self.metadata_len as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN_V2);
        out.extend_from_slice(MAGIC);
        out.push(self.version);
        out.push(self.media_type.to_byte());
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&self.original_size.to_le_bytes());
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        if self.version >= VERSION_2 {
            out.extend_from_slice(&self.metadata_len.to_le_bytes());
        }
        out
    }

    /// Parse a header from the start of `reader`. Leaves the reader
    /// positioned right after the header.
    pub fn decode<R: Read>(reader: &mut R) -> VaultResult<Self> {
        let mut fixed = [0u8; HEADER_LEN_V1];
        let n = read_full(reader, &mut fixed)?;
        if n >= MAGIC.len() && &fixed[..MAGIC.len()] != MAGIC {
            return Err(VaultError::UnsupportedFormat("bad magic".into()));
        }
        if n < HEADER_LEN_V1 {
            return Err(VaultError::IncompleteHeader {
                expected: HEADER_LEN_V1,
                actual: n,
            });
        }

        let version = fixed[8];
        if version != VERSION_1 && version != VERSION_2 {
            return Err(VaultError::UnsupportedFormat(format!(
                "unsupported stream version {version}"
            )));
        }

        let media_type = MediaType::from_byte(fixed[9]).ok_or_else(|| {
            VaultError::UnsupportedFormat(format!("unknown media type 0x{:02x}", fixed[9]))
        })?;

        let original_size = u64::from_le_bytes(fixed[12..20].try_into().unwrap_or_default());
        let chunk_size = u32::from_le_bytes(fixed[20..24].try_into().unwrap_or_default());
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(VaultError::UnsupportedFormat(format!(
                "chunk size {chunk_size} out of range"
            )));
        }

        let metadata_len = if version >= VERSION_2 {
            let mut len = [0u8; 4];
            let m = read_full(reader, &mut len)?;
            if m < len.len() {
                return Err(VaultError::IncompleteHeader {
                    expected: HEADER_LEN_V2,
                    actual: HEADER_LEN_V1 + m,
                });
            }
            let metadata_len = u32::from_le_bytes(len);
            let min = (METADATA_OVERHEAD + TAG_LEN) as u32;
            if metadata_len != 0 && !(min..=MAX_METADATA_LEN).contains(&metadata_len) {
                return Err(VaultError::UnsupportedFormat(format!(
                    "metadata length {metadata_len} out of range"
                )));
            }
            metadata_len
        } else {
            0
        };

        Ok(Self {
            version,
            media_type,
            original_size,
            chunk_size,
            metadata_len,
        })
    }
}

/// Seal a metadata document into `NONCE || HMAC || CIPHERTEXT+TAG`.
pub fn seal_metadata(session: &VaultSession, document: &[u8]) -> VaultResult<Vec<u8>> {
    let sealed = seal(session.encryption_key(), document)?;
    let body = sealed.combined();
    let mac = compute_hmac(session.integrity_key(), &[&sealed.nonce, &body])?;

    let mut block = Vec::with_capacity(METADATA_OVERHEAD + body.len());
    block.extend_from_slice(&sealed.nonce);
    block.extend_from_slice(&mac);
    block.extend_from_slice(&body);
    Ok(block)
}

/// Verify and decrypt a metadata block. HMAC first, then AEAD.
pub fn open_metadata(session: &VaultSession, block: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
    if block.len() < METADATA_OVERHEAD + TAG_LEN {
        return Err(VaultError::AuthenticationFailed);
    }
    let (nonce, rest) = block.split_at(NONCE_LEN);
    let (mac, body) = rest.split_at(HMAC_LEN);

    if !verify_hmac(session.integrity_key(), &[nonce, body], mac)? {
        return Err(VaultError::AuthenticationFailed);
    }

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce);
    open(session.encryption_key(), &SealedBox::from_combined(nonce_bytes, body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::VaultKey;
    use std::io::Cursor;

    fn session() -> VaultSession {
        VaultSession::new(VaultKey::new([1u8; 32]), VaultKey::new([2u8; 32]))
    }

    #[test]
    fn test_header_layout_is_bit_exact() {
        let mut header = StreamHeader::new(MediaType::Video, DEFAULT_CHUNK_SIZE, 60);
        header.original_size = 0x0102_0304_0506_0708;
        let bytes = header.encode();

        assert_eq!(bytes.len(), HEADER_LEN_V2);
        assert_eq!(&bytes[0..8], b"SVSTRM01");
        assert_eq!(bytes[8], 0x02);
        assert_eq!(bytes[9], 0x02);
        assert_eq!(&bytes[10..12], &[0, 0]);
        assert_eq!(&bytes[12..20], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[20..24], &DEFAULT_CHUNK_SIZE.to_le_bytes());
        assert_eq!(&bytes[24..28], &60u32.to_le_bytes());

        let decoded = StreamHeader::decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_v1_header_has_no_metadata_len() {
        let header = StreamHeader {
            version: VERSION_1,
            media_type: MediaType::Photo,
            original_size: 5,
            chunk_size: 1024,
            metadata_len: 0,
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), HEADER_LEN_V1);
        assert_eq!(StreamHeader::decode(&mut Cursor::new(bytes)).unwrap(), header);
    }

    #[test]
    fn test_truncated_header() {
        let bytes = StreamHeader::new(MediaType::Photo, 1024, 0).encode();
        let result = StreamHeader::decode(&mut Cursor::new(&bytes[..15]));
        assert!(matches!(result, Err(VaultError::IncompleteHeader { actual: 15, .. })));

        let result = StreamHeader::decode(&mut Cursor::new(&bytes[..26]));
        assert!(matches!(result, Err(VaultError::IncompleteHeader { actual: 26, .. })));
    }

    #[test]
    fn test_bad_fields_rejected() {
        let mut bytes = StreamHeader::new(MediaType::Photo, 1024, 0).encode();
        bytes[9] = 0x07;
        assert!(matches!(
            StreamHeader::decode(&mut Cursor::new(&bytes)),
            Err(VaultError::UnsupportedFormat(_))
        ));

        let mut bytes = StreamHeader::new(MediaType::Photo, 1024, 0).encode();
        bytes[8] = 0x09;
        assert!(StreamHeader::decode(&mut Cursor::new(&bytes)).is_err());

        let bytes = StreamHeader::new(MediaType::Photo, 0, 0).encode();
        assert!(StreamHeader::decode(&mut Cursor::new(&bytes)).is_err());
    }

    #[test]
    fn test_metadata_block() {
        let s = session();
        let block = seal_metadata(&s, br#"{"filename":"a.jpg"}"#).unwrap();
        assert_eq!(block.len(), METADATA_OVERHEAD + 20 + TAG_LEN);
        assert_eq!(open_metadata(&s, &block).unwrap().as_slice(), br#"{"filename":"a.jpg"}"#);

        let mut tampered = block.clone();
        tampered[METADATA_OVERHEAD + 1] ^= 0x01;
        assert!(matches!(open_metadata(&s, &tampered), Err(VaultError::AuthenticationFailed)));

        let other = VaultSession::new(VaultKey::new([1u8; 32]), VaultKey::new([3u8; 32]));
        assert!(matches!(open_metadata(&other, &block), Err(VaultError::AuthenticationFailed)));
    }
}
