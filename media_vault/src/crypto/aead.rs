//! Media Vault - AEAD Codec
//!
//! AES-256-GCM with a fresh random 96-bit nonce per call and a detached
//! 16-byte tag. Opening fails closed: the tag is checked (in constant time)
//! before any plaintext is released, and the working buffer is zeroized on
//! failure.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::{generate_nonce, VaultKey, HMAC_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{VaultError, VaultResult};

type HmacSha256 = Hmac<Sha256>;

/// Output of one `seal` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl SealedBox {
    /// `ciphertext || tag`, the layout used for metadata and legacy bodies
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Split `ciphertext || tag`
    pub fn from_combined(nonce: [u8; NONCE_LEN], combined: &[u8]) -> VaultResult<Self> {
        if combined.len() < TAG_LEN {
            return Err(VaultError::AuthenticationFailed);
        }
        let (ciphertext, tag) = combined.split_at(combined.len() - TAG_LEN);
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag);
        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
            tag: tag_bytes,
        })
    }
}

fn cipher(key: &VaultKey) -> VaultResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.expose()).map_err(|e| VaultError::EncryptionFailed(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════
// AES-256-GCM
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt `buffer` in place; returns the nonce and tag.
pub fn seal_in_place(key: &VaultKey, buffer: &mut [u8]) -> VaultResult<([u8; NONCE_LEN], [u8; TAG_LEN])> {
    let nonce = generate_nonce();
    let tag = cipher(key)?
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", buffer)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok((nonce, tag_bytes))
}

/// Encrypt one plaintext buffer
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> VaultResult<SealedBox> {
    let mut ciphertext = plaintext.to_vec();
    let (nonce, tag) = seal_in_place(key, &mut ciphertext)?;
    Ok(SealedBox {
        nonce,
        ciphertext,
        tag,
    })
}

/// Decrypt an owned ciphertext buffer in place. Nothing is returned unless
/// the tag verifies.
pub fn open_in_place(
    key: &VaultKey,
    nonce: &[u8; NONCE_LEN],
    mut buffer: Zeroizing<Vec<u8>>,
    tag: &[u8; TAG_LEN],
) -> VaultResult<Zeroizing<Vec<u8>>> {
    cipher(key)?
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            buffer.as_mut_slice(),
            Tag::from_slice(tag),
        )
        .map_err(|_| VaultError::AuthenticationFailed)?;
    Ok(buffer)
}

/// Decrypt a sealed box
pub fn open(key: &VaultKey, sealed: &SealedBox) -> VaultResult<Zeroizing<Vec<u8>>> {
    open_in_place(
        key,
        &sealed.nonce,
        Zeroizing::new(sealed.ciphertext.clone()),
        &sealed.tag,
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// HMAC-SHA256
// ═══════════════════════════════════════════════════════════════════════════

fn hmac_over(key: &VaultKey, parts: &[&[u8]]) -> VaultResult<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.expose())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

/// HMAC-SHA256 over the concatenation of `parts`
pub fn compute_hmac(key: &VaultKey, parts: &[&[u8]]) -> VaultResult<[u8; HMAC_LEN]> {
    Ok(hmac_over(key, parts)?.finalize().into_bytes().into())
}

/// Constant-time HMAC check
pub fn verify_hmac(key: &VaultKey, parts: &[&[u8]], expected: &[u8]) -> VaultResult<bool> {
    Ok(hmac_over(key, parts)?.verify_slice(expected).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(byte: u8) -> VaultKey {
        VaultKey::new([byte; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let k = key(1);
        let plaintext = b"Media Vault - holiday photo bytes";

        let sealed = seal(&k, plaintext).unwrap();
        assert_eq!(sealed.ciphertext.len(), plaintext.len());
        assert_ne!(sealed.ciphertext.as_slice(), plaintext.as_slice());

        let opened = open(&k, &sealed).unwrap();
        assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn test_nonces_are_fresh() {
        let k = key(1);
        let a = seal(&k, b"same").unwrap();
        let b = seal(&k, b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&key(1), b"secret").unwrap();
        assert!(matches!(open(&key(2), &sealed), Err(VaultError::AuthenticationFailed)));
    }

    #[test]
    fn test_combined_layout() {
        let k = key(3);
        let sealed = seal(&k, b"metadata").unwrap();
        let combined = sealed.combined();
        assert_eq!(combined.len(), 8 + TAG_LEN);

        let back = SealedBox::from_combined(sealed.nonce, &combined).unwrap();
        assert_eq!(back, sealed);
        assert!(SealedBox::from_combined(sealed.nonce, &combined[..5]).is_err());
    }

    #[test]
    fn test_hmac() {
        let k = key(4);
        let mac = compute_hmac(&k, &[b"nonce", b"body"]).unwrap();
        assert!(verify_hmac(&k, &[b"nonce", b"body"], &mac).unwrap());
        assert!(verify_hmac(&k, &[b"noncebody"], &mac).unwrap());
        assert!(!verify_hmac(&k, &[b"nonce", b"bodY"], &mac).unwrap());
        assert!(!verify_hmac(&key(5), &[b"nonce", b"body"], &mac).unwrap());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048), k in any::<u8>()) {
            let key = key(k);
            let sealed = seal(&key, &plaintext).unwrap();
            let opened = open(&key, &sealed).unwrap();
            prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
        }

        #[test]
        fn prop_single_bit_flip_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..512),
            bit in any::<usize>(),
        ) {
            let key = key(7);
            let mut sealed = seal(&key, &plaintext).unwrap();
            let total_bits = (sealed.ciphertext.len() + TAG_LEN) * 8;
            let bit = bit % total_bits;
            let byte = bit / 8;
            if byte < sealed.ciphertext.len() {
                sealed.ciphertext[byte] ^= 1 << (bit % 8);
            } else {
                sealed.tag[byte - sealed.ciphertext.len()] ^= 1 << (bit % 8);
            }
            prop_assert!(matches!(open(&key, &sealed), Err(VaultError::AuthenticationFailed)));
        }
    }
}
