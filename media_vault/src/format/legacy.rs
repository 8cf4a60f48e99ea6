//! Media Vault - Legacy Whole-File Format (read only)
//!
//! The file body is `CIPHERTEXT || TAG` of a single AES-256-GCM seal. The
//! nonce and an HMAC-SHA256 of the body live in extended attributes. Entries
//! in this format are migrated to the stream format when keys rotate.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use zeroize::Zeroizing;

use super::{not_found, EntryReader};
use crate::control::{Phase, StreamControl};
use crate::crypto::{open, verify_hmac, SealedBox, VaultSession, HMAC_LEN, NONCE_LEN};
use crate::error::{VaultError, VaultResult};

pub const NONCE_ATTR: &str = "user.mediavault.nonce";
pub const HMAC_ATTR: &str = "user.mediavault.hmac";

/// Named byte attributes attached to a file
pub trait AttributeStore: Send + Sync {
    fn get(&self, path: &Path, name: &str) -> VaultResult<Option<Vec<u8>>>;

    fn set(&self, path: &Path, name: &str, value: &[u8]) -> VaultResult<()>;

    /// Drop the legacy attributes of `path`, if any.
    fn clear(&self, path: &Path) -> VaultResult<()>;
}

/// Filesystem extended attributes
#[derive(Debug, Clone, Copy, Default)]
pub struct XattrStore;

#[cfg(unix)]
impl AttributeStore for XattrStore {
    fn get(&self, path: &Path, name: &str) -> VaultResult<Option<Vec<u8>>> {
        match xattr::get(path, name) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found(path)),
            Err(e) if xattr_unsupported(&e) => Ok(None),
            Err(e) => Err(VaultError::Io(e)),
        }
    }

    fn set(&self, path: &Path, name: &str, value: &[u8]) -> VaultResult<()> {
        xattr::set(path, name, value).map_err(VaultError::Io)
    }

    fn clear(&self, path: &Path) -> VaultResult<()> {
        for name in [NONCE_ATTR, HMAC_ATTR] {
            if let Ok(Some(_)) = xattr::get(path, name) {
                xattr::remove(path, name)?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn xattr_unsupported(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Unsupported
        || e.raw_os_error() == Some(95) // EOPNOTSUPP on Linux
}

#[cfg(not(unix))]
impl AttributeStore for XattrStore {
    fn get(&self, path: &Path, _name: &str) -> VaultResult<Option<Vec<u8>>> {
        if !path.exists() {
            return Err(not_found(path));
        }
        Ok(None)
    }

    fn set(&self, _path: &Path, _name: &str, _value: &[u8]) -> VaultResult<()> {
        Err(VaultError::UnsupportedFormat(
            "extended attributes are not available on this platform".into(),
        ))
    }

    fn clear(&self, _path: &Path) -> VaultResult<()> {
        Ok(())
    }
}

/// In-process attribute table for tests and hosts without xattrs
#[derive(Debug, Default)]
pub struct MemoryAttributeStore {
    attrs: Mutex<HashMap<(PathBuf, String), Vec<u8>>>,
}

impl MemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeStore for MemoryAttributeStore {
    fn get(&self, path: &Path, name: &str) -> VaultResult<Option<Vec<u8>>> {
        Ok(self
            .attrs
            .lock()
            .get(&(path.to_path_buf(), name.to_string()))
            .cloned())
    }

    fn set(&self, path: &Path, name: &str, value: &[u8]) -> VaultResult<()> {
        self.attrs
            .lock()
            .insert((path.to_path_buf(), name.to_string()), value.to_vec());
        Ok(())
    }

    fn clear(&self, path: &Path) -> VaultResult<()> {
        self.attrs.lock().retain(|(p, _), _| p != path);
        Ok(())
    }
}

fn fixed_attr<const N: usize>(
    attrs: &dyn AttributeStore,
    path: &Path,
    name: &str,
) -> VaultResult<[u8; N]> {
    let value = attrs
        .get(path, name)?
        .ok_or_else(|| VaultError::UnsupportedFormat(format!("missing attribute {name}")))?;
    value
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::UnsupportedFormat(format!("attribute {name} has wrong length")))
}

/// Verify the outer HMAC, then open the body.
pub fn decrypt_legacy(
    path: &Path,
    session: &VaultSession,
    attrs: &dyn AttributeStore,
) -> VaultResult<Zeroizing<Vec<u8>>> {
    let nonce: [u8; NONCE_LEN] = fixed_attr(attrs, path, NONCE_ATTR)?;
    let mac: [u8; HMAC_LEN] = fixed_attr(attrs, path, HMAC_ATTR)?;

    let body = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => not_found(path),
        _ => VaultError::Io(e),
    })?;

    if !verify_hmac(session.integrity_key(), &[&body], &mac)? {
        return Err(VaultError::AuthenticationFailed);
    }
    open(session.encryption_key(), &SealedBox::from_combined(nonce, &body)?)
}

/// [`EntryReader`] for legacy files
pub struct LegacyFormat<'a> {
    attrs: &'a dyn AttributeStore,
}

impl<'a> LegacyFormat<'a> {
    pub fn new(attrs: &'a dyn AttributeStore) -> Self {
        Self { attrs }
    }
}

impl EntryReader for LegacyFormat<'_> {
    fn decrypt_into(
        &self,
        path: &Path,
        session: &VaultSession,
        sink: &mut dyn Write,
        control: &StreamControl,
    ) -> VaultResult<u64> {
        control.checkpoint()?;
        let plaintext = decrypt_legacy(path, session, self.attrs)?;
        control.checkpoint()?;

        sink.write_all(&plaintext)?;
        sink.flush()?;
        let len = plaintext.len() as u64;
        control.report(Phase::Decrypt, len, Some(len));
        Ok(len)
    }

    fn read_metadata(
        &self,
        _path: &Path,
        _session: &VaultSession,
    ) -> VaultResult<Option<Zeroizing<Vec<u8>>>> {
        Ok(None)
    }
}

/// Write an entry the way the old app did. Only used to build fixtures.
#[cfg(test)]
pub(crate) fn write_legacy_fixture(
    path: &Path,
    session: &VaultSession,
    plaintext: &[u8],
    attrs: &dyn AttributeStore,
) -> VaultResult<()> {
    let sealed = crate::crypto::seal(session.encryption_key(), plaintext)?;
    let body = sealed.combined();
    let mac = crate::crypto::compute_hmac(session.integrity_key(), &[&body])?;
    fs::write(path, &body)?;
    attrs.set(path, NONCE_ATTR, &sealed.nonce)?;
    attrs.set(path, HMAC_ATTR, &mac)?;
    Ok(())
}
