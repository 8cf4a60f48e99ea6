//! Media Vault - Secure Filesystem Operations
//!
//! Exclusive creation, atomic replacement and the drop guards that keep
//! partial ciphertext and temporary plaintext off the disk.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::erase::erase_file;
use crate::error::{VaultError, VaultResult};

/// Open an existing file for reading.
pub fn open_existing(path: &Path) -> VaultResult<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => VaultError::FileNotFound(path.display().to_string()),
        _ => VaultError::Io(e),
    })
}

/// Create `path`, failing if anything already exists there.
pub fn create_new(path: &Path) -> VaultResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => VaultError::FileAlreadyExists(path.display().to_string()),
            _ => VaultError::Io(e),
        })
}

/// Name prefix of [`TempPlaintext`] files
pub const PLAINTEXT_PREFIX: &str = ".plain-";

/// What a crashed operation can leave next to the entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leftover {
    /// Decrypted content: temp plaintext or a `partial` export
    Plaintext,
    /// Ciphertext staging: `rotating` or `tmp` siblings
    Staging,
}

/// Classify a file name produced by [`TempPlaintext`] or [`sibling_temp_path`].
pub fn leftover_kind(file_name: &str) -> Option<Leftover> {
    if file_name.starts_with(PLAINTEXT_PREFIX) {
        return Some(Leftover::Plaintext);
    }
    if !file_name.starts_with('.') {
        return None;
    }
    let (_, suffix) = file_name.rsplit_once('.')?;
    let (tag, id) = suffix.split_once('-')?;
    if id.len() != 32 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    match tag {
        "partial" => Some(Leftover::Plaintext),
        "rotating" | "tmp" => Some(Leftover::Staging),
        _ => None,
    }
}

/// Hidden sibling of `path` in the same directory, e.g. `.a.enc.rotating-<uuid>`
pub fn sibling_temp_path(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{tag}-{}", Uuid::new_v4().simple()))
}

/// Rename `from` over `to` and make the rename durable.
pub fn replace_atomically(from: &Path, to: &Path) -> VaultResult<()> {
    fs::rename(from, to)?;
    sync_parent_dir(to)
}

/// fsync the directory containing `path` so a rename survives power loss.
pub fn sync_parent_dir(path: &Path) -> VaultResult<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Write a small file atomically (temp + fsync + rename).
pub fn write_atomic(path: &Path, data: &[u8]) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = sibling_temp_path(path, "tmp");
    let written = (|| -> VaultResult<()> {
        let mut file = create_new(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    if let Err(e) = replace_atomically(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

/// Removes a file on drop unless [`PartialFile::commit`] was called.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("Failed to remove partial file {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// Owner-only temp file for decrypted content. Securely erased on drop,
/// whatever happened in between.
#[derive(Debug)]
pub struct TempPlaintext {
    file: Option<NamedTempFile>,
    erase_ceiling: u64,
}

impl TempPlaintext {
    /// Create in `dir` so the erase passes hit the same device as the entry.
    pub fn new_in(dir: &Path, erase_ceiling: u64) -> VaultResult<Self> {
        let file = tempfile::Builder::new().prefix(PLAINTEXT_PREFIX).tempfile_in(dir)?;
        Ok(Self {
            file: Some(file),
            erase_ceiling,
        })
    }

    pub fn path(&self) -> &Path {
        match &self.file {
            Some(file) => file.path(),
            None => Path::new(""),
        }
    }

    pub fn file_mut(&mut self) -> VaultResult<&mut File> {
        self.file
            .as_mut()
            .map(|f| f.as_file_mut())
            .ok_or_else(|| VaultError::Io(io::Error::other("temp file already released")))
    }
}

impl Drop for TempPlaintext {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            let temp_path = file.into_temp_path();
            if let Err(e) = erase_file(&path, self.erase_ceiling) {
                log::warn!("Failed to erase temporary plaintext {}: {}", path.display(), e);
            }
            drop(temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Read};
    use tempfile::tempdir;

    #[test]
    fn test_create_new_refuses_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.enc");
        create_new(&path).unwrap();
        assert!(matches!(create_new(&path), Err(VaultError::FileAlreadyExists(_))));
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_partial_file_guard() {
        let dir = tempdir().unwrap();
        let dropped = dir.path().join("dropped");
        let kept = dir.path().join("kept");
        fs::write(&dropped, b"x").unwrap();
        fs::write(&kept, b"x").unwrap();

        drop(PartialFile::new(&dropped));
        PartialFile::new(&kept).commit();

        assert!(!dropped.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_temp_plaintext_is_erased() {
        let dir = tempdir().unwrap();
        let path = {
            let mut temp = TempPlaintext::new_in(dir.path(), 1024).unwrap();
            let file = temp.file_mut().unwrap();
            file.write_all(b"decrypted holiday video").unwrap();
            file.seek(SeekFrom::Start(0)).unwrap();
            let mut back = String::new();
            file.read_to_string(&mut back).unwrap();
            assert_eq!(back, "decrypted holiday video");
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_sibling_temp_path_is_hidden_sibling() {
        let temp = sibling_temp_path(Path::new("/v/media/a.enc"), "rotating");
        assert_eq!(temp.parent(), Some(Path::new("/v/media")));
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".a.enc.rotating-"));
    }

    #[test]
    fn test_leftover_kind() {
        let rotating = sibling_temp_path(Path::new("/v/media/a.enc"), "rotating");
        let partial = sibling_temp_path(Path::new("/v/media/a.jpg"), "partial");
        let tmp = sibling_temp_path(Path::new("/v/vault.json"), "tmp");
        let name = |p: &Path| p.file_name().unwrap().to_string_lossy().into_owned();

        assert_eq!(leftover_kind(&name(&rotating)), Some(Leftover::Staging));
        assert_eq!(leftover_kind(&name(&tmp)), Some(Leftover::Staging));
        assert_eq!(leftover_kind(&name(&partial)), Some(Leftover::Plaintext));
        assert_eq!(leftover_kind(".plain-x1y2z3"), Some(Leftover::Plaintext));

        assert_eq!(leftover_kind("a.enc"), None);
        assert_eq!(leftover_kind(".nomedia"), None);
        assert_eq!(leftover_kind(".a.enc.rotating-notanid"), None);
    }
}
