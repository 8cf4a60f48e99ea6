//! Media Vault - Secure Erase
//!
//! Three full overwrite passes (random, the bitwise complement of that
//! random, fresh random), each flushed with `sync_all`, then unlink. Files
//! above the ceiling are unlinked directly.
//!
//! On flash storage and copy-on-write or journaling filesystems the old
//! blocks may survive; this is a best-effort mitigation.

use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// 100 MiB
pub const DEFAULT_ERASE_CEILING: u64 = 100 * 1024 * 1024;

const BLOCK: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErasePass {
    Random,
    Complement,
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseReport {
    pub bytes: u64,
    /// Completed overwrite passes (0 when the file was unlinked directly)
    pub passes: u8,
}

/// Overwrite and remove the file at `path`.
pub fn erase_file(path: &Path, ceiling: u64) -> VaultResult<EraseReport> {
    erase_file_observed(path, ceiling, |_, _| {})
}

/// Like [`erase_file`], calling `observe` after each pass has been synced.
pub fn erase_file_observed<F>(path: &Path, ceiling: u64, mut observe: F) -> VaultResult<EraseReport>
where
    F: FnMut(ErasePass, &Path),
{
    let meta = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => VaultError::FileNotFound(path.display().to_string()),
        _ => VaultError::Io(e),
    })?;
    if !meta.is_file() {
        return Err(VaultError::InvalidEntryPath(path.display().to_string()));
    }

    let bytes = meta.len();
    let mut passes = 0u8;

    if bytes > 0 && bytes <= ceiling {
        let mut file = OpenOptions::new().write(true).open(path)?;

        let mut seed = <StdRng as SeedableRng>::Seed::default();
        rand::thread_rng().fill_bytes(&mut seed);

        overwrite(&mut file, bytes, StdRng::from_seed(seed), false)?;
        passes += 1;
        observe(ErasePass::Random, path);

        overwrite(&mut file, bytes, StdRng::from_seed(seed), true)?;
        passes += 1;
        observe(ErasePass::Complement, path);

        overwrite(&mut file, bytes, StdRng::from_entropy(), false)?;
        passes += 1;
        observe(ErasePass::Fresh, path);
    } else if bytes > ceiling {
        log::debug!(
            "Skipping overwrite of {} ({} bytes above ceiling)",
            path.display(),
            bytes
        );
    }

    fs::remove_file(path)?;
    log::debug!("Erased {} ({} bytes, {} passes)", path.display(), bytes, passes);

    Ok(EraseReport { bytes, passes })
}

fn overwrite(file: &mut fs::File, len: u64, mut rng: StdRng, complement: bool) -> VaultResult<()> {
    let mut block = Zeroizing::new(vec![0u8; BLOCK]);
    file.seek(SeekFrom::Start(0))?;

    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(BLOCK as u64) as usize;
        rng.fill_bytes(&mut block[..n]);
        if complement {
            block[..n].iter_mut().for_each(|b| *b = !*b);
        }
        file.write_all(&block[..n])?;
        remaining -= n as u64;
    }

    file.sync_all()?;
    Ok(())
}
