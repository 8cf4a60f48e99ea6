//! Media Vault - Vault Service
//!
//! Async front of the storage engine. Holds the unlocked session, runs all
//! crypto and file work on a bounded pool of blocking workers, and
//! serializes access per entry.
//!
//! ```text
//! <root>/
//!   credentials.json          salt, KDF params, verifier
//!   vault.json                VaultConfig
//!   media/<uuid>.enc          photo and video entries
//!   thumbs/<uuid>.enc         thumbnail entries
//!   rotation.journal.json     only while a password change is in flight
//! ```

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use media_keyvault::{CredentialStore, KeyVault, VaultCredentials};
use secrecy::SecretString;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, Semaphore};
use uuid::Uuid;
use walkdir::WalkDir;
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::control::StreamControl;
use crate::crypto::VaultSession;
use crate::entry;
use crate::erase::{erase_file, EraseReport};
use crate::error::{VaultError, VaultResult};
use crate::format::{AttributeStore, MediaType, StreamSummary, XattrStore};
use crate::journal::RotationJournal;
use crate::locks::EntryLocks;
use crate::metadata::EntryMetadata;
use crate::rotation::{RotateOptions, VaultRotation};
use crate::secure_fs::{leftover_kind, Leftover};

pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const CONFIG_FILE: &str = "vault.json";
pub const JOURNAL_FILE: &str = "rotation.journal.json";
pub const MEDIA_DIR: &str = "media";
pub const THUMBS_DIR: &str = "thumbs";
pub const ENTRY_EXTENSION: &str = "enc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Media,
    Thumbnail,
}

impl EntryKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            EntryKind::Media => MEDIA_DIR,
            EntryKind::Thumbnail => THUMBS_DIR,
        }
    }
}

/// What an entry operation runs with on its worker thread
pub struct EntryContext<'a> {
    pub path: &'a Path,
    pub session: &'a VaultSession,
    pub attrs: &'a dyn AttributeStore,
    pub config: &'a VaultConfig,
}

type SessionSlot = Option<VaultSession>;

/// Media Vault - Main entry point
pub struct MediaVault {
    root: PathBuf,
    config: VaultConfig,
    keyvault: Arc<KeyVault>,
    session: Arc<RwLock<SessionSlot>>,
    locks: Arc<EntryLocks>,
    workers: Arc<Semaphore>,
    attrs: Arc<dyn AttributeStore>,
}

impl MediaVault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a new vault at `root` and leave it unlocked.
    pub async fn create(
        root: impl AsRef<Path>,
        password: SecretString,
        config: VaultConfig,
    ) -> VaultResult<Self> {
        let root = root.as_ref().to_path_buf();
        let credentials_path = root.join(CREDENTIALS_FILE);
        if credentials_path.exists() {
            return Err(VaultError::VaultAlreadyExists(root.display().to_string()));
        }

        fs::create_dir_all(root.join(MEDIA_DIR))?;
        fs::create_dir_all(root.join(THUMBS_DIR))?;
        config.save(&root.join(CONFIG_FILE))?;

        let kdf = config.kdf.clone();
        let policy = config.unlock_policy.clone();
        let (keyvault, session) = blocking(move || {
            Ok(KeyVault::create(&credentials_path, &password, kdf, policy)?)
        })
        .await?;

        log::info!("Vault created at {}", root.display());
        Ok(Self::assemble(root, config, keyvault, Some(session)))
    }

    /// Open an existing vault. It starts locked.
    pub fn open(root: impl AsRef<Path>) -> VaultResult<Self> {
        let root = root.as_ref().to_path_buf();
        let credentials_path = root.join(CREDENTIALS_FILE);
        if !credentials_path.exists() {
            return Err(VaultError::VaultNotFound(root.display().to_string()));
        }

        let config = VaultConfig::load(&root.join(CONFIG_FILE))?;
        let keyvault = KeyVault::open(&credentials_path, config.unlock_policy.clone())?;
        if RotationJournal::exists(&root.join(JOURNAL_FILE)) {
            log::warn!("Vault at {} has an unfinished password change", root.display());
        }
        if let Err(e) = sweep_leftovers(&root, config.erase_ceiling) {
            log::warn!("Failed to clean up leftovers in {}: {}", root.display(), e);
        }
        Ok(Self::assemble(root, config, keyvault, None))
    }

    fn assemble(
        root: PathBuf,
        config: VaultConfig,
        keyvault: KeyVault,
        session: Option<VaultSession>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            root,
            config,
            keyvault: Arc::new(keyvault),
            session: Arc::new(RwLock::new(session)),
            locks: Arc::new(EntryLocks::new()),
            workers,
            attrs: Arc::new(XattrStore),
        }
    }

    /// Replace the extended-attribute backend used to read legacy entries.
    pub fn with_attribute_store(mut self, attrs: Arc<dyn AttributeStore>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub async fn is_unlocked(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// A password change was interrupted and must be resumed.
    pub fn rotation_pending(&self) -> bool {
        RotationJournal::exists(&self.journal_path())
    }

    fn journal_path(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // AUTHENTICATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Verify the password and cache the session.
    pub async fn unlock(&self, password: SecretString) -> VaultResult<()> {
        if self.rotation_pending() {
            return Err(VaultError::RotationPending);
        }
        let keyvault = self.keyvault.clone();
        let session = self.run(move || Ok(keyvault.unlock(&password)?)).await?;
        self.install(session).await;
        Ok(())
    }

    /// Unlock with the password saved in a platform credential store.
    pub async fn unlock_from_store(&self, store: Arc<dyn CredentialStore>) -> VaultResult<()> {
        if self.rotation_pending() {
            return Err(VaultError::RotationPending);
        }
        let keyvault = self.keyvault.clone();
        let session = self
            .run(move || Ok(keyvault.unlock_from_store(store.as_ref())?))
            .await?;
        self.install(session).await;
        Ok(())
    }

    /// Save the (verified) password for quick unlock.
    pub async fn remember_password(
        &self,
        store: Arc<dyn CredentialStore>,
        password: SecretString,
        require_user_presence: bool,
    ) -> VaultResult<()> {
        let keyvault = self.keyvault.clone();
        self.run(move || {
            Ok(keyvault.remember_password(store.as_ref(), &password, require_user_presence)?)
        })
        .await
    }

    pub fn forget_password(&self, store: &dyn CredentialStore) -> VaultResult<()> {
        Ok(self.keyvault.forget_password(store)?)
    }

    /// Wait for in-flight operations, then zero and drop the session.
    pub async fn lock(&self) {
        let mut slot = self.session.write().await;
        if let Some(session) = slot.take() {
            session.zero_and_drop();
            log::info!("Vault locked");
        }
    }

    async fn install(&self, session: VaultSession) {
        let mut slot = self.session.write().await;
        if let Some(previous) = slot.replace(session) {
            previous.zero_and_drop();
        }
        log::info!("Vault unlocked");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // WORKERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Run `f` on a blocking worker once a pool slot is free.
    async fn run<T, F>(&self, f: F) -> VaultResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> VaultResult<T> + Send + 'static,
    {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| VaultError::Io(io::Error::other("worker pool closed")))?;
        blocking(move || {
            let _permit = permit;
            f()
        })
        .await
    }

    /// Run `f` against the unlocked session while holding the entry lock.
    async fn with_entry<T, F>(&self, path: &Path, f: F) -> VaultResult<T>
    where
        T: Send + 'static,
        F: FnOnce(EntryContext<'_>) -> VaultResult<T> + Send + 'static,
    {
        let path = self.resolve(path)?;
        let session = self.session.clone().read_owned().await;
        if session.is_none() {
            return Err(VaultError::VaultLocked);
        }
        let entry_guard = self.locks.lock(&path).await;
        let attrs = self.attrs.clone();
        let config = self.config.clone();

        self.run(move || {
            let _entry = entry_guard;
            let session = (*session).as_ref().ok_or(VaultError::VaultLocked)?;
            f(EntryContext {
                path: &path,
                session,
                attrs: attrs.as_ref(),
                config: &config,
            })
        })
        .await
    }

    /// Entry path inside `media/` or `thumbs/`. Relative paths are taken
    /// from the root. Control files and hidden names are refused.
    fn resolve(&self, path: &Path) -> VaultResult<PathBuf> {
        let invalid = || VaultError::InvalidEntryPath(path.display().to_string());
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(invalid());
        }
        let resolved = if path.starts_with(&self.root) {
            path.to_path_buf()
        } else if path.is_relative() {
            self.root.join(path)
        } else {
            return Err(invalid());
        };

        let relative = resolved.strip_prefix(&self.root).map_err(|_| invalid())?;
        let mut parts = relative.components();
        let in_entry_dir = matches!(
            parts.next(),
            Some(Component::Normal(dir)) if dir == MEDIA_DIR || dir == THUMBS_DIR
        );
        let hidden = relative.components().any(|c| match c {
            Component::Normal(name) => name.to_string_lossy().starts_with('.'),
            _ => false,
        });
        if !in_entry_dir || parts.next().is_none() || hidden {
            return Err(invalid());
        }
        Ok(resolved)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ENTRY OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Fresh path for a new entry of `kind`.
    pub fn new_entry_path(&self, kind: EntryKind) -> PathBuf {
        self.root
            .join(kind.dir_name())
            .join(format!("{}.{}", Uuid::new_v4(), ENTRY_EXTENSION))
    }

    /// Encrypt everything `source` yields into a new entry at `dest`.
    pub async fn encrypt_entry<R>(
        &self,
        source: R,
        dest: &Path,
        media_type: MediaType,
        metadata: Option<EntryMetadata>,
        control: StreamControl,
    ) -> VaultResult<StreamSummary>
    where
        R: Read + Send + 'static,
    {
        self.with_entry(dest, move |ctx| {
            let mut source = source;
            entry::encrypt_entry(
                &mut source,
                ctx.path,
                ctx.session,
                media_type,
                metadata.as_ref(),
                ctx.config.chunk_size,
                &control,
            )
        })
        .await
    }

    /// Import a plaintext file as a new entry; returns the entry path.
    pub async fn import_file(
        &self,
        source: impl AsRef<Path>,
        kind: EntryKind,
        media_type: MediaType,
        metadata: Option<EntryMetadata>,
        control: StreamControl,
    ) -> VaultResult<PathBuf> {
        let source = source.as_ref();
        let file = File::open(source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VaultError::FileNotFound(source.display().to_string()),
            _ => VaultError::Io(e),
        })?;
        let dest = self.new_entry_path(kind);
        self.encrypt_entry(file, &dest, media_type, metadata, control).await?;
        Ok(dest)
    }

    /// Decrypt an entry into memory.
    pub async fn decrypt_entry(
        &self,
        path: &Path,
        control: StreamControl,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.with_entry(path, move |ctx| {
            entry::decrypt_entry_to_vec(ctx.path, ctx.session, ctx.attrs, &control)
        })
        .await
    }

    /// Decrypt an entry to a plaintext file (export).
    pub async fn decrypt_entry_to_file(
        &self,
        path: &Path,
        dest: impl AsRef<Path>,
        control: StreamControl,
    ) -> VaultResult<u64> {
        let dest = dest.as_ref().to_path_buf();
        self.with_entry(path, move |ctx| {
            entry::decrypt_entry_to_file(ctx.path, &dest, ctx.session, ctx.attrs, &control)
        })
        .await
    }

    pub async fn read_metadata(&self, path: &Path) -> VaultResult<Option<EntryMetadata>> {
        self.with_entry(path, |ctx| entry::read_metadata(ctx.path, ctx.session, ctx.attrs))
            .await
    }

    /// Securely erase an entry.
    pub async fn erase_entry(&self, path: &Path) -> VaultResult<EraseReport> {
        self.with_entry(path, |ctx| {
            let report = entry::erase_entry(ctx.path, ctx.config.erase_ceiling)?;
            if let Err(e) = ctx.attrs.clear(ctx.path) {
                log::warn!("Failed to clear attributes of {}: {}", ctx.path.display(), e);
            }
            Ok(report)
        })
        .await
    }

    /// Every entry file under `media/` and `thumbs/`, sorted.
    pub fn list_entries(&self) -> VaultResult<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for kind in [EntryKind::Media, EntryKind::Thumbnail] {
            let dir = self.root.join(kind.dir_name());
            if !dir.exists() {
                continue;
            }
            for item in WalkDir::new(&dir).follow_links(false) {
                let item = item.map_err(walk_error)?;
                let hidden = item.file_name().to_string_lossy().starts_with('.');
                if item.file_type().is_file() && !hidden {
                    entries.push(item.into_path());
                }
            }
        }
        entries.sort();
        Ok(entries)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PASSWORD CHANGE
    // ═══════════════════════════════════════════════════════════════════════

    fn rotate_options(&self) -> RotateOptions {
        RotateOptions {
            chunk_size: Some(self.config.chunk_size),
            erase_ceiling: self.config.erase_ceiling,
            verify: self.config.verify_after_rotation,
            legacy_media_type: self.config.legacy_media_type,
        }
    }

    /// Re-encrypt every entry under a new password.
    ///
    /// The new credentials are committed only after all entries rotated. If
    /// any entry fails, the rotated ones are put back under the old keys and
    /// the old password stays valid. Returns the number of rotated entries.
    pub async fn change_password(
        &self,
        old_password: SecretString,
        new_password: SecretString,
        control: StreamControl,
    ) -> VaultResult<usize> {
        if self.rotation_pending() {
            return Err(VaultError::RotationPending);
        }
        let slot = self.session.clone().write_owned().await;
        if slot.is_none() {
            return Err(VaultError::VaultLocked);
        }

        let entries = self.list_entries()?;
        let keyvault = self.keyvault.clone();
        let journal_path = self.journal_path();
        let kdf = self.config.kdf.clone();
        let job = self.rotation_job(control);

        log::info!("Changing password, {} entries to rotate", entries.len());
        let result = self
            .run(move || {
                let old = keyvault.unlock(&old_password)?;
                let pending = keyvault.prepare_rotation(&new_password, Some(kdf))?;
                let journal = RotationJournal::begin(&journal_path, pending.credentials.clone())?;
                job.execute(&keyvault, journal, &entries, old, pending.session, false)
            })
            .await;

        self.finish_rotation(slot, result)
    }

    /// Finish a password change interrupted by a crash or failed rollback.
    pub async fn resume_rotation(
        &self,
        old_password: SecretString,
        new_password: SecretString,
        control: StreamControl,
    ) -> VaultResult<usize> {
        let journal =
            RotationJournal::load(&self.journal_path())?.ok_or(VaultError::NoPendingRotation)?;
        let slot = self.session.clone().write_owned().await;

        let entries = self.list_entries()?;
        let keyvault = self.keyvault.clone();
        let credentials_committed = same_credentials(&keyvault.credentials(), &journal.new_credentials);
        let root = self.root.clone();
        let erase_ceiling = self.config.erase_ceiling;
        let job = self.rotation_job(control);

        log::info!(
            "Resuming password change, {} of {} entries already rotated",
            journal.committed.len(),
            entries.len()
        );
        let result = self
            .run(move || {
                sweep_leftovers(&root, erase_ceiling)?;
                if credentials_committed {
                    // every entry was rotated before the credentials were saved
                    log::info!("New credentials already committed, closing the journal");
                    let new = keyvault.unlock(&new_password)?;
                    let rotated = journal.committed.len();
                    journal.finish()?;
                    return Ok((rotated, new));
                }
                let new = journal.new_credentials.open_session(&new_password)?;
                let old = keyvault.unlock(&old_password)?;
                job.execute(&keyvault, journal, &entries, old, new, true)
            })
            .await;

        self.finish_rotation(slot, result)
    }

    fn rotation_job(&self, control: StreamControl) -> RotationJob {
        RotationJob {
            root: self.root.clone(),
            attrs: self.attrs.clone(),
            locks: self.locks.clone(),
            options: self.rotate_options(),
            control,
        }
    }

    fn finish_rotation(
        &self,
        mut slot: OwnedRwLockWriteGuard<SessionSlot>,
        result: VaultResult<(usize, VaultSession)>,
    ) -> VaultResult<usize> {
        match result {
            Ok((rotated, session)) => {
                if let Some(previous) = slot.replace(session) {
                    previous.zero_and_drop();
                }
                log::info!("Password changed, {} entries rotated", rotated);
                Ok(rotated)
            }
            Err(e) => {
                if self.rotation_pending() {
                    // entries may be under either key set until resumed
                    if let Some(previous) = slot.take() {
                        previous.zero_and_drop();
                    }
                    log::error!("Password change interrupted, resume required: {}", e);
                }
                Err(e)
            }
        }
    }
}

/// Owned state a rotation needs on its worker thread
struct RotationJob {
    root: PathBuf,
    attrs: Arc<dyn AttributeStore>,
    locks: Arc<EntryLocks>,
    options: RotateOptions,
    control: StreamControl,
}

impl RotationJob {
    fn execute(
        &self,
        keyvault: &KeyVault,
        mut journal: RotationJournal,
        entries: &[PathBuf],
        old: VaultSession,
        new: VaultSession,
        resuming: bool,
    ) -> VaultResult<(usize, VaultSession)> {
        let rotation = VaultRotation {
            root: &self.root,
            old: &old,
            new: &new,
            attrs: self.attrs.as_ref(),
            locks: self.locks.as_ref(),
            options: &self.options,
            control: &self.control,
        };

        let outcome = rotation.run(&mut journal, entries, resuming);
        let outcome = outcome.and_then(|rotated| {
            keyvault.commit_rotation(&journal.new_credentials)?;
            Ok(rotated)
        });

        match outcome {
            Ok(rotated) => {
                journal.finish()?;
                old.zero_and_drop();
                Ok((rotated, new))
            }
            Err(e) => {
                let rolled_back = matches!(
                    e,
                    VaultError::RotationFailed { rolled_back: true, .. } | VaultError::CancellationRequested
                );
                if rolled_back {
                    journal.finish()?;
                }
                old.zero_and_drop();
                new.zero_and_drop();
                Err(e)
            }
        }
    }
}

/// The persisted credentials are the ones a journal was started for.
fn same_credentials(stored: &VaultCredentials, journaled: &VaultCredentials) -> bool {
    stored.salt == journaled.salt && stored.verifier == journaled.verifier
}

fn walk_error(e: walkdir::Error) -> VaultError {
    VaultError::Io(e.into_io_error().unwrap_or_else(|| io::Error::other("walk failed")))
}

/// Erase temporary plaintext and remove staging files that an interrupted
/// operation left in the vault. Returns the number of files cleaned up.
fn sweep_leftovers(root: &Path, erase_ceiling: u64) -> VaultResult<usize> {
    let scans = [
        (root.to_path_buf(), 1),
        (root.join(MEDIA_DIR), usize::MAX),
        (root.join(THUMBS_DIR), usize::MAX),
    ];

    let mut swept = 0;
    for (dir, depth) in scans {
        if !dir.exists() {
            continue;
        }
        for item in WalkDir::new(&dir).max_depth(depth).follow_links(false) {
            let item = item.map_err(walk_error)?;
            if !item.file_type().is_file() {
                continue;
            }
            let Some(leftover) = leftover_kind(&item.file_name().to_string_lossy()) else {
                continue;
            };
            match leftover {
                Leftover::Plaintext => {
                    erase_file(item.path(), erase_ceiling)?;
                }
                Leftover::Staging => fs::remove_file(item.path())?,
            }
            log::warn!("Removed {} left by an interrupted operation", item.path().display());
            swept += 1;
        }
    }
    Ok(swept)
}

/// `spawn_blocking` with the join error folded into `VaultError`
async fn blocking<T, F>(f: F) -> VaultResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> VaultResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Io(io::Error::other(e.to_string())))?
}
