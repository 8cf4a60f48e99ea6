//! End-to-end behaviour of the async vault service.

use std::io::Cursor;
use std::sync::Arc;

use media_keyvault::KdfParams;
use media_vault::{
    EntryKind, EntryMetadata, MediaType, MediaVault, MemoryAttributeStore, StreamControl,
    VaultConfig, VaultError,
};
use secrecy::SecretString;
use tempfile::tempdir;

fn pw(s: &str) -> SecretString {
    SecretString::from(s.to_owned())
}

fn config() -> VaultConfig {
    VaultConfig {
        chunk_size: 64 * 1024,
        workers: 4,
        kdf: KdfParams::insecure_fast(),
        ..Default::default()
    }
}

async fn populated(dir: &std::path::Path, count: usize) -> (MediaVault, Vec<std::path::PathBuf>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let vault = MediaVault::create(dir, pw("password1"), config())
        .await
        .unwrap()
        .with_attribute_store(Arc::new(MemoryAttributeStore::new()));

    let mut paths = Vec::new();
    for i in 0..count {
        let dest = vault.new_entry_path(EntryKind::Media);
        let data = vec![i as u8; 100_000 + i];
        let meta = EntryMetadata::new(format!("IMG_{i}.JPG"), MediaType::Photo, data.len() as u64);
        vault
            .encrypt_entry(Cursor::new(data), &dest, MediaType::Photo, Some(meta), StreamControl::new())
            .await
            .unwrap();
        paths.push(dest);
    }
    (vault, paths)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_share_the_session() {
    let dir = tempdir().unwrap();
    let (vault, paths) = populated(dir.path(), 6).await;
    let vault = Arc::new(vault);

    let mut tasks = Vec::new();
    for (i, path) in paths.iter().cloned().enumerate() {
        let vault = vault.clone();
        tasks.push(tokio::spawn(async move {
            let data = vault.decrypt_entry(&path, StreamControl::new()).await.unwrap();
            assert_eq!(data.len(), 100_000 + i);
            assert!(data.iter().all(|b| *b == i as u8));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lock_waits_for_in_flight_reads() {
    let dir = tempdir().unwrap();
    let (vault, paths) = populated(dir.path(), 1).await;
    let vault = Arc::new(vault);

    let reader = {
        let vault = vault.clone();
        let path = paths[0].clone();
        tokio::spawn(async move { vault.decrypt_entry(&path, StreamControl::new()).await })
    };
    tokio::task::yield_now().await;
    vault.lock().await;

    // the read either finished before the lock or was refused, never torn
    match reader.await.unwrap() {
        Ok(data) => assert_eq!(data.len(), 100_000),
        Err(e) => assert!(matches!(e, VaultError::VaultLocked)),
    }
    assert!(!vault.is_unlocked().await);
}

#[tokio::test]
async fn cancelled_password_change_rolls_back() {
    let dir = tempdir().unwrap();
    let (vault, paths) = populated(dir.path(), 3).await;

    let control = StreamControl::new();
    let trigger = control.clone();
    let control = control.on_progress(move |_| trigger.cancel());

    let result = vault.change_password(pw("password1"), pw("password2"), control).await;
    assert!(matches!(result, Err(VaultError::CancellationRequested)));
    assert!(!vault.rotation_pending());

    for (i, path) in paths.iter().enumerate() {
        let data = vault.decrypt_entry(path, StreamControl::new()).await.unwrap();
        assert_eq!(data.len(), 100_000 + i);
        let meta = vault.read_metadata(path).await.unwrap().unwrap();
        assert_eq!(meta.filename, format!("IMG_{i}.JPG"));
    }

    vault.lock().await;
    assert!(vault.unlock(pw("password2")).await.is_err());
    vault.unlock(pw("password1")).await.unwrap();
}

#[tokio::test]
async fn metadata_survives_password_change() {
    let dir = tempdir().unwrap();
    let (vault, paths) = populated(dir.path(), 2).await;
    let before = vault.read_metadata(&paths[1]).await.unwrap();

    vault
        .change_password(pw("password1"), pw("password2"), StreamControl::new())
        .await
        .unwrap();

    assert_eq!(vault.read_metadata(&paths[1]).await.unwrap(), before);

    let reopened = MediaVault::open(dir.path())
        .unwrap()
        .with_attribute_store(Arc::new(MemoryAttributeStore::new()));
    reopened.unlock(pw("password2")).await.unwrap();
    let data = reopened.decrypt_entry(&paths[0], StreamControl::new()).await.unwrap();
    assert_eq!(data.len(), 100_000);
}
