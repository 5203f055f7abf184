//! Locked JSON document access.
//!
//! Writers hold an exclusive `flock` on a sidecar `{document}.lock` file and
//! replace the document by write-to-temp, fsync, rename and directory fsync.
//! A crash therefore leaves either the old or the new version on disk, and
//! readers never need a lock.
//!
//! Locks are taken with `try_lock` and an async backoff, and all file IO runs on
//! the blocking pool, so a caller waiting on another process can still be
//! cancelled. Within one process a keyed async mutex queues writers first.
//! Note: File locks may not work correctly on all network filesystems.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{StorageError, StorageResult};

const LOCK_RETRY_MIN: Duration = Duration::from_millis(1);
const LOCK_RETRY_MAX: Duration = Duration::from_millis(50);

/// In-process async mutex per document key.
#[derive(Default)]
pub struct KeyedMutex {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedMutex {
    /// Lock `key`, waiting for any other holder in this process.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }
}

/// Exclusive cross-process lock on one document, released on drop.
struct DocumentLock {
    file: File,
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "Failed to release document lock");
        }
    }
}

/// Path of the sidecar lock file of `path`.
pub fn lock_path(path: &Path) -> PathBuf {
    sibling(path, "lock")
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

/// Run blocking file work off the async runtime.
pub async fn blocking<R, F>(f: F) -> StorageResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> StorageResult<R> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::FileIO(format!("file task failed: {e}")))?
}

async fn lock_exclusive(path: &Path) -> StorageResult<DocumentLock> {
    let lock_path = lock_path(path);
    let file = blocking(move || {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?)
    })
    .await?;

    let contended = fs2::lock_contended_error().raw_os_error();
    let mut delay = LOCK_RETRY_MIN;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(DocumentLock { file }),
            Err(e) if e.raw_os_error() == contended => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(LOCK_RETRY_MAX);
            }
            Err(e) => return Err(StorageError::LockFailed(e.to_string())),
        }
    }
}

/// Read a document. Missing files read as `None`.
///
/// # Errors
///
/// Returns `Corrupted` for a present document that is empty or not valid JSON.
pub async fn read<T>(path: PathBuf) -> StorageResult<Option<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    blocking(move || load(&path)).await
}

/// Replace a document.
pub async fn write<T: Serialize + Sync>(path: PathBuf, value: &T) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let lock = lock_exclusive(&path).await?;
    blocking(move || {
        let _lock = lock;
        store(&path, &json)
    })
    .await
}

/// Read-modify-write a document under its exclusive lock.
///
/// `f` receives the current document (`None` if absent) and returns its result
/// plus whether the document changed. A changed document is durable before
/// the lock is released; setting it to `None` deletes it.
pub async fn update<T, R, F>(path: PathBuf, f: F) -> StorageResult<R>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut Option<T>) -> StorageResult<(R, bool)> + Send + 'static,
{
    let lock = lock_exclusive(&path).await?;
    blocking(move || {
        let _lock = lock;
        let mut doc = load(&path)?;
        let (result, changed) = f(&mut doc)?;
        if changed {
            match &doc {
                Some(value) => store(&path, &serde_json::to_vec_pretty(value)?)?,
                None => {
                    delete(&path)?;
                }
            }
        }
        Ok(result)
    })
    .await
}

/// Blocking read used by the async wrappers and by `update` closures.
pub fn load<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if content.iter().all(u8::is_ascii_whitespace) {
        return Err(StorageError::Corrupted(format!(
            "{} is empty",
            path.display()
        )));
    }
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| StorageError::Corrupted(format!("{}: {e}", path.display())))
}

fn store(path: &Path, json: &[u8]) -> StorageResult<()> {
    let temp = sibling(path, "tmp");
    let mut file = File::create(&temp)?;
    file.write_all(json)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp, path)?;
    sync_dir(path)
}

fn delete(path: &Path) -> StorageResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            sync_dir(path)?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

// Directory handles cannot be opened for sync here; the rename is still atomic.
#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(_path: &Path) -> StorageResult<()> {
    Ok(())
}

/// Sanitize a key for use as a filename.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
