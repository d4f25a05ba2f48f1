//! Local render file lifecycle and per-fingerprint serialization.
//!
//! Every render file path is derived from its fingerprint, so two identical
//! requests in flight would read, write and delete the same file. A request
//! takes the fingerprint's lock before it touches the file and the lock
//! travels with whoever consumes the file last (response stream, upload or
//! raw webhook post). Deletion happens under that same lock.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use webshot_common::Fingerprint;

use crate::metrics;

type Slot = Arc<AsyncMutex<()>>;

/// One async mutex per in-flight fingerprint.
#[derive(Default)]
pub struct FingerprintLocks {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
}

impl FingerprintLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `fingerprint`'s local file.
    pub async fn acquire(self: &Arc<Self>, fingerprint: &Fingerprint) -> FingerprintGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(fingerprint.clone()).or_default().clone()
        };
        let guard = slot.lock_owned().await;

        FingerprintGuard {
            locks: Arc::clone(self),
            fingerprint: fingerprint.clone(),
            guard: Some(guard),
        }
    }

    /// Fingerprints currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on one fingerprint; released on drop.
pub struct FingerprintGuard {
    locks: Arc<FingerprintLocks>,
    fingerprint: Fingerprint,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FingerprintGuard {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl Drop for FingerprintGuard {
    fn drop(&mut self) {
        self.guard.take();

        // Clones of the slot are only made under the map lock, so a count of
        // one here means nobody is waiting and the entry can go.
        let mut slots = self.locks.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(&self.fingerprint) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.fingerprint);
            }
        }
    }
}

/// Deletes render files once their last consumer is done.
pub struct FileLifecycle {
    locks: Arc<FingerprintLocks>,
    /// Keep released files this long for reuse; `None` deletes immediately.
    retention: Option<Duration>,
}

impl FileLifecycle {
    pub fn new(locks: Arc<FingerprintLocks>, retention: Option<Duration>) -> Self {
        Self {
            locks,
            retention: retention.filter(|d| !d.is_zero()),
        }
    }

    pub fn locks(&self) -> &Arc<FingerprintLocks> {
        &self.locks
    }

    /// Whether released files are kept around for later requests.
    pub fn caching(&self) -> bool {
        self.retention.is_some()
    }

    /// The consumer of `path` is done with it.
    pub async fn release(&self, path: &Path, guard: FingerprintGuard) {
        match self.retention {
            None => {
                self.discard(path).await;
                drop(guard);
            }
            Some(ttl) => self.schedule_expiry(path.to_path_buf(), guard, ttl),
        }
    }

    /// Same as [`release`](Self::release), for contexts that cannot await (`Drop`).
    pub fn release_blocking(&self, path: &Path, guard: FingerprintGuard) {
        match self.retention {
            Some(ttl) if tokio::runtime::Handle::try_current().is_ok() => {
                self.schedule_expiry(path.to_path_buf(), guard, ttl)
            }
            _ => {
                self.discard_now(path);
                drop(guard);
            }
        }
    }

    /// Delete `path` now, regardless of retention.
    pub async fn discard(&self, path: &Path) {
        log_removal(path, tokio::fs::remove_file(path).await);
    }

    /// Blocking variant of [`discard`](Self::discard).
    pub fn discard_now(&self, path: &Path) {
        log_removal(path, std::fs::remove_file(path));
    }

    fn schedule_expiry(&self, path: PathBuf, guard: FingerprintGuard, ttl: Duration) {
        let fingerprint = guard.fingerprint().clone();
        drop(guard);

        let locks = Arc::clone(&self.locks);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _guard = locks.acquire(&fingerprint).await;
            log_removal(&path, tokio::fs::remove_file(&path).await);
        });
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "Removed render file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            metrics::record_local_io_error();
            warn!(path = %path.display(), error = %e, "Failed to remove render file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webshot_common::RenderRequest;

    fn fingerprint(url: &str) -> Fingerprint {
        Fingerprint::of(&RenderRequest::new(url).unwrap())
    }

    #[tokio::test]
    async fn test_lock_serializes_same_fingerprint() {
        let locks = Arc::new(FingerprintLocks::new());
        let fp = fingerprint("example.com");

        let first = locks.acquire(&fp).await;
        let waiter = {
            let locks = locks.clone();
            let fp = fp.clone();
            tokio::spawn(async move { locks.acquire(&fp).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap();
        assert_eq!(locks.len(), 1);
        drop(second);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_fingerprints_do_not_block() {
        let locks = Arc::new(FingerprintLocks::new());
        let _a = locks.acquire(&fingerprint("a.test")).await;
        let _b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&fingerprint("b.test")),
        )
        .await
        .expect("other fingerprint is free");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_release_deletes_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"png").unwrap();

        let locks = Arc::new(FingerprintLocks::new());
        let lifecycle = FileLifecycle::new(locks.clone(), None);
        let fp = fingerprint("example.com");

        lifecycle.release(&path, locks.acquire(&fp).await).await;
        assert!(!path.exists());
        assert!(locks.is_empty());

        // Already gone: not an error.
        lifecycle.release(&path, locks.acquire(&fp).await).await;
        lifecycle.discard_now(&path);
    }

    #[tokio::test]
    async fn test_retention_keeps_file_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"png").unwrap();

        let locks = Arc::new(FingerprintLocks::new());
        let lifecycle = FileLifecycle::new(locks.clone(), Some(Duration::from_millis(50)));
        assert!(lifecycle.caching());

        lifecycle
            .release(&path, locks.acquire(&fingerprint("example.com")).await)
            .await;
        assert!(path.exists());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!path.exists());
    }

    #[test]
    fn test_zero_retention_disables_caching() {
        let lifecycle = FileLifecycle::new(Arc::new(FingerprintLocks::new()), Some(Duration::ZERO));
        assert!(!lifecycle.caching());
    }
}
