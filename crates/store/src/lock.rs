//! Advisory single-writer lock on a path.
//!
//! The lock is an exclusively-created file in the system temp directory,
//! named by the SHA-1 of the locked path. Whoever wins the create owns
//! the lock; everyone else waits for the file to disappear. Release is
//! RAII: the guard unlinks its file on drop on every exit path,
//! including cancellation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Result, StoreError};

/// Interval between lock-path probes while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Guard for an acquired advisory lock.
#[derive(Debug)]
pub struct PathLock {
    path: PathBuf,
}

impl PathLock {
    /// Location of the lock file for `target`.
    fn lock_path(target: &Path) -> PathBuf {
        let digest = Sha1::digest(target.as_os_str().as_encoded_bytes());
        std::env::temp_dir().join(format!("{}.lock", hex::encode(digest)))
    }

    /// Non-blocking attempt: `Ok(Some(guard))` on success, `Ok(None)`
    /// when somebody else holds the lock.
    pub async fn acquire(target: &Path) -> Result<Option<PathLock>> {
        let path = Self::lock_path(target);
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                trace!(lock = %path.display(), "lock held elsewhere");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(Utc::now().to_rfc3339().as_bytes()).await?;
        debug!(lock = %path.display(), "lock acquired");
        Ok(Some(PathLock { path }))
    }

    /// Acquire, waiting up to `timeout` for the current holder to
    /// release. Polls the lock path between attempts.
    ///
    /// # Errors
    ///
    /// [`StoreError::LockTimeout`] when the bound elapses and
    /// [`StoreError::Cancelled`] when `cancel` fires first.
    pub async fn wait(
        target: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PathLock> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(guard) = Self::acquire(target).await? {
                return Ok(guard);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout(Self::lock_path(target)));
            }
            let nap = POLL_INTERVAL.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        // already-gone is benign
        let _ = std::fs::remove_file(&self.path);
    }
}
