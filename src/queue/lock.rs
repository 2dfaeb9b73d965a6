//! # Queue Lock
//!
//! Cross-process mutual exclusion over the queue document, built on an
//! exclusive lock file. Creation with `create_new` is the atomic acquire; a
//! lock whose file age exceeds the TTL is presumed abandoned (a crashed
//! holder) and reclaimed; a live lock is retried with a fixed delay up to a
//! capped number of attempts before failing with a queue timeout.

use crate::error::{AppError, AppResult};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Configuration and acquisition logic for the queue lock file.
#[derive(Debug, Clone)]
pub struct QueueLock {
    path: PathBuf,
    ttl: Duration,
    retry_delay: Duration,
    max_retries: u32,
}

/// Holds the lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to release queue lock");
            }
        }
    }
}

impl QueueLock {
    pub fn new(path: PathBuf, ttl: Duration, retry_delay: Duration, max_retries: u32) -> Self {
        Self {
            path,
            ttl,
            retry_delay,
            max_retries,
        }
    }

    /// Age of the existing lock file, if it can be determined.
    fn lock_age(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.path).ok()?.modified().ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    /// Acquire the lock, reclaiming an expired one and backing off on a live
    /// one. Fails with a queue timeout once the retry budget is exhausted.
    pub async fn acquire(&self) -> AppResult<LockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
        }

        let mut attempts = 0u32;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    // Contents are informational, for operators inspecting a
                    // stuck lock; age is judged from file mtime.
                    let _ = writeln!(
                        file,
                        "pid={} acquired={}",
                        std::process::id(),
                        chrono::Utc::now().to_rfc3339()
                    );
                    return Ok(LockGuard {
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(age) = self.lock_age() {
                        if age > self.ttl {
                            warn!(
                                path = %self.path.display(),
                                age_secs = age.as_secs(),
                                "reclaiming abandoned queue lock"
                            );
                            match fs::remove_file(&self.path) {
                                Ok(()) => continue,
                                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                                Err(e) => {
                                    return Err(AppError::Queue(format!(
                                        "failed to reclaim abandoned lock: {}",
                                        e
                                    )))
                                }
                            }
                        }
                    }

                    attempts += 1;
                    if attempts >= self.max_retries {
                        return Err(AppError::Queue(format!(
                            "timed out acquiring queue lock after {} attempts",
                            attempts
                        )));
                    }
                    debug!(attempt = attempts, "queue lock held elsewhere, backing off");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    return Err(AppError::Persistence(format!(
                        "open lock {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
    }
}
