use fd_lock::RwLock;
use rand::Rng;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::document::CoordinationDocument;
use crate::error::MeshError;
use crate::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Durable home of the coordination document
///
/// Every access runs under an OS advisory lock (`flock` via `fd-lock`) on a
/// sibling `<state>.lock` file. The lock lives on its own file because the
/// document is replaced by rename on every write, which would detach a lock
/// held on the document's old inode. The kernel drops the lock when the
/// holding process exits, so a crashed agent cannot wedge the mesh.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    retry_interval: Duration,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            lock_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(25),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Run `f` against the current document under the shared lock
    pub async fn read<T, F>(&self, f: F) -> Result<T, MeshError>
    where
        F: FnOnce(&CoordinationDocument) -> Result<T, MeshError>,
    {
        self.with_lock(LockMode::Shared, || {
            let (doc, _) = self.load(false)?;
            f(&doc)
        })
        .await
    }

    /// Run `f` against the document under the exclusive lock
    ///
    /// The mutated document is persisted only when `f` succeeds and actually
    /// changed something; on error the file on disk is untouched.
    pub async fn write<T, F>(&self, f: F) -> Result<T, MeshError>
    where
        F: FnOnce(&mut CoordinationDocument) -> Result<T, MeshError>,
    {
        self.with_lock(LockMode::Exclusive, || {
            let (original, recovered) = self.load(true)?;
            let mut doc = original.clone();
            let result = f(&mut doc)?;
            if recovered || doc != original {
                self.persist(&doc)?;
            } else {
                debug!(path = %self.path.display(), "Document unchanged, skipping write");
            }
            Ok(result)
        })
        .await
    }

    /// Load the document; the flag is set when a corrupt file was replaced
    /// by an empty document and must be rewritten
    fn load(&self, quarantine_corrupt: bool) -> Result<(CoordinationDocument, bool), MeshError> {
        let Some(contents) = fs::read_optional(&self.path)? else {
            return Ok((CoordinationDocument::default(), false));
        };
        if contents.trim().is_empty() {
            return Ok((CoordinationDocument::default(), false));
        }
        match serde_json::from_str(&contents) {
            Ok(doc) => Ok((doc, false)),
            Err(err) => {
                if quarantine_corrupt {
                    match fs::quarantine(&self.path) {
                        Ok(copy) => warn!(
                            path = %self.path.display(),
                            copy = %copy.display(),
                            "Coordination document is corrupt ({err}); starting from an empty document"
                        ),
                        Err(copy_err) => warn!(
                            path = %self.path.display(),
                            "Coordination document is corrupt ({err}) and could not be copied aside: {copy_err}"
                        ),
                    }
                } else {
                    warn!(path = %self.path.display(), "Coordination document is corrupt ({err}); reading as empty");
                }
                Ok((CoordinationDocument::default(), quarantine_corrupt))
            }
        }
    }

    fn persist(&self, doc: &CoordinationDocument) -> Result<(), MeshError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        fs::write_atomic(&self.path, &bytes)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Persisted coordination document");
        Ok(())
    }

    async fn with_lock<T, F>(&self, mode: LockMode, f: F) -> Result<T, MeshError>
    where
        F: FnOnce() -> Result<T, MeshError>,
    {
        fs::ensure_parent_dir(&self.lock_path)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        let mut lock = RwLock::new(file);
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match mode {
                LockMode::Exclusive => match lock.try_write() {
                    Ok(guard) => {
                        let result = f();
                        drop(guard);
                        return result;
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(err.into()),
                },
                LockMode::Shared => match lock.try_read() {
                    Ok(guard) => {
                        let result = f();
                        drop(guard);
                        return result;
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(err.into()),
                },
            }

            let waited = started.elapsed();
            if waited >= self.lock_timeout {
                warn!(
                    lock = %self.lock_path.display(),
                    attempts,
                    "Gave up waiting for the coordination lock"
                );
                return Err(MeshError::LockTimeout {
                    path: self.lock_path.clone(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            if attempts == 1 {
                debug!(lock = %self.lock_path.display(), ?mode, "Coordination lock busy, waiting");
            }
            let pause = self.backoff().min(self.lock_timeout - waited);
            tokio::time::sleep(pause).await;
        }
    }

    /// Base retry interval plus up to 50% jitter so waiting processes spread out
    fn backoff(&self) -> Duration {
        let base = self.retry_interval.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}
