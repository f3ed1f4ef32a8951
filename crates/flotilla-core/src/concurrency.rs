use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Exclusive hold on a named resource. Released on drop.
pub struct ResourceGuard {
    lock_file: File,
    resource: String,
}

impl ResourceGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
        debug!("released resource lock '{}'", self.resource);
    }
}

/// Advisory file locks on named resources, shared between processes.
#[derive(Debug, Clone)]
pub struct ResourceLocks {
    dir: PathBuf,
    retry_delay: Duration,
}

impl ResourceLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retry_delay: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, resource: &str) -> PathBuf {
        let file: String = resource
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.lock"))
    }

    /// Take the lock or fail with [`CoreError::ResourceLocked`].
    pub fn try_lock(&self, resource: &str) -> Result<ResourceGuard, CoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(resource))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(ResourceGuard {
                lock_file: file,
                resource: resource.to_owned(),
            }),
            Err(_) => Err(CoreError::ResourceLocked {
                resource: resource.to_owned(),
            }),
        }
    }

    /// Run `f` while holding `resource`, retrying contention every
    /// `retry_delay` until the lock is free.
    pub fn with_lock<R>(
        &self,
        resource: &str,
        f: impl FnOnce() -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        let _guard = loop {
            match self.try_lock(resource) {
                Ok(guard) => break guard,
                Err(CoreError::ResourceLocked { .. }) => {
                    if shutdown_requested() {
                        return Err(CoreError::Interrupted);
                    }
                    debug!("resource '{resource}' is locked, retrying in {:?}", self.retry_delay);
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        };
        f()
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current operation...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
