//! Cooperative single-writer lock: one live daemon per application identity.
//!
//! Advisory only. Acquisition steals stale rows (crashed holders); renewal
//! fails loudly when another process has taken the row, and the loop treats
//! that as fatal.

#![allow(missing_docs)]

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::core::errors::{CddError, Result};
use crate::dao::LockStore;
use crate::model::{AppKey, ProcessLock};

/// Owns this process's lock row, if held.
pub struct LockManager {
    staleness: Duration,
    lock: Option<ProcessLock>,
}

impl LockManager {
    #[must_use]
    pub const fn new(staleness: Duration) -> Self {
        Self {
            staleness,
            lock: None,
        }
    }

    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Acquire the lock for `app`, or fail with [`CddError::LockBusy`].
    ///
    /// A row with our own pid means this process is reconnecting; renew it
    /// in place. A fresh foreign row blocks. A stale foreign row belonged
    /// to a crashed holder and is replaced.
    pub fn acquire(
        &mut self,
        store: &dyn LockStore,
        app: AppKey,
        pid: u32,
        host: &str,
    ) -> Result<()> {
        match store.read_lock(app)? {
            Some(existing) if existing.pid == pid => {
                info!(%app, pid, "re-acquiring own lock row");
                self.lock = Some(existing);
                self.renew(store)
            }
            Some(existing) if !existing.is_stale(self.staleness, Utc::now()) => {
                Err(CddError::LockBusy {
                    app,
                    details: format!(
                        "held by pid {} on host '{}'",
                        existing.pid, existing.host
                    ),
                })
            }
            Some(stale) => {
                warn!(
                    %app,
                    stale_pid = stale.pid,
                    stale_host = stale.host,
                    "stealing stale lock"
                );
                store.delete_lock(app)?;
                self.insert_fresh(store, app, pid, host)
            }
            None => self.insert_fresh(store, app, pid, host),
        }
    }

    fn insert_fresh(
        &mut self,
        store: &dyn LockStore,
        app: AppKey,
        pid: u32,
        host: &str,
    ) -> Result<()> {
        let lock = ProcessLock::new(app, pid, host, Utc::now());
        store.insert_lock(&lock)?;
        info!(%app, pid, host, "lock acquired");
        self.lock = Some(lock);
        Ok(())
    }

    /// Refresh the heartbeat and push the current status text. Called once
    /// per loop iteration; a deleted or stolen row is [`CddError::LockBusy`].
    pub fn renew(&mut self, store: &dyn LockStore) -> Result<()> {
        let Some(lock) = self.lock.as_mut() else {
            return Err(CddError::Runtime {
                details: "renew called with no lock held".to_string(),
            });
        };
        let app = lock.app;
        match store.read_lock(app)? {
            None => {
                self.lock = None;
                Err(CddError::LockBusy {
                    app,
                    details: "lock row has been deleted".to_string(),
                })
            }
            Some(row) if !row.same_holder(lock.pid, &lock.host) => {
                let details = format!(
                    "stolen by pid {} on host '{}', my pid {} on host '{}'",
                    row.pid, row.host, lock.pid, lock.host
                );
                self.lock = None;
                Err(CddError::LockBusy { app, details })
            }
            Some(_) => {
                lock.heartbeat = Utc::now();
                store.update_lock(lock)
            }
        }
    }

    /// Update the free-text status shown to operational tooling. Persisted
    /// with the next renewal.
    pub fn set_status(&mut self, status: impl Into<String>) {
        if let Some(lock) = self.lock.as_mut() {
            lock.status = status.into();
        }
    }

    /// Delete our row on orderly shutdown.
    pub fn release(&mut self, store: &dyn LockStore) -> Result<()> {
        if let Some(lock) = self.lock.take() {
            store.delete_lock(lock.app)?;
            info!(app = %lock.app, "lock released");
        }
        Ok(())
    }
}
