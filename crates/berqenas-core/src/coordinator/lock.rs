//! Per-database run locks.

use crate::migration::MigrationError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Table of held run locks, one per target database.
///
/// Each held lock carries the cancellation token of the batch holding it.
#[derive(Clone, Default)]
pub struct RunLocks {
    held: Arc<DashMap<String, CancellationToken>>,
}

impl RunLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `database` without waiting.
    pub fn try_acquire(&self, database: &str) -> Result<RunGuard, MigrationError> {
        match self.held.entry(database.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(database, "run lock busy");
                Err(MigrationError::EngineBusy {
                    database: database.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                tracing::debug!(database, "run lock acquired");
                Ok(RunGuard {
                    held: Arc::clone(&self.held),
                    database: database.to_string(),
                    token,
                })
            }
        }
    }

    /// Signal the batch holding `database`'s lock to stop.
    ///
    /// Returns `false` if no batch holds it.
    pub fn cancel(&self, database: &str) -> bool {
        match self.held.get(database) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether `database`'s lock is held.
    pub fn is_held(&self, database: &str) -> bool {
        self.held.contains_key(database)
    }
}

/// A held run lock, released on drop.
pub struct RunGuard {
    held: Arc<DashMap<String, CancellationToken>>,
    database: String,
    token: CancellationToken,
}

impl RunGuard {
    /// Database the lock covers.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.held.remove(&self.database);
        tracing::debug!(database = %self.database, "run lock released");
    }
}
