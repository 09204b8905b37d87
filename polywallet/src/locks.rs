//! Per-user mutual exclusion for check-then-write sequences.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async lock per user id.
///
/// Operations for different users never contend; two mutations for the same
/// user run one after the other. The guard may be held across `.await`.
/// An entry lives only while some task holds or waits for it.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Arc<Mutex<LockTable>>,
}

type LockTable = HashMap<String, Arc<AsyncMutex<()>>>;

impl UserLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`'s state.
    pub async fn lock(&self, user_id: &str) -> UserGuard {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(user_id.to_owned()).or_default())
        };
        UserGuard {
            guard: Some(lock.lock_owned().await),
            table: Arc::clone(&self.locks),
            user_id: user_id.to_owned(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Exclusive access to one user's state until dropped.
#[derive(Debug)]
pub struct UserGuard {
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<Mutex<LockTable>>,
    user_id: String,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock();
        // Only the table's own reference left: nobody holds or waits.
        if table
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.user_id);
        }
    }
}
