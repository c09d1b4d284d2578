use crate::domain::account::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>>;

/// Per-account mutexes guarding the commit step.
///
/// A guard is held only across the ledger transition and the balance
/// adjustment that belong together, never across a processor call. An
/// account's entry is dropped when its last guard is released with nobody
/// waiting, so the map only holds accounts with commits in progress.
#[derive(Default, Clone)]
pub struct AccountLocks {
    locks: LockMap,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &UserId) -> AccountGuard {
        let lock = {
            let mut locks = lock_map(&self.locks);
            Arc::clone(locks.entry(user_id.clone()).or_default())
        };
        AccountGuard {
            user_id: user_id.clone(),
            locks: Arc::clone(&self.locks),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

fn lock_map(
    locks: &LockMap,
) -> MutexGuard<'_, HashMap<UserId, Arc<AsyncMutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive access to one account's commit step.
pub struct AccountGuard {
    user_id: UserId,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mut locks = lock_map(&self.locks);
        let idle = locks.get(&self.user_id).is_some_and(|lock| {
            // One reference in the map, one held by this guard.
            Arc::ptr_eq(lock, OwnedMutexGuard::mutex(&guard)) && Arc::strong_count(lock) == 2
        });
        if idle {
            locks.remove(&self.user_id);
        }
        drop(guard);
    }
}
