use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// A registry of per-user async mutexes.
///
/// Holding a [`UserGuard`] is the serialization scope of a trade: at most one
/// trade per user is between "read balance" and "commit" at any time. Entries
/// are created on demand and removed again once no task holds or awaits them.
#[derive(Debug, Clone, Default)]
pub struct UserLocks {
    slots: Arc<Mutex<HashMap<i64, Slot>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other task holds the scope of `user_id`, then claims it.
    pub async fn acquire(&self, user_id: i64) -> UserGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(user_id).or_default())
        };

        // Declared before the wait so a cancelled wait drops its slot reference first.
        let _pending = PendingWait {
            registry: self,
            user_id,
        };
        let guard = slot.lock_owned().await;
        UserGuard {
            user_id,
            guard: Some(guard),
            registry: self.clone(),
        }
    }

    /// Number of users with a live entry.
    pub fn tracked_users(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, user_id: i64) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The map's own reference is the only one left: nobody holds or awaits it.
        if slots
            .get(&user_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&user_id);
        }
    }
}

/// Prunes the entry of a wait that is abandoned before the lock is granted.
/// Once the lock is held the new guard keeps the entry alive and this is a no-op.
struct PendingWait<'a> {
    registry: &'a UserLocks,
    user_id: i64,
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        self.registry.release(self.user_id);
    }
}

/// Proof that the caller owns the serialization scope of one user.
#[derive(Debug)]
pub struct UserGuard {
    user_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
    registry: UserLocks,
}

impl UserGuard {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        // Unlock first so the slot's reference count no longer includes this guard.
        drop(self.guard.take());
        self.registry.release(self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = UserLocks::new();
        let first = locks.acquire(7).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(7).await.user_id() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        assert_eq!(contender.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let locks = UserLocks::new();
        let _alice = locks.acquire(1).await;
        let bob = tokio::time::timeout(Duration::from_millis(100), locks.acquire(2)).await;
        assert!(bob.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = UserLocks::new();
        {
            let _a = locks.acquire(1).await;
            let _b = locks.acquire(2).await;
            assert_eq!(locks.tracked_users(), 2);
        }
        assert_eq!(locks.tracked_users(), 0);
    }

    #[tokio::test]
    async fn abandoned_waits_are_pruned() {
        let locks = UserLocks::new();
        let first = locks.acquire(9).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(9).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // The holder leaves while the contender is still queued, then the
        // contender gives up before it is polled again.
        drop(first);
        assert_eq!(locks.tracked_users(), 1);
        contender.abort();
        assert!(contender.await.unwrap_err().is_cancelled());

        assert_eq!(locks.tracked_users(), 0);
    }

    #[tokio::test]
    async fn timed_out_waits_are_pruned() {
        let locks = UserLocks::new();
        let first = locks.acquire(4).await;
        let waited = tokio::time::timeout(Duration::from_millis(20), locks.acquire(4)).await;
        assert!(waited.is_err());
        assert_eq!(locks.tracked_users(), 1);

        drop(first);
        assert_eq!(locks.tracked_users(), 0);
    }
}
