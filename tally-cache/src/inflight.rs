//! Per-user in-flight guard.
//!
//! Concurrent misses for the same user queue on one async mutex so that
//! only the first reaches the generator; the rest re-check the memory tier
//! once it is their turn. Entries are dropped as soon as nobody holds or
//! waits on them.

use std::sync::Arc;

use dashmap::DashMap;
use tally_core::UserId;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

/// Exclusive turn for one user. Released on drop.
pub(crate) struct Permit<'a> {
    owner: &'a InFlight,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    waited: bool,
}

impl Permit<'_> {
    /// True when another caller held the turn first.
    pub fn waited(&self) -> bool {
        self.waited
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still references an idle lock.
        self.owner
            .locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl InFlight {
    pub async fn acquire(&self, user_id: &UserId) -> Permit<'_> {
        let lock = self.locks.entry(user_id.clone()).or_default().clone();

        let (guard, waited) = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => (guard, false),
            Err(_) => (lock.lock_owned().await, true),
        };

        Permit {
            owner: self,
            user_id: user_id.clone(),
            guard: Some(guard),
            waited,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_uncontended_permit_does_not_wait() {
        let inflight = InFlight::default();
        let permit = inflight.acquire(&UserId::from("u1")).await;
        assert!(!permit.waited());
        drop(permit);
        assert_eq!(inflight.len(), 0);
    }

    #[tokio::test]
    async fn test_second_caller_waits() {
        let inflight = Arc::new(InFlight::default());
        let user = UserId::from("u1");

        let first = inflight.acquire(&user).await;

        let other = Arc::clone(&inflight);
        let other_user = user.clone();
        let waiter = tokio::spawn(async move {
            let permit = other.acquire(&other_user).await;
            permit.waited()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert!(waiter.await.unwrap());
        assert_eq!(inflight.len(), 0);
    }

    #[tokio::test]
    async fn test_users_do_not_block_each_other() {
        let inflight = InFlight::default();
        let _a = inflight.acquire(&UserId::from("a")).await;
        let b = inflight.acquire(&UserId::from("b")).await;
        assert!(!b.waited());
    }
}
