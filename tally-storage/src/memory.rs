//! In-process memory tier.
//!
//! Fastest and least durable: a concurrent map keyed by user id that lives
//! as long as the process. Reads never fail. A stale entry is dropped as
//! soon as it is read, so the map holds at most one entry per user and
//! nothing older than the last period anyone asked about.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tally_core::{CachedResult, Origin, PeriodKey, PeriodicPayload, StorageError, TierKind, UserId};

use crate::tier::{ResultTier, TierRead};

/// Process-local result map.
#[derive(Debug)]
pub struct MemoryTier<T> {
    entries: DashMap<UserId, CachedResult<T>>,
}

impl<T: PeriodicPayload> MemoryTier<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of users with an entry, current or stale.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Raw entry for a user regardless of period.
    pub fn peek(&self, user_id: &UserId) -> Option<CachedResult<T>> {
        self.entries.get(user_id).map(|entry| entry.value().clone())
    }
}

impl<T: PeriodicPayload> Default for MemoryTier<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: PeriodicPayload> ResultTier<T> for MemoryTier<T> {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn read(
        &self,
        user_id: &UserId,
        current: &PeriodKey,
    ) -> Result<TierRead<T>, StorageError> {
        // Clone out before any removal; holding a map guard across remove deadlocks.
        let Some(entry) = self.peek(user_id) else {
            return Ok(TierRead::Miss);
        };

        if entry.is_valid_for(current) {
            return Ok(TierRead::Hit(entry.with_origin(Origin::Memory)));
        }

        // Only drop it if a concurrent writer has not already replaced it.
        let evicted = self
            .entries
            .remove_if(user_id, |_, stored| !stored.is_valid_for(current))
            .is_some();
        Ok(TierRead::Stale {
            stored: entry.period_key().clone(),
            evicted,
        })
    }

    async fn write(&self, user_id: &UserId, result: &CachedResult<T>) -> Result<(), StorageError> {
        let copy = result
            .clone()
            .with_origin(Origin::Memory)
            .with_cached_at(Utc::now());
        self.entries.insert(user_id.clone(), copy);
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> Result<bool, StorageError> {
        Ok(self.entries.remove(user_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn week(key: &str) -> PeriodKey {
        PeriodKey::from(key)
    }

    #[tokio::test]
    async fn test_miss_on_empty() {
        let tier: MemoryTier<serde_json::Value> = MemoryTier::new();
        let read = tier.read(&UserId::from("u1"), &week("2024-03-04")).await.unwrap();
        assert_eq!(read, TierRead::Miss);
    }

    #[tokio::test]
    async fn test_write_then_hit() {
        let tier = MemoryTier::new();
        let user = UserId::from("u1");
        let result = CachedResult::freshly_generated(json!({"score": 73}), week("2024-03-04"));
        tier.write(&user, &result).await.unwrap();

        match tier.read(&user, &week("2024-03-04")).await.unwrap() {
            TierRead::Hit(hit) => {
                assert_eq!(hit.payload(), &json!({"score": 73}));
                assert_eq!(hit.origin(), Origin::Memory);
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_entry_is_evicted_on_read() {
        let tier = MemoryTier::new();
        let user = UserId::from("u1");
        tier.write(&user, &CachedResult::freshly_generated(1, week("2024-03-04")))
            .await
            .unwrap();

        let read = tier.read(&user, &week("2024-03-11")).await.unwrap();
        assert_eq!(
            read,
            TierRead::Stale {
                stored: week("2024-03-04"),
                evicted: true
            }
        );
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_write_overwrites_unconditionally() {
        let tier = MemoryTier::new();
        let user = UserId::from("u1");
        tier.write(&user, &CachedResult::freshly_generated(1, week("2024-03-11")))
            .await
            .unwrap();
        // An older period still overwrites: the cache decides what to write.
        tier.write(&user, &CachedResult::freshly_generated(2, week("2024-03-04")))
            .await
            .unwrap();
        assert_eq!(tier.peek(&user).unwrap().payload(), &2);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let tier = MemoryTier::new();
        let user = UserId::from("u1");
        tier.write(&user, &CachedResult::freshly_generated(1, week("2024-03-04")))
            .await
            .unwrap();
        assert!(tier.remove(&user).await.unwrap());
        assert!(!tier.remove(&user).await.unwrap());
    }
}
