//! Remote store tier.
//!
//! The remote store is a table shared by every device the user signs in
//! from, keyed by user id and holding the last result written for them.
//! Clients may read and upsert rows but not delete them, so stale rows are
//! skipped rather than removed.
//!
//! [`RemoteRecordStore`] is the row-level seam: it knows nothing about
//! payload types or periods. [`RemoteStoreTier`] adapts any store into a
//! typed [`ResultTier`].

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{
    CachedResult, Origin, PeriodKey, PeriodicPayload, StorageError, TierKind, UserId,
};

use crate::tier::{ResultTier, TierRead};

/// One row of the remote results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub user_id: String,
    pub period_key: String,
    pub payload: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}

impl RemoteRecord {
    /// Encode a typed result as a row for `user_id`.
    pub fn encode<T: PeriodicPayload>(
        user_id: &UserId,
        result: &CachedResult<T>,
        cached_at: DateTime<Utc>,
    ) -> Result<Self, StorageError> {
        let payload = serde_json::to_value(result.payload()).map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            user_id: user_id.as_str().to_string(),
            period_key: result.period_key().as_str().to_string(),
            payload,
            cached_at,
        })
    }

    /// Decode the row's payload into `T`, tagged as a remote-store result.
    pub fn decode<T: PeriodicPayload>(self) -> Result<CachedResult<T>, StorageError> {
        let payload: T =
            serde_json::from_value(self.payload).map_err(|e| StorageError::Deserialization {
                reason: e.to_string(),
            })?;
        Ok(CachedResult::new(
            payload,
            PeriodKey::new(self.period_key),
            self.cached_at,
            Origin::RemoteStore,
        ))
    }
}

/// Row access to the shared results table.
#[async_trait]
pub trait RemoteRecordStore: Send + Sync {
    /// Fetch the user's row, if any.
    async fn fetch_record(&self, user_id: &UserId) -> Result<Option<RemoteRecord>, StorageError>;

    /// Insert or replace the user's row.
    async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), StorageError>;
}

#[async_trait]
impl<S: RemoteRecordStore + ?Sized> RemoteRecordStore for Arc<S> {
    async fn fetch_record(&self, user_id: &UserId) -> Result<Option<RemoteRecord>, StorageError> {
        (**self).fetch_record(user_id).await
    }

    async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), StorageError> {
        (**self).upsert_record(record).await
    }
}

/// Typed tier over a [`RemoteRecordStore`].
pub struct RemoteStoreTier<S> {
    store: S,
}

impl<S: RemoteRecordStore> RemoteStoreTier<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for RemoteStoreTier<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStoreTier")
            .field("store", &self.store)
            .finish()
    }
}

#[async_trait]
impl<T, S> ResultTier<T> for RemoteStoreTier<S>
where
    T: PeriodicPayload,
    S: RemoteRecordStore,
{
    fn kind(&self) -> TierKind {
        TierKind::RemoteStore
    }

    async fn read(
        &self,
        user_id: &UserId,
        current: &PeriodKey,
    ) -> Result<TierRead<T>, StorageError> {
        let Some(record) = self.store.fetch_record(user_id).await? else {
            return Ok(TierRead::Miss);
        };

        if record.period_key != current.as_str() {
            return Ok(TierRead::Stale {
                stored: PeriodKey::new(record.period_key),
                evicted: false,
            });
        }

        record.decode().map(TierRead::Hit)
    }

    async fn write(&self, user_id: &UserId, result: &CachedResult<T>) -> Result<(), StorageError> {
        let record = RemoteRecord::encode(user_id, result, Utc::now())?;
        self.store.upsert_record(&record).await
    }

    /// Rows are never deleted by clients.
    async fn remove(&self, _user_id: &UserId) -> Result<bool, StorageError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapStore {
        rows: Mutex<HashMap<String, RemoteRecord>>,
    }

    #[async_trait]
    impl RemoteRecordStore for MapStore {
        async fn fetch_record(
            &self,
            user_id: &UserId,
        ) -> Result<Option<RemoteRecord>, StorageError> {
            let rows = self.rows.lock().map_err(|_| StorageError::LockPoisoned)?;
            Ok(rows.get(user_id.as_str()).cloned())
        }

        async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), StorageError> {
            let mut rows = self.rows.lock().map_err(|_| StorageError::LockPoisoned)?;
            rows.insert(record.user_id.clone(), record.clone());
            Ok(())
        }
    }

    fn week(key: &str) -> PeriodKey {
        PeriodKey::from(key)
    }

    #[tokio::test]
    async fn test_write_then_hit() {
        let tier = RemoteStoreTier::new(MapStore::default());
        let user = UserId::from("u1");
        let result = CachedResult::freshly_generated(json!({"score": 73}), week("2024-03-04"));
        tier.write(&user, &result).await.unwrap();

        let read: TierRead<serde_json::Value> =
            tier.read(&user, &week("2024-03-04")).await.unwrap();
        let hit = read.into_option().expect("row should be current");
        assert_eq!(hit.payload()["score"], 73);
        assert_eq!(hit.origin(), Origin::RemoteStore);
    }

    #[tokio::test]
    async fn test_stale_row_is_miss_and_kept() {
        let tier = RemoteStoreTier::new(MapStore::default());
        let user = UserId::from("u1");
        tier.write(&user, &CachedResult::freshly_generated(1u32, week("2024-02-26")))
            .await
            .unwrap();

        let read: TierRead<u32> = tier.read(&user, &week("2024-03-04")).await.unwrap();
        assert_eq!(
            read,
            TierRead::Stale {
                stored: week("2024-02-26"),
                evicted: false
            }
        );
        assert!(tier.store().rows.lock().unwrap().contains_key("u1"));
    }

    #[tokio::test]
    async fn test_undecodable_row_is_error() {
        let tier = RemoteStoreTier::new(MapStore::default());
        tier.store()
            .upsert_record(&RemoteRecord {
                user_id: "u1".into(),
                period_key: "2024-03-04".into(),
                payload: json!("not a number"),
                cached_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = ResultTier::<u32>::read(&tier, &UserId::from("u1"), &week("2024-03-04"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Deserialization { .. }));
    }

    #[tokio::test]
    async fn test_remove_is_noop() {
        let tier = RemoteStoreTier::new(MapStore::default());
        let user = UserId::from("u1");
        tier.write(&user, &CachedResult::freshly_generated(1u32, week("2024-03-04")))
            .await
            .unwrap();

        assert!(!ResultTier::<u32>::remove(&tier, &user).await.unwrap());
        assert!(tier.store().rows.lock().unwrap().contains_key("u1"));
    }
}
