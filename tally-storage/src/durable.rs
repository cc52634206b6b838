//! LMDB-backed durable tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the device-local string
//! map that survives process restarts. Each user has one entry under
//! `{prefix}{userId}` whose value is the JSON form of [`StoredResult`]:
//! `{ "payload": ..., "cachedAt": ..., "periodKey": ... }`.
//!
//! # Self-cleaning reads
//!
//! A read that finds an entry for another period, or a value that no
//! longer decodes, deletes it before reporting a miss. A corrupt entry
//! therefore costs exactly one regeneration instead of failing forever.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use a read transaction; writes,
//! deletes and purges use a write transaction. All transactions are opened
//! and closed inside synchronous helpers so none is held across an await.

use std::marker::PhantomData;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use tally_core::{
    CachedResult, DurableConfig, Origin, PeriodKey, PeriodicPayload, StorageError, StoredResult,
    TierKind, UserId,
};

use crate::key::DurableKey;
use crate::tier::{ResultTier, TierRead};

/// Error type for LMDB tier operations.
#[derive(Debug, thiserror::Error)]
pub enum DurableTierError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// An empty prefix would claim every key in a shared environment.
    #[error("Durable key prefix must not be empty")]
    EmptyKeyPrefix,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DurableTierError> for StorageError {
    fn from(e: DurableTierError) -> Self {
        match e {
            DurableTierError::Transaction(reason) => StorageError::Transaction { reason },
            other => StorageError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// What a raw read found, before any cleanup.
enum RawRead<T> {
    Absent,
    Decoded(StoredResult<T>),
    Corrupt(String),
}

/// LMDB-backed durable tier.
///
/// # Example
///
/// ```ignore
/// use tally_storage::LmdbDurableTier;
///
/// let tier: LmdbDurableTier<Score> = LmdbDurableTier::new("/var/lib/app/tally", 64, "score:")?;
/// ```
pub struct LmdbDurableTier<T> {
    env: Env,
    db: Database<Str, Str>,
    key_prefix: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for LmdbDurableTier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbDurableTier")
            .field("path", &self.env.path())
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl<T: PeriodicPayload> LmdbDurableTier<T> {
    /// Open (or create) the environment at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `key_prefix` is empty or whitespace
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        key_prefix: impl Into<String>,
    ) -> Result<Self, DurableTierError> {
        let key_prefix = key_prefix.into();
        if key_prefix.trim().is_empty() {
            return Err(DurableTierError::EmptyKeyPrefix);
        }
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| DurableTierError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| DurableTierError::DbOpen(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            key_prefix,
            _payload: PhantomData,
        })
    }

    pub fn from_config(config: &DurableConfig) -> Result<Self, DurableTierError> {
        Self::new(&config.path, config.max_size_mb, config.key_prefix.clone())
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn key(&self, user_id: &UserId) -> DurableKey {
        DurableKey::new(&self.key_prefix, user_id)
    }

    fn read_raw(&self, key: &DurableKey) -> Result<RawRead<T>, DurableTierError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;

        let raw = self
            .db
            .get(&rtxn, key.as_str())
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;

        Ok(match raw {
            None => RawRead::Absent,
            Some(json) => match serde_json::from_str::<StoredResult<T>>(json) {
                Ok(stored) => RawRead::Decoded(stored),
                Err(e) => RawRead::Corrupt(e.to_string()),
            },
        })
    }

    fn put_raw(&self, key: &DurableKey, json: &str) -> Result<(), DurableTierError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        self.db
            .put(&mut wtxn, key.as_str(), json)
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))
    }

    fn delete_raw(&self, key: &DurableKey) -> Result<bool, DurableTierError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_str())
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        Ok(deleted)
    }

    /// Keys under this tier's prefix whose entry is not valid for `current`.
    fn collect_stale_keys(&self, current: &PeriodKey) -> Result<Vec<String>, DurableTierError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for entry in iter {
            let (key, json) = entry.map_err(|e| DurableTierError::Transaction(e.to_string()))?;
            if !key.starts_with(&self.key_prefix) {
                continue;
            }
            let valid = serde_json::from_str::<StoredResult<serde_json::Value>>(json)
                .map(|stored| &stored.period_key == current)
                .unwrap_or(false);
            if !valid {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    /// Delete every entry under this prefix not valid for `current`.
    ///
    /// Reads already clean up lazily; this is for hosts that want to reclaim
    /// space for users who never come back.
    pub async fn purge_stale(&self, current: &PeriodKey) -> Result<u64, StorageError> {
        let keys = self.collect_stale_keys(current)?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        let mut deleted = 0u64;
        for key in &keys {
            let removed = self
                .db
                .delete(&mut wtxn, key.as_str())
                .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
            if removed {
                deleted += 1;
            }
        }
        wtxn.commit()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;

        tracing::debug!(deleted, prefix = %self.key_prefix, "Purged stale durable entries");
        Ok(deleted)
    }

    /// Number of entries under this tier's prefix.
    pub fn entry_count(&self) -> Result<u64, StorageError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        let iter = self
            .db
            .prefix_iter(&rtxn, self.key_prefix.as_str())
            .map_err(|e| DurableTierError::Transaction(e.to_string()))?;
        Ok(iter.filter(|entry| entry.is_ok()).count() as u64)
    }
}

#[async_trait]
impl<T: PeriodicPayload> ResultTier<T> for LmdbDurableTier<T> {
    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    async fn read(
        &self,
        user_id: &UserId,
        current: &PeriodKey,
    ) -> Result<TierRead<T>, StorageError> {
        let key = self.key(user_id);

        match self.read_raw(&key)? {
            RawRead::Absent => Ok(TierRead::Miss),
            RawRead::Decoded(stored) if &stored.period_key == current => {
                Ok(TierRead::Hit(stored.into_cached(Origin::Durable)))
            }
            RawRead::Decoded(stored) => {
                let evicted = self.delete_raw(&key)?;
                Ok(TierRead::Stale {
                    stored: stored.period_key,
                    evicted,
                })
            }
            RawRead::Corrupt(reason) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %reason,
                    "Undecodable durable entry, deleting"
                );
                self.delete_raw(&key)?;
                Ok(TierRead::Miss)
            }
        }
    }

    async fn write(&self, user_id: &UserId, result: &CachedResult<T>) -> Result<(), StorageError> {
        let mut stored = StoredResult::from(result);
        stored.cached_at = Utc::now();
        let json = serde_json::to_string(&stored).map_err(|e| StorageError::Serialization {
            reason: e.to_string(),
        })?;
        self.put_raw(&self.key(user_id), &json)?;
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> Result<bool, StorageError> {
        Ok(self.delete_raw(&self.key(user_id))?)
    }
}
