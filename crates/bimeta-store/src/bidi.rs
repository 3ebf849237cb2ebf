//! Bidirectional key/value index
//!
//! Every logical entry `key -> value` is stored as two records in the flat
//! engine namespace:
//!
//! - forward: `kv:<key>` holding `<value>`
//! - inverse: `vk:<value>` holding `<key>`
//!
//! Writes touch both records (forward first). Deletes touch only the record
//! for the direction they were asked about, so deleting a key leaves its
//! inverse record resolvable and vice versa. Overwriting a key does not
//! remove the inverse record of the old value either.

use crate::engine::KvEngine;
use crate::error::{BatchError, StoreError, StoreResult};
use bimeta_common::config::DualWritePolicy;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Which half of the index a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `kv:` records, looked up by key
    Forward,
    /// `vk:` records, looked up by value
    Inverse,
}

impl Direction {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Forward => "kv:",
            Self::Inverse => "vk:",
        }
    }

    /// Engine key of the record for `name` in this direction
    #[must_use]
    pub fn record(self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "key"),
            Self::Inverse => write!(f, "value"),
        }
    }
}

/// Dual index over a [`KvEngine`]
pub struct BidirectionalStore {
    engine: Arc<dyn KvEngine>,
    policy: DualWritePolicy,
}

impl BidirectionalStore {
    /// Create a store using the default dual-write policy (rollback)
    pub fn new(engine: Arc<dyn KvEngine>) -> Self {
        Self {
            engine,
            policy: DualWritePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: DualWritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn policy(&self) -> DualWritePolicy {
        self.policy
    }

    /// Store `key -> value` in both directions.
    ///
    /// If the inverse write fails the forward record is handled according
    /// to the store's [`DualWritePolicy`] and the inverse error is returned.
    pub async fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        let forward = Direction::Forward.record(key);
        let previous = self.engine.put(&forward, value).await?;

        if let Err(e) = self.engine.put(&Direction::Inverse.record(value), key).await {
            match self.policy {
                DualWritePolicy::Rollback => {
                    self.rollback(&forward, value, previous.as_deref()).await;
                }
                DualWritePolicy::Admit => {
                    warn!(key, "Inverse write failed, forward record left in place");
                }
            }
            return Err(e.into());
        }

        debug!(key, "stored entry");
        Ok(())
    }

    /// Undo our forward write unless another writer replaced it since.
    async fn rollback(&self, forward: &str, written: &str, previous: Option<&str>) {
        match self.engine.restore_if(forward, written, previous).await {
            Ok(true) => debug!(record = forward, "rolled back forward record"),
            Ok(false) => debug!(
                record = forward,
                "Forward record changed by another writer, rollback skipped"
            ),
            Err(e) => error!(
                record = forward,
                "Rollback of forward record failed, index is inconsistent: {}", e
            ),
        }
    }

    async fn lookup(&self, direction: Direction, name: &str) -> StoreResult<String> {
        self.engine
            .get(&direction.record(name))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                direction,
                name: name.to_string(),
            })
    }

    async fn remove(&self, direction: Direction, name: &str) -> StoreResult<String> {
        self.engine
            .take(&direction.record(name))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                direction,
                name: name.to_string(),
            })
    }

    /// Value stored for `key`
    pub async fn get(&self, key: &str) -> StoreResult<String> {
        self.lookup(Direction::Forward, key).await
    }

    /// Key that was stored with `value`
    pub async fn get_inverse(&self, value: &str) -> StoreResult<String> {
        self.lookup(Direction::Inverse, value).await
    }

    /// Remove the forward record of `key` and return its value.
    /// The inverse record is kept.
    pub async fn delete(&self, key: &str) -> StoreResult<String> {
        self.remove(Direction::Forward, key).await
    }

    /// Remove the inverse record of `value` and return its key.
    /// The forward record is kept.
    pub async fn delete_inverse(&self, value: &str) -> StoreResult<String> {
        self.remove(Direction::Inverse, value).await
    }

    /// Total record count, both directions included
    pub async fn size(&self) -> StoreResult<u64> {
        Ok(self.engine.size().await?)
    }

    pub async fn compact(&self) -> StoreResult<bool> {
        Ok(self.engine.compact().await?)
    }

    pub async fn pause_compaction(&self) -> StoreResult<()> {
        Ok(self.engine.pause_compaction().await?)
    }

    pub async fn resume_compaction(&self) -> StoreResult<()> {
        Ok(self.engine.resume_compaction().await?)
    }

    pub async fn get_many(&self, keys: &[String]) -> Result<Vec<String>, BatchError<String>> {
        let mut values = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            match self.get(key).await {
                Ok(value) => values.push(value),
                Err(e) => return Err(BatchError::new(values, i, e)),
            }
        }
        Ok(values)
    }

    pub async fn get_many_inverse(
        &self,
        values: &[String],
    ) -> Result<Vec<String>, BatchError<String>> {
        let mut keys = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            match self.get_inverse(value).await {
                Ok(key) => keys.push(key),
                Err(e) => return Err(BatchError::new(keys, i, e)),
            }
        }
        Ok(keys)
    }

    /// Store every pair in order. On failure `completed` lists the keys
    /// that were stored.
    pub async fn set_many(
        &self,
        entries: &[(String, String)],
    ) -> Result<(), BatchError<String>> {
        let mut stored = Vec::with_capacity(entries.len());
        for (i, (key, value)) in entries.iter().enumerate() {
            if let Err(e) = self.put(key, value).await {
                return Err(BatchError::new(stored, i, e));
            }
            stored.push(key.clone());
        }
        Ok(())
    }

    pub async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>, BatchError<String>> {
        let mut values = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            match self.delete(key).await {
                Ok(value) => values.push(value),
                Err(e) => return Err(BatchError::new(values, i, e)),
            }
        }
        Ok(values)
    }

    pub async fn delete_many_inverse(
        &self,
        values: &[String],
    ) -> Result<Vec<String>, BatchError<String>> {
        let mut keys = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            match self.delete_inverse(value).await {
                Ok(key) => keys.push(key),
                Err(e) => return Err(BatchError::new(keys, i, e)),
            }
        }
        Ok(keys)
    }
}
