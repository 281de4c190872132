//! State store abstraction
//!
//! A key-value store with version tokens (ETags). Every write may carry a
//! [`WriteCondition`]; a failed condition surfaces as
//! [`StateError::EtagMismatch`], which is what EtagRetry retries on.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::errors::{StateError, StateResult};

/// Precondition attached to a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition<'a> {
    /// Last write wins
    Always,
    /// Only succeed if the key does not exist yet
    IfAbsent,
    /// Only succeed if the stored ETag still equals this token
    IfMatch(&'a str),
}

/// A stored value and its current version token
#[derive(Debug, Clone, PartialEq)]
pub struct StateItem {
    pub value: Value,
    pub etag: String,
}

/// A typed value together with the ETag it was read at
///
/// `etag` is `None` when the key did not exist, so writing the value back
/// uses [`WriteCondition::IfAbsent`] and still loses to a concurrent creator.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub etag: Option<String>,
}

impl<T> Versioned<T> {
    pub fn new(value: T, etag: Option<String>) -> Self {
        Self { value, etag }
    }

    /// Condition that makes a write of this snapshot a compare-and-swap
    pub fn condition(&self) -> WriteCondition<'_> {
        match &self.etag {
            Some(etag) => WriteCondition::IfMatch(etag),
            None => WriteCondition::IfAbsent,
        }
    }
}

/// Core trait for state store backends
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Backend type name (e.g. "memory", "file", "dapr")
    fn backend_type(&self) -> &'static str;

    /// Read a value and its ETag; `None` if the key is absent
    async fn get(&self, key: &str) -> StateResult<Option<StateItem>>;

    /// Write a value under `condition`, returning the new ETag
    async fn save(&self, key: &str, value: &Value, condition: WriteCondition<'_>) -> StateResult<String>;

    /// Delete a key, optionally guarded by an ETag. Deleting an absent key is not an error.
    async fn delete(&self, key: &str, etag: Option<&str>) -> StateResult<()>;
}

/// Typed JSON helpers over any [`StateStore`]
#[async_trait]
pub trait StateStoreExt: StateStore {
    /// Read and deserialize, keeping the ETag
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<Versioned<T>>> {
        match self.get(key).await? {
            Some(item) => {
                let value = serde_json::from_value(item.value)?;
                Ok(Some(Versioned::new(value, Some(item.etag))))
            }
            None => Ok(None),
        }
    }

    /// Serialize and write
    async fn save_json<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        condition: WriteCondition<'_>,
    ) -> StateResult<String> {
        let json = serde_json::to_value(value)?;
        self.save(key, &json, condition).await
    }
}

// Blanket implementation for all StateStore implementors
impl<T: StateStore + ?Sized> StateStoreExt for T {}

/// In-process store with monotonically increasing version tokens
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, (Value, u64)>>,
    version: std::sync::atomic::AtomicU64,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> u64 {
        self.version
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Fail unless `condition` holds for the current ETag
pub(crate) fn check_condition(
    key: &str,
    current: Option<&str>,
    condition: WriteCondition<'_>,
) -> StateResult<()> {
    let ok = match condition {
        WriteCondition::Always => true,
        WriteCondition::IfAbsent => current.is_none(),
        WriteCondition::IfMatch(expected) => current == Some(expected),
    };

    if ok {
        Ok(())
    } else {
        Err(StateError::etag_mismatch(key))
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StateResult<Option<StateItem>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).map(|(value, version)| StateItem {
            value: value.clone(),
            etag: version.to_string(),
        }))
    }

    async fn save(&self, key: &str, value: &Value, condition: WriteCondition<'_>) -> StateResult<String> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).map(|(_, version)| version.to_string());
        check_condition(key, current.as_deref(), condition)?;

        let version = self.next_version();
        entries.insert(key.to_string(), (value.clone(), version));
        Ok(version.to_string())
    }

    async fn delete(&self, key: &str, etag: Option<&str>) -> StateResult<()> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).map(|(_, version)| version.to_string());
        if let (Some(expected), Some(current)) = (etag, current.as_deref()) {
            if expected != current {
                return Err(StateError::etag_mismatch(key));
            }
        }
        entries.remove(key);
        Ok(())
    }
}
