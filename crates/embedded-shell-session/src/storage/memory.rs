//! In-memory key-value backend.

use std::{
    collections::{HashMap, HashSet},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use embedded_shell_core::{KvClient, StoreError};

#[derive(Default)]
struct Keyspace {
    strings: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-memory key-value node.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryKv {
    keyspace: RwLock<Keyspace>,
}

impl MemoryKv {
    /// Create an empty node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of string keys held by this node.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.read().map(|k| k.strings.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Keyspace>, StoreError> {
        self.keyspace
            .read()
            .map_err(|e: PoisonError<_>| StoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Keyspace>, StoreError> {
        self.keyspace
            .write()
            .map_err(|e: PoisonError<_>| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read()?.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write()?
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut keyspace = self.write()?;
        if keyspace.strings.contains_key(key) {
            return Ok(false);
        }
        keyspace.strings.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut keyspace = self.write()?;
        let removed = keyspace.strings.remove(key).is_some() | keyspace.sets.remove(key).is_some();
        Ok(removed)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .write()?
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut keyspace = self.write()?;
        let Some(set) = keyspace.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            keyspace.sets.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()?
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}
