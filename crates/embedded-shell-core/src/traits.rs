//! Core traits for session storage and key-value backends.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::Session;

/// Invocation identifier.
pub type InvocationId = Uuid;

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
    /// A session could not be encoded for writing.
    #[error("Session codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Trait for session storage.
///
/// Implementations never retry; a backend failure is returned to the caller
/// as [`StoreError::Unavailable`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch one session. Missing or undecodable records are `None`.
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// All stored sessions, in no particular order.
    ///
    /// Entries that fail to decode are skipped.
    async fn get_all(&self) -> Result<Vec<Session>, StoreError>;

    /// Insert or overwrite a session (last write wins).
    async fn put(&self, session: &Session) -> Result<bool, StoreError>;

    /// Insert only when no record exists. Returns `true` iff this call created it.
    async fn put_if_absent(&self, session: &Session) -> Result<bool, StoreError>;

    /// Delete a session. Returns whether a record existed.
    async fn remove(&self, session_id: &str) -> Result<bool, StoreError>;
}

/// Primitive operations of a key-value backend.
///
/// Modelled on the string and set commands of a Redis-style server so a
/// single node and a sharded cluster can stand behind the same interface.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value unconditionally.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write a string value only if the key is absent. Returns whether it was written.
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Add a member to a set. Returns whether it was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove a member from a set. Returns whether it was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// All members of a set.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
}
