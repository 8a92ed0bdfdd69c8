//! Session storage and command dispatch for the embedded shell.
//!
//! Provides:
//! - `Dispatcher` - Run command lines against a registry and supervise invocations
//! - Storage implementations (in-memory node, clustered slot router, Redis, `KvSessionStore`)

pub mod dispatcher;
pub mod storage;

pub use dispatcher::{DispatchError, Dispatcher, InvocationHandle, ReapReport};
#[cfg(feature = "memory")]
pub use storage::MemoryKv;
#[cfg(feature = "redis")]
pub use storage::RedisKv;
pub use storage::{ClusterKv, KvSessionStore, StoreBackend};
