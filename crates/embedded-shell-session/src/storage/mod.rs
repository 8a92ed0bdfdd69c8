//! Storage implementations.

pub mod cluster;
pub mod kv_store;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_kv;

pub use cluster::ClusterKv;
pub use kv_store::{KvSessionStore, StoreBackend};
#[cfg(feature = "memory")]
pub use memory::MemoryKv;
#[cfg(feature = "redis")]
pub use redis_kv::RedisKv;
