//! Clustered key-value backend.
//!
//! Keys are spread over a fixed set of nodes by hash slot, the way a
//! Redis Cluster client routes commands: `CRC16(key) mod 16384`, where only
//! the text inside the first non-empty `{...}` is hashed when present.

use std::sync::Arc;

use async_trait::async_trait;
use embedded_shell_core::{KvClient, StoreError};

/// Number of hash slots in the cluster keyspace.
pub const SLOT_COUNT: u16 = 16384;

/// A key-value client that routes each key to one node of a cluster.
pub struct ClusterKv {
    nodes: Vec<Arc<dyn KvClient>>,
}

impl ClusterKv {
    /// Create a cluster client over `nodes`. Slots are split evenly in node order.
    ///
    /// # Errors
    /// Returns error if `nodes` is empty.
    pub fn new(nodes: Vec<Arc<dyn KvClient>>) -> Result<Self, StoreError> {
        if nodes.is_empty() {
            return Err(StoreError::Unavailable("cluster has no nodes".to_string()));
        }
        Ok(Self { nodes })
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Index of the node owning `key`.
    #[must_use]
    pub fn node_index(&self, key: &str) -> usize {
        usize::from(key_slot(key)) * self.nodes.len() / usize::from(SLOT_COUNT)
    }

    fn node(&self, key: &str) -> &dyn KvClient {
        self.nodes[self.node_index(key)].as_ref()
    }
}

/// Hash slot of `key`.
#[must_use]
pub fn key_slot(key: &str) -> u16 {
    crc16(hash_tag(key).as_bytes()) % SLOT_COUNT
}

fn hash_tag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(len) = key[open + 1..].find('}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// CRC16-CCITT (XModem): polynomial 0x1021, initial value 0.
fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 == 0 {
                crc << 1
            } else {
                (crc << 1) ^ 0x1021
            };
        }
    }
    crc
}

#[async_trait]
impl KvClient for ClusterKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.node(key).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.node(key).set(key, value).await
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.node(key).set_nx(key, value).await
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.node(key).del(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.node(key).sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.node(key).srem(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.node(key).smembers(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_known_slot() {
        assert_eq!(key_slot("foo"), 12182);
    }

    #[test]
    fn test_hash_tags_share_slot() {
        assert_eq!(
            key_slot("{user1000}.following"),
            key_slot("{user1000}.followers")
        );
        assert_eq!(key_slot("{}.x"), crc16(b"{}.x") % SLOT_COUNT);
    }

    #[test]
    fn test_empty_cluster_rejected() {
        assert!(ClusterKv::new(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_keys_spread_over_nodes() {
        let nodes: Vec<Arc<MemoryKv>> = (0..3).map(|_| Arc::new(MemoryKv::new())).collect();
        let cluster = ClusterKv::new(
            nodes
                .iter()
                .map(|n| Arc::clone(n) as Arc<dyn KvClient>)
                .collect(),
        )
        .unwrap();

        for i in 0..60 {
            cluster.set(&format!("shell:session:{i}"), "{}").await.unwrap();
        }
        let counts: Vec<usize> = nodes.iter().map(|n| n.key_count()).collect();
        assert_eq!(counts.iter().sum::<usize>(), 60);
        assert!(counts.iter().all(|&c| c > 0), "uneven spread: {counts:?}");

        let key = "shell:session:7";
        let owner = cluster.node_index(key);
        assert_eq!(
            nodes[owner].get(key).await.unwrap().as_deref(),
            Some("{}")
        );
    }
}
