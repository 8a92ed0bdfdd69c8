//! Redis key-value backend, standalone or cluster.
//!
//! Every [`KvClient`] call is a single-key Redis command, so the same code
//! runs against one server and against Redis Cluster. The cluster client
//! routes each key to the node owning its hash slot.

use async_trait::async_trait;
use embedded_shell_core::{KvClient, StoreError};
use redis::{
    AsyncCommands, RedisError,
    aio::{ConnectionLike, ConnectionManager},
    cluster::ClusterClient,
    cluster_async::ClusterConnection,
};

/// Key-value node backed by a Redis connection.
///
/// Connections are cheap handles over a shared multiplexed connection and
/// are cloned per call.
#[derive(Clone)]
pub struct RedisKv<C> {
    conn: C,
}

impl<C> std::fmt::Debug for RedisKv<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}

impl RedisKv<ConnectionManager> {
    /// Connect to a single Redis server. The connection reconnects on its own
    /// after failures.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;
        tracing::info!(url, "connected to redis");
        Ok(Self { conn })
    }
}

impl RedisKv<ClusterConnection> {
    /// Connect to a Redis Cluster through its seed nodes.
    ///
    /// # Errors
    /// Returns error if `nodes` is empty, a URL is invalid, or no seed node
    /// answers.
    pub async fn connect_cluster(nodes: &[String]) -> Result<Self, StoreError> {
        if nodes.is_empty() {
            return Err(StoreError::Unavailable(
                "redis cluster needs at least one seed node".to_string(),
            ));
        }
        let client = ClusterClient::new(nodes.to_vec()).map_err(unavailable)?;
        let conn = client.get_async_connection().await.map_err(unavailable)?;
        tracing::info!(seeds = nodes.len(), "connected to redis cluster");
        Ok(Self { conn })
    }
}

fn unavailable(e: RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl<C> KvClient for RedisKv<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(unavailable)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(unavailable)
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.set_nx::<_, _, bool>(key, value)
            .await
            .map_err(unavailable)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed = conn.del::<_, usize>(key).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let added = conn
            .sadd::<_, _, usize>(key, member)
            .await
            .map_err(unavailable)?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed = conn
            .srem::<_, _, usize>(key, member)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.smembers::<_, Vec<String>>(key)
            .await
            .map_err(unavailable)
    }
}
