//! Session store over a key-value backend.

use std::sync::Arc;

use async_trait::async_trait;
use embedded_shell_core::{
    KvClient, Session, SessionStore, StoreError,
    config::{StoreKind, StoreMode, StoreSection},
};

#[cfg(feature = "redis")]
use super::RedisKv;
#[cfg(feature = "memory")]
use super::{ClusterKv, MemoryKv};

/// Prefix of every session record key.
pub const SESSION_KEY_PREFIX: &str = "shell:session:";

/// Set holding the ids of all stored sessions.
///
/// Lives outside [`SESSION_KEY_PREFIX`] so no session id can collide with it.
pub const SESSION_INDEX_KEY: &str = "shell:sessions:index";

/// Topology of the backend a [`KvSessionStore`] was built over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Standalone,
    Cluster { nodes: usize },
}

/// [`SessionStore`] that keeps each session as a JSON string value.
///
/// A record and its index entry are written by two commands. `remove`
/// re-checks the record after dropping the index entry, so a `put` racing
/// with it stays listed by `get_all`.
pub struct KvSessionStore {
    client: Arc<dyn KvClient>,
    backend: StoreBackend,
}

impl std::fmt::Debug for KvSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSessionStore")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl KvSessionStore {
    /// Wrap an existing client of the given topology.
    #[must_use]
    pub fn new(client: Arc<dyn KvClient>, backend: StoreBackend) -> Self {
        Self { client, backend }
    }

    /// Single in-memory node.
    #[cfg(feature = "memory")]
    #[must_use]
    pub fn standalone() -> Self {
        Self::new(Arc::new(MemoryKv::new()), StoreBackend::Standalone)
    }

    /// `nodes` in-memory nodes behind a slot router.
    ///
    /// # Errors
    /// Returns error if `nodes` is zero.
    #[cfg(feature = "memory")]
    pub fn cluster(nodes: usize) -> Result<Self, StoreError> {
        let clients = (0..nodes)
            .map(|_| Arc::new(MemoryKv::new()) as Arc<dyn KvClient>)
            .collect();
        Ok(Self::new(
            Arc::new(ClusterKv::new(clients)?),
            StoreBackend::Cluster { nodes },
        ))
    }

    /// Build the backend named by the store configuration section.
    ///
    /// # Errors
    /// Returns error if the configured backend is not compiled in, a cluster
    /// has no nodes, or Redis cannot be reached.
    #[cfg_attr(not(feature = "redis"), allow(clippy::unused_async))]
    pub async fn from_config(section: &StoreSection) -> Result<Self, StoreError> {
        let store = match (section.backend, section.mode) {
            #[cfg(feature = "memory")]
            (StoreKind::Memory, StoreMode::Standalone) => Self::standalone(),
            #[cfg(feature = "memory")]
            (StoreKind::Memory, StoreMode::Cluster) => Self::cluster(section.cluster_nodes)?,
            #[cfg(feature = "redis")]
            (StoreKind::Redis, StoreMode::Standalone) => Self::new(
                Arc::new(RedisKv::connect(&section.url).await?),
                StoreBackend::Standalone,
            ),
            #[cfg(feature = "redis")]
            (StoreKind::Redis, StoreMode::Cluster) => Self::new(
                Arc::new(RedisKv::connect_cluster(&section.nodes).await?),
                StoreBackend::Cluster {
                    nodes: section.nodes.len(),
                },
            ),
            #[allow(unreachable_patterns)]
            (backend, _) => {
                return Err(StoreError::Unavailable(format!(
                    "{backend:?} session store is not compiled in"
                )));
            }
        };
        tracing::info!(kind = ?section.backend, backend = ?store.backend, "session store ready");
        Ok(store)
    }

    #[must_use]
    pub const fn backend(&self) -> StoreBackend {
        self.backend
    }

    fn key(session_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{session_id}")
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let Some(raw) = self.client.get(&Self::key(session_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "undecodable session record");
                Ok(None)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<Session>, StoreError> {
        let ids = self.client.smembers(SESSION_INDEX_KEY).await?;
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await? {
                Some(session) => sessions.push(session),
                None => tracing::debug!(session_id = %id, "skipping dangling index entry"),
            }
        }
        Ok(sessions)
    }

    async fn put(&self, session: &Session) -> Result<bool, StoreError> {
        let value = serde_json::to_string(session)?;
        self.client.set(&Self::key(&session.id), &value).await?;
        self.client.sadd(SESSION_INDEX_KEY, &session.id).await?;
        Ok(true)
    }

    async fn put_if_absent(&self, session: &Session) -> Result<bool, StoreError> {
        let value = serde_json::to_string(session)?;
        let created = self.client.set_nx(&Self::key(&session.id), &value).await?;
        if created {
            self.client.sadd(SESSION_INDEX_KEY, &session.id).await?;
        }
        Ok(created)
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        let key = Self::key(session_id);
        let existed = self.client.del(&key).await?;
        self.client.srem(SESSION_INDEX_KEY, session_id).await?;
        // A concurrent put may have rewritten the record after the delete.
        if self.client.get(&key).await?.is_some() {
            tracing::debug!(session_id, "session rewritten during removal, keeping it indexed");
            self.client.sadd(SESSION_INDEX_KEY, session_id).await?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DownKv;

    #[async_trait]
    impl KvClient for DownKv {
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_nx(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn del(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn sadd(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn srem(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn smembers(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn stores() -> Vec<KvSessionStore> {
        vec![
            KvSessionStore::standalone(),
            KvSessionStore::cluster(3).unwrap(),
        ]
    }

    #[tokio::test]
    async fn test_put_then_get() {
        for store in stores() {
            let mut session = Session::new("s1");
            session.set_attribute("user", json!("ada"));
            assert!(store.put(&session).await.unwrap());

            let loaded = store.get("s1").await.unwrap().unwrap();
            assert_eq!(loaded, session);
            assert!(store.get("missing").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = KvSessionStore::standalone();
        let mut session = Session::new("s1");
        store.put(&session).await.unwrap();
        session.set_attribute("step", json!(2));
        store.put(&session).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.attribute("step"), Some(&json!(2)));
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_if_absent_first_wins() {
        for store in stores() {
            let mut first = Session::new("s1");
            first.set_attribute("writer", json!("first"));
            let mut second = Session::new("s1");
            second.set_attribute("writer", json!("second"));

            assert!(store.put_if_absent(&first).await.unwrap());
            assert!(!store.put_if_absent(&second).await.unwrap());
            let loaded = store.get("s1").await.unwrap().unwrap();
            assert_eq!(loaded.attribute("writer"), Some(&json!("first")));
        }
    }

    #[tokio::test]
    async fn test_concurrent_put_if_absent_single_winner() {
        let store = Arc::new(KvSessionStore::cluster(3).unwrap());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut session = Session::new("shared");
                session.set_attribute("writer", json!(i));
                store.put_if_absent(&session).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        for store in stores() {
            store.put(&Session::new("s1")).await.unwrap();
            assert!(store.remove("s1").await.unwrap());
            assert!(store.get("s1").await.unwrap().is_none());
            assert!(!store.remove("s1").await.unwrap());
            assert!(store.get_all().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_get_all_skips_bad_records() {
        let kv = Arc::new(MemoryKv::new());
        let store = KvSessionStore::new(Arc::clone(&kv) as Arc<dyn KvClient>, StoreBackend::Standalone);
        store.put(&Session::new("good")).await.unwrap();

        kv.set("shell:session:bad", "not json").await.unwrap();
        kv.sadd(SESSION_INDEX_KEY, "bad").await.unwrap();
        kv.sadd(SESSION_INDEX_KEY, "gone").await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "good");
        assert!(store.get("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_named_index_does_not_collide() {
        let store = KvSessionStore::standalone();
        store.put(&Session::new("index")).await.unwrap();
        store.put(&Session::new("other")).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces() {
        let store = KvSessionStore::new(Arc::new(DownKv), StoreBackend::Standalone);
        assert!(matches!(
            store.get("s1").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.put(&Session::new("s1")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.get_all().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    /// Lands a competing `put` of the same session right after a delete.
    struct RacingKv {
        inner: MemoryKv,
        record: String,
    }

    #[async_trait]
    impl KvClient for RacingKv {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }
        async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
            self.inner.set_nx(key, value).await
        }
        async fn del(&self, key: &str) -> Result<bool, StoreError> {
            let existed = self.inner.del(key).await?;
            self.inner.set(key, &self.record).await?;
            self.inner.sadd(SESSION_INDEX_KEY, "s1").await?;
            Ok(existed)
        }
        async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
            self.inner.sadd(key, member).await
        }
        async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
            self.inner.srem(key, member).await
        }
        async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
            self.inner.smembers(key).await
        }
    }

    #[tokio::test]
    async fn test_put_racing_remove_stays_indexed() {
        let session = Session::new("s1");
        let kv = RacingKv {
            inner: MemoryKv::new(),
            record: serde_json::to_string(&session).unwrap(),
        };
        let store = KvSessionStore::new(Arc::new(kv), StoreBackend::Standalone);
        store.put(&session).await.unwrap();

        assert!(store.remove("s1").await.unwrap());
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "s1");
    }

    #[test]
    fn test_new_reports_given_backend() {
        let clients: Vec<Arc<dyn KvClient>> =
            vec![Arc::new(MemoryKv::new()), Arc::new(MemoryKv::new())];
        let store = KvSessionStore::new(
            Arc::new(ClusterKv::new(clients).unwrap()),
            StoreBackend::Cluster { nodes: 2 },
        );
        assert_eq!(store.backend(), StoreBackend::Cluster { nodes: 2 });
    }

    #[tokio::test]
    async fn test_from_config() {
        let section = StoreSection {
            mode: StoreMode::Cluster,
            cluster_nodes: 4,
            ..StoreSection::default()
        };
        let store = KvSessionStore::from_config(&section).await.unwrap();
        assert_eq!(store.backend(), StoreBackend::Cluster { nodes: 4 });

        let empty = StoreSection {
            mode: StoreMode::Cluster,
            cluster_nodes: 0,
            ..StoreSection::default()
        };
        assert!(KvSessionStore::from_config(&empty).await.is_err());
    }

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn test_from_config_redis_cluster_needs_nodes() {
        let section = StoreSection {
            backend: StoreKind::Redis,
            mode: StoreMode::Cluster,
            ..StoreSection::default()
        };
        assert!(matches!(
            KvSessionStore::from_config(&section).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
