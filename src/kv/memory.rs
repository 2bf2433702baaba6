//! In-process KV backend with the same contract as the production client.
//!
//! Backs the test suite and the demo binary: a single shared `MemoryKv`
//! stands in for the external store, so a whole cluster can run inside one
//! process. Health verdicts come from real TTL deadlines, with a per-service
//! override for deterministic liveness tests.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, SwiftError};
use crate::kv::{KvPair, KvStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    modify_index: u64,
}

#[derive(Debug)]
struct Service {
    ttl: Duration,
    deadline: Instant,
    /// When set, wins over the TTL deadline.
    health_override: Option<bool>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    services: HashMap<String, Service>,
    next_index: u64,
}

/// In-memory [`KvStore`] with a TTL service registry.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<Inner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a service's health verdict, bypassing its TTL deadline.
    pub async fn force_health(&self, id: &str, healthy: bool) {
        let mut inner = self.inner.lock().await;
        let service = inner.services.entry(id.to_string()).or_insert(Service {
            ttl: Duration::from_secs(15),
            deadline: Instant::now(),
            health_override: None,
        });
        service.health_override = Some(healthy);
    }

    /// Drop a health override; the TTL deadline decides again.
    pub async fn clear_health_override(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(service) = inner.services.get_mut(id) {
            service.health_override = None;
        }
    }

    /// Raw write bypassing CAS. Test hook for seeding state.
    pub async fn put(&self, key: &str, value: &str) -> KvPair {
        let mut inner = self.inner.lock().await;
        inner.next_index += 1;
        let index = inner.next_index;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                modify_index: index,
            },
        );
        KvPair {
            key: key.to_string(),
            value: value.to_string(),
            modify_index: index,
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<KvPair>> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.get(key).map(|e| KvPair {
            key: key.to_string(),
            value: e.value.clone(),
            modify_index: e.modify_index,
        }))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn create(&self, key: &str) -> Result<KvPair> {
        let mut inner = self.inner.lock().await;
        if !inner.entries.contains_key(key) {
            inner.next_index += 1;
            let index = inner.next_index;
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: String::new(),
                    modify_index: index,
                },
            );
        }
        let entry = &inner.entries[key];
        Ok(KvPair {
            key: key.to_string(),
            value: entry.value.clone(),
            modify_index: entry.modify_index,
        })
    }

    async fn cas(&self, pair: &KvPair) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let stored_index = inner.entries.get(&pair.key).map_or(0, |e| e.modify_index);
        if stored_index != pair.modify_index {
            return Ok(false);
        }
        inner.next_index += 1;
        let index = inner.next_index;
        inner.entries.insert(
            pair.key.clone(),
            Entry {
                value: pair.value.clone(),
                modify_index: index,
            },
        );
        Ok(true)
    }

    async fn delete_tree(&self, prefix: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(true)
    }

    async fn register_service(&self, id: &str, _address: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let health_override = inner.services.get(id).and_then(|s| s.health_override);
        inner.services.insert(
            id.to_string(),
            Service {
                ttl,
                deadline: Instant::now() + ttl,
                health_override,
            },
        );
        Ok(())
    }

    async fn pass_ttl(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let service = inner
            .services
            .get_mut(id)
            .ok_or_else(|| SwiftError::HealthProbeFailed(format!("unknown service {id}")))?;
        service.deadline = Instant::now() + service.ttl;
        Ok(())
    }

    async fn check_health(&self, id: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(match inner.services.get(id) {
            Some(service) => service
                .health_override
                .unwrap_or_else(|| service.deadline > Instant::now()),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_requires_current_index() {
        let kv = MemoryKv::new();
        let pair = kv.create("a/b").await.unwrap();

        let updated = KvPair {
            value: "v1".to_string(),
            ..pair.clone()
        };
        assert!(kv.cas(&updated).await.unwrap());

        // The old index must no longer commit.
        assert!(!kv.cas(&updated).await.unwrap());

        let fresh = kv.get("a/b").await.unwrap().unwrap();
        assert_eq!(fresh.value, "v1");
        assert!(fresh.modify_index > pair.modify_index);
    }

    #[tokio::test]
    async fn test_cas_index_zero_creates_missing_key() {
        let kv = MemoryKv::new();
        let pair = KvPair {
            key: "fresh".to_string(),
            value: "v".to_string(),
            modify_index: 0,
        };
        assert!(kv.cas(&pair).await.unwrap());
        assert!(!kv.cas(&pair).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let kv = MemoryKv::new();
        let first = kv.create("k").await.unwrap();

        let written = KvPair {
            value: "kept".to_string(),
            ..first
        };
        assert!(kv.cas(&written).await.unwrap());

        let again = kv.create("k").await.unwrap();
        assert_eq!(again.value, "kept");
    }

    #[tokio::test]
    async fn test_keys_scopes_to_prefix() {
        let kv = MemoryKv::new();
        kv.put("Swift/c1/Jobs/j1/Config", "{}").await;
        kv.put("Swift/c1/Jobs/j2/Config", "{}").await;
        kv.put("Swift/c1/Members", "[]").await;

        let keys = kv.keys("Swift/c1/Jobs/").await.unwrap();
        assert_eq!(
            keys,
            vec!["Swift/c1/Jobs/j1/Config", "Swift/c1/Jobs/j2/Config"]
        );
    }

    #[tokio::test]
    async fn test_delete_tree_removes_subtree() {
        let kv = MemoryKv::new();
        kv.put("Swift/c1/Jobs/j1/Config", "{}").await;
        kv.put("Swift/c1/Jobs/j1/Records/r1", "{}").await;
        kv.put("Swift/c1/Jobs/j2/Config", "{}").await;

        kv.delete_tree("Swift/c1/Jobs/j1").await.unwrap();

        assert!(kv.get("Swift/c1/Jobs/j1/Config").await.unwrap().is_none());
        assert!(kv.get("Swift/c1/Jobs/j1/Records/r1").await.unwrap().is_none());
        assert!(kv.get("Swift/c1/Jobs/j2/Config").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_health_expires_and_recovers() {
        let kv = MemoryKv::new();
        kv.register_service("10.0.0.1", "10.0.0.1", Duration::from_millis(40))
            .await
            .unwrap();
        assert!(kv.check_health("10.0.0.1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!kv.check_health("10.0.0.1").await.unwrap());

        kv.pass_ttl("10.0.0.1").await.unwrap();
        assert!(kv.check_health("10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_health_override_wins() {
        let kv = MemoryKv::new();
        kv.register_service("w", "10.0.0.2", Duration::from_secs(60))
            .await
            .unwrap();
        kv.force_health("w", false).await;
        assert!(!kv.check_health("w").await.unwrap());

        kv.clear_health_override("w").await;
        assert!(kv.check_health("w").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_service_is_unhealthy() {
        let kv = MemoryKv::new();
        assert!(!kv.check_health("nobody").await.unwrap());
        assert!(kv.pass_ttl("nobody").await.is_err());
    }
}
