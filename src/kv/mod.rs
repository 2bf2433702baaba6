//! Façade over the consistent KV store that coordinates the cluster.
//!
//! Compare-and-swap on a per-key modify index is the only mutation
//! primitive; every writer must handle a `false` return by refetching.
//! The service-registry half drives member liveness: a registered id is
//! healthy as long as `pass_ttl` lands within one TTL window.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryKv;

/// A stored key with its version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: String,
    pub modify_index: u64,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a key; `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<KvPair>>;

    /// List keys under a prefix, ordered.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Ensure a key exists (empty value when new) and return the stored pair.
    async fn create(&self, key: &str) -> Result<KvPair>;

    /// Compare-and-swap: commits iff the stored modify index equals
    /// `pair.modify_index`. An absent key has index 0.
    async fn cas(&self, pair: &KvPair) -> Result<bool>;

    /// Delete every key under a prefix.
    async fn delete_tree(&self, prefix: &str) -> Result<bool>;

    /// Register a service with a TTL health check.
    async fn register_service(&self, id: &str, address: &str, ttl: Duration) -> Result<()>;

    /// Refresh the TTL check for a registered service.
    async fn pass_ttl(&self, id: &str) -> Result<()>;

    /// Liveness verdict for a registered service.
    async fn check_health(&self, id: &str) -> Result<bool>;
}

/// Key of the members list.
pub fn members_key(cluster: &str) -> String {
    format!("Swift/{cluster}/Members")
}

/// Prefix under which all job keys of a cluster live.
pub fn jobs_prefix(cluster: &str) -> String {
    format!("Swift/{cluster}/Jobs/")
}

/// Prefix of one job's keys; `delete_tree` target when the job disappears.
pub fn job_prefix(cluster: &str, job: &str) -> String {
    format!("Swift/{cluster}/Jobs/{job}")
}

pub fn job_config_key(cluster: &str, job: &str) -> String {
    format!("Swift/{cluster}/Jobs/{job}/Config")
}

pub fn job_record_key(cluster: &str, job: &str, record_id: &str) -> String {
    format!("Swift/{cluster}/Jobs/{job}/Records/{record_id}")
}
