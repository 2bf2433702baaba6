//! JobConfig reconcilers.
//!
//! The Manager is the producer: it discovers job packages on its local disk
//! and publishes their configs to the KV. Workers are consumers: they mirror
//! the published configs into memory. Both variants diff by job name and
//! emit join/remove events for the delta.

use std::collections::HashSet;

use crate::cluster::events::ClusterEvent;
use crate::cluster::Cluster;
use crate::error::Result;
use crate::job::{package, JobConfig};
use crate::kv::{job_config_key, job_prefix, jobs_prefix, KvPair};

impl Cluster {
    /// Manager pass: disk -> KV.
    pub async fn refresh_job_configs_from_disk(&self) -> Result<()> {
        let mut state = self.jobs.lock().await;

        package::prepare_packages(&self.config.jobs_dir)?;
        let disk_configs = package::scan_configs(&self.config.jobs_dir)?;

        let mut joined = Vec::new();
        for disk in &disk_configs {
            match state.configs.iter_mut().find(|c| c.name == disk.name) {
                Some(existing) => {
                    if !existing.definition_eq(disk) {
                        let modify_index = existing.modify_index;
                        *existing = disk.clone();
                        existing.modify_index = modify_index;
                        tracing::debug!(job = %disk.name, "Refreshed job config from disk");
                    }
                }
                None => {
                    let mut config = disk.clone();
                    // A publish failure leaves the config out of memory so
                    // the next cycle picks it up again.
                    match self.publish_job_config(&mut config).await {
                        Ok(()) => {
                            state.configs.push(config.clone());
                            joined.push(config);
                        }
                        Err(err) => {
                            tracing::warn!(job = %disk.name, error = %err, "Failed to publish job config");
                        }
                    }
                }
            }
        }

        let disk_names: HashSet<&str> = disk_configs.iter().map(|c| c.name.as_str()).collect();
        let missing: Vec<String> = state
            .configs
            .iter()
            .filter(|c| !disk_names.contains(c.name.as_str()))
            .map(|c| c.name.clone())
            .collect();
        let mut removed = Vec::new();
        for name in missing {
            // Delete the KV tree first; if that fails the config stays in
            // memory and the removal is retried next cycle.
            match self
                .kv
                .delete_tree(&job_prefix(&self.config.cluster_name, &name))
                .await
            {
                Ok(_) => {
                    if let Some(pos) = state.configs.iter().position(|c| c.name == name) {
                        removed.push(state.configs.remove(pos));
                    }
                    tracing::info!(job = %name, "Job package removed, deleted KV tree");
                }
                Err(err) => {
                    tracing::warn!(job = %name, error = %err, "Failed to delete job KV tree");
                }
            }
        }

        drop(state);
        for config in joined {
            self.bus.emit(&ClusterEvent::JobConfigJoin(config));
        }
        for config in removed {
            self.bus.emit(&ClusterEvent::JobConfigRemove(config));
        }
        Ok(())
    }

    /// Worker pass: KV -> memory.
    pub async fn refresh_job_configs_from_kv(&self) -> Result<()> {
        let mut state = self.jobs.lock().await;

        // Fetch everything before touching memory, so a transport error
        // cannot turn into a spurious removal.
        let prefix = jobs_prefix(&self.config.cluster_name);
        let keys = self.kv.keys(&prefix).await?;
        let mut fetched: Vec<JobConfig> = Vec::new();
        for key in keys.iter().filter(|k| k.ends_with("/Config")) {
            let Some(pair) = self.kv.get(key).await? else {
                continue;
            };
            match JobConfig::from_pair(&pair) {
                Ok(config) => fetched.push(config),
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Skipping malformed job config value");
                }
            }
        }

        let mut joined = Vec::new();
        for fresh in &fetched {
            match state.configs.iter_mut().find(|c| c.name == fresh.name) {
                Some(existing) => {
                    if existing.modify_index != fresh.modify_index {
                        *existing = fresh.clone();
                        tracing::debug!(job = %fresh.name, "Job config updated from KV");
                    }
                }
                None => {
                    state.configs.push(fresh.clone());
                    joined.push(fresh.clone());
                }
            }
        }

        let fetched_names: HashSet<&str> = fetched.iter().map(|c| c.name.as_str()).collect();
        let mut removed = Vec::new();
        state.configs.retain(|c| {
            if fetched_names.contains(c.name.as_str()) {
                true
            } else {
                removed.push(c.clone());
                false
            }
        });

        drop(state);
        for config in joined {
            self.bus.emit(&ClusterEvent::JobConfigJoin(config));
        }
        for config in removed {
            self.bus.emit(&ClusterEvent::JobConfigRemove(config));
        }
        Ok(())
    }

    /// Publish a config at `Swift/<cluster>/Jobs/<name>/Config` via
    /// Create+CAS, adopting the committed modify index.
    pub(crate) async fn publish_job_config(&self, config: &mut JobConfig) -> Result<()> {
        let key = job_config_key(&self.config.cluster_name, &config.name);
        loop {
            let stored = self.kv.create(&key).await?;
            let pair = KvPair {
                key: key.clone(),
                value: config.to_wire()?,
                modify_index: stored.modify_index,
            };
            if self.kv.cas(&pair).await? {
                if let Some(fresh) = self.kv.get(&key).await? {
                    config.modify_index = fresh.modify_index;
                }
                tracing::info!(job = %config.name, "Published job config");
                return Ok(());
            }
            tracing::debug!(key = %key, "CAS conflict publishing job config, retrying");
            tokio::time::sleep(self.config.timings.cas_retry_backoff).await;
        }
    }
}
