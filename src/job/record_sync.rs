//! JobRecord reconciler.
//!
//! Each config names at most one active record through `last_record_id`;
//! memory mirrors exactly that record. Completed runs age out once the
//! Manager rolls `last_record_id` forward, and live records are updated
//! through their shared handle so subscribers holding a reference observe
//! the new fields.

use std::sync::{Arc, RwLock};

use crate::cluster::events::ClusterEvent;
use crate::cluster::Cluster;
use crate::error::Result;
use crate::job::{JobRecord, SharedJobRecord};
use crate::kv::job_record_key;

impl Cluster {
    pub async fn refresh_job_records(&self) -> Result<()> {
        let mut state = self.jobs.lock().await;

        let configs: Vec<(String, Option<String>)> = state
            .configs
            .iter()
            .map(|c| (c.name.clone(), c.last_record_id.clone()))
            .collect();

        let mut joined: Vec<SharedJobRecord> = Vec::new();
        let mut removed: Vec<SharedJobRecord> = Vec::new();

        // Age out records the configs no longer point at. No KV traffic
        // here, so the evictions and their events always land together.
        for (job_name, last_record_id) in &configs {
            let stale: Vec<String> = state
                .records
                .iter()
                .filter(|(id, record)| {
                    record.read().expect("record lock poisoned").job_name == *job_name
                        && last_record_id.as_deref() != Some(id.as_str())
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                if let Some(record) = state.records.remove(&id) {
                    removed.push(record);
                }
            }
        }

        for (job_name, last_record_id) in configs {
            let Some(record_id) = last_record_id else {
                continue;
            };

            let key = job_record_key(&self.config.cluster_name, &job_name, &record_id);
            let pair = match self.kv.get(&key).await {
                Ok(Some(pair)) => pair,
                Ok(None) => {
                    // Stale pointer: the named record no longer exists.
                    if let Some(record) = state.records.remove(&record_id) {
                        removed.push(record);
                    }
                    continue;
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Failed to read job record");
                    continue;
                }
            };

            match state.records.get(&record_id) {
                None => match JobRecord::from_pair(&pair) {
                    Ok(record) => {
                        let shared: SharedJobRecord = Arc::new(RwLock::new(record));
                        state.records.insert(record_id.clone(), Arc::clone(&shared));
                        joined.push(shared);
                    }
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "Skipping malformed job record value");
                    }
                },
                Some(existing) => {
                    let held_index = existing.read().expect("record lock poisoned").modify_index;
                    if held_index != pair.modify_index {
                        match JobRecord::from_pair(&pair) {
                            Ok(record) => {
                                // In place: subscribers keep their handle.
                                *existing.write().expect("record lock poisoned") = record;
                                tracing::debug!(record_id = %record_id, "Job record updated in place");
                            }
                            Err(err) => {
                                tracing::warn!(key = %key, error = %err, "Skipping malformed job record value");
                            }
                        }
                    }
                }
            }
        }

        drop(state);
        for record in joined {
            self.bus.emit(&ClusterEvent::JobRecordJoin(record));
        }
        for record in removed {
            self.bus.emit(&ClusterEvent::JobRecordRemove(record));
        }
        Ok(())
    }
}
