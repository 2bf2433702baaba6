//! TaskPlan extractor.
//!
//! Once a record's plan is made, every `(record, task, member)` triple in it
//! becomes an active task. The pass re-reads each active record from the KV
//! so a freshly made plan is picked up without waiting for the record
//! reconciler, then diffs against the in-memory task set by
//! (record id, task id).

use std::collections::HashSet;

use crate::cluster::events::ClusterEvent;
use crate::cluster::Cluster;
use crate::error::Result;
use crate::job::{JobRecord, JobTask};
use crate::kv::job_record_key;

impl Cluster {
    pub async fn refresh_tasks(&self) -> Result<()> {
        let mut state = self.jobs.lock().await;

        let active: Vec<(String, String)> = state
            .records
            .values()
            .map(|record| {
                let record = record.read().expect("record lock poisoned");
                (record.job_name.clone(), record.id.clone())
            })
            .collect();

        let mut latest: Vec<JobTask> = Vec::new();
        for (job_name, record_id) in active {
            let key = job_record_key(&self.config.cluster_name, &job_name, &record_id);
            let Some(pair) = self.kv.get(&key).await? else {
                continue;
            };
            let record = match JobRecord::from_pair(&pair) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Skipping malformed job record value");
                    continue;
                }
            };
            if !record.plan_ready() {
                continue;
            }
            latest.extend(record.planned_tasks());
        }

        let current_keys: HashSet<(String, String)> = state
            .tasks
            .iter()
            .map(|t| (t.record_id.clone(), t.id.clone()))
            .collect();
        let latest_keys: HashSet<(String, String)> = latest
            .iter()
            .map(|t| (t.record_id.clone(), t.id.clone()))
            .collect();

        let mut joined = Vec::new();
        for task in latest {
            if !current_keys.contains(&(task.record_id.clone(), task.id.clone())) {
                state.tasks.push(task.clone());
                joined.push(task);
            }
        }

        let mut removed = Vec::new();
        state.tasks.retain(|task| {
            if latest_keys.contains(&(task.record_id.clone(), task.id.clone())) {
                true
            } else {
                removed.push(task.clone());
                false
            }
        });

        drop(state);
        for task in joined {
            self.bus.emit(&ClusterEvent::TaskJoin(task));
        }
        for task in removed {
            self.bus.emit(&ClusterEvent::TaskRemove(task));
        }
        Ok(())
    }
}
