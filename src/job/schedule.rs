//! Time-plan scheduler, run by the Manager only.
//!
//! A config's `run_time_plan` lists the wall-clock minutes (`"HH:MM"`) at
//! which a new run may start. A new record is created only when the previous
//! one has reached `TaskMerged`; rolling `last_record_id` forward inside the
//! same locked pass is what keeps the 30 s probe from creating a second
//! record in the same minute.

use chrono::{DateTime, Local, Utc};

use crate::cluster::Cluster;
use crate::error::Result;
use crate::job::{package, JobConfig, JobRecord, JobRecordStatus};
use crate::kv::{job_config_key, job_record_key, KvPair};

/// Does any entry of the plan name the current wall-clock minute?
pub fn plan_matches(run_time_plan: &[String], now: DateTime<Local>) -> bool {
    let minute = now.format("%H:%M").to_string();
    run_time_plan.iter().any(|entry| entry.trim() == minute)
}

impl Cluster {
    /// One scheduler pass at the given wall-clock instant.
    ///
    /// The instant is a parameter so the gate is testable; the monitor
    /// passes `Local::now()`.
    pub async fn schedule_due_jobs(&self, now: DateTime<Local>) -> Result<()> {
        let mut state = self.jobs.lock().await;

        let names: Vec<String> = state.configs.iter().map(|c| c.name.clone()).collect();
        for name in names {
            let Some((plan, last_record_id)) = state
                .configs
                .iter()
                .find(|c| c.name == name)
                .map(|c| (c.run_time_plan.clone(), c.last_record_id.clone()))
            else {
                continue;
            };

            // The previous run must be merged before a new one may start.
            // A dangling id counts as complete: the record is already gone.
            if let Some(last_id) = &last_record_id {
                let key = job_record_key(&self.config.cluster_name, &name, last_id);
                if let Some(pair) = self.kv.get(&key).await? {
                    match JobRecord::from_pair(&pair) {
                        Ok(record) if record.status != JobRecordStatus::TaskMerged => continue,
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(key = %key, error = %err, "Skipping malformed job record value");
                            continue;
                        }
                    }
                }
            }

            if !plan_matches(&plan, now) {
                continue;
            }

            let record = JobRecord::new(&name);
            self.publish_job_record(&record).await?;

            let Some(updated) = self.roll_config_forward(&name, &record.id).await? else {
                continue;
            };
            if let Some(entry) = state.configs.iter_mut().find(|c| c.name == name) {
                *entry = updated.clone();
            }
            if let Err(err) = package::write_disk_config(&self.config.jobs_dir, &updated) {
                tracing::warn!(job = %name, error = %err, "Failed to write job config back to disk");
            }
            tracing::info!(job = %name, record_id = %record.id, "Created job record from time plan");
        }
        Ok(())
    }

    async fn publish_job_record(&self, record: &JobRecord) -> Result<()> {
        let key = job_record_key(&self.config.cluster_name, &record.job_name, &record.id);
        loop {
            let stored = self.kv.create(&key).await?;
            let pair = KvPair {
                key: key.clone(),
                value: record.to_wire()?,
                modify_index: stored.modify_index,
            };
            if self.kv.cas(&pair).await? {
                return Ok(());
            }
            tracing::debug!(key = %key, "CAS conflict publishing job record, retrying");
            tokio::time::sleep(self.config.timings.cas_retry_backoff).await;
        }
    }

    /// Point the published config at the new record and stamp the start time.
    async fn roll_config_forward(
        &self,
        job_name: &str,
        record_id: &str,
    ) -> Result<Option<JobConfig>> {
        let key = job_config_key(&self.config.cluster_name, job_name);
        loop {
            let Some(stored) = self.kv.get(&key).await? else {
                tracing::warn!(job = %job_name, "Job config vanished while scheduling");
                return Ok(None);
            };
            let mut config = match JobConfig::from_pair(&stored) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Skipping malformed job config value");
                    return Ok(None);
                }
            };
            config.last_record_id = Some(record_id.to_string());
            config.last_record_start_time = Some(Utc::now());

            let pair = KvPair {
                key: key.clone(),
                value: config.to_wire()?,
                modify_index: stored.modify_index,
            };
            if self.kv.cas(&pair).await? {
                if let Some(fresh) = self.kv.get(&key).await? {
                    config.modify_index = fresh.modify_index;
                }
                return Ok(Some(config));
            }
            tracing::debug!(key = %key, "CAS conflict rolling job config forward, retrying");
            tokio::time::sleep(self.config.timings.cas_retry_backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 14, hour, minute, 30).unwrap()
    }

    #[test]
    fn test_plan_matches_exact_minute() {
        let plan = vec!["12:00".to_string(), "18:30".to_string()];
        assert!(plan_matches(&plan, at(12, 0)));
        assert!(plan_matches(&plan, at(18, 30)));
        assert!(!plan_matches(&plan, at(12, 1)));
        assert!(!plan_matches(&plan, at(0, 0)));
    }

    #[test]
    fn test_plan_matches_trims_whitespace() {
        let plan = vec![" 07:05 ".to_string()];
        assert!(plan_matches(&plan, at(7, 5)));
    }

    #[test]
    fn test_empty_plan_never_matches() {
        assert!(!plan_matches(&[], at(12, 0)));
    }
}
