use std::path::PathBuf;
use std::time::Duration;

use crate::cluster::member::MemberRole;

/// Configuration for one cluster member process.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Cluster name; all KV keys live under `Swift/<name>/`.
    pub cluster_name: String,
    /// Stable network identity of this process, typically its IPv4 address.
    pub member_id: String,
    pub role: MemberRole,
    /// Directory holding job packages (`<jobs_dir>/<pkg>.zip` and
    /// `<jobs_dir>/<pkg>/config/job.json`). Only read by the Manager.
    pub jobs_dir: PathBuf,
    pub timings: ClusterTimings,
}

impl ClusterConfig {
    pub fn new(cluster_name: impl Into<String>, member_id: impl Into<String>, role: MemberRole) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            member_id: member_id.into(),
            role,
            jobs_dir: PathBuf::from("Jobs"),
            timings: ClusterTimings::default(),
        }
    }

    pub fn with_jobs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.jobs_dir = dir.into();
        self
    }

    pub fn with_timings(mut self, timings: ClusterTimings) -> Self {
        self.timings = timings;
        self
    }
}

/// Timer delays and periods for every reconcile loop.
///
/// Defaults match production cadence; tests shrink them to keep the suite fast.
#[derive(Debug, Clone)]
pub struct ClusterTimings {
    pub member_refresh_delay: Duration,
    pub member_refresh_interval: Duration,
    pub heartbeat_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub config_refresh_delay: Duration,
    pub config_refresh_interval: Duration,
    pub record_refresh_delay: Duration,
    pub record_refresh_interval: Duration,
    pub task_refresh_delay: Duration,
    pub task_refresh_interval: Duration,
    pub schedule_delay: Duration,
    pub schedule_interval: Duration,
    /// A member continuously offline for longer than this is removed
    /// from the members list on the next reconcile.
    pub offline_prune_after: Duration,
    /// Backoff between CAS retries inside a single operation.
    pub cas_retry_backoff: Duration,
    /// Backoff between whole registration attempts after transport errors.
    pub register_retry_backoff: Duration,
}

impl Default for ClusterTimings {
    fn default() -> Self {
        Self {
            member_refresh_delay: Duration::from_secs(3),
            member_refresh_interval: Duration::from_secs(5),
            heartbeat_ttl: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(10),
            config_refresh_delay: Duration::from_secs(5),
            config_refresh_interval: Duration::from_secs(30),
            record_refresh_delay: Duration::from_secs(30),
            record_refresh_interval: Duration::from_secs(10),
            task_refresh_delay: Duration::from_secs(40),
            task_refresh_interval: Duration::from_secs(10),
            schedule_delay: Duration::from_secs(10),
            schedule_interval: Duration::from_secs(30),
            offline_prune_after: Duration::from_secs(3 * 60 * 60),
            cas_retry_backoff: Duration::from_secs(1),
            register_retry_backoff: Duration::from_secs(2),
        }
    }
}
