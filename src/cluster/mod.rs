//! Cluster coordination core.
//!
//! A [`Cluster`] is one process's view of the cluster: the in-memory mirror
//! of the KV state (members, job configs, active records and tasks), the
//! reconcile monitors that keep that mirror fresh, and the event bus that
//! reports the deltas. The KV store is the source of truth; everything here
//! converges towards it, one timer tick at a time.
//!
//! Monitors per role:
//! - all members: member reconcile, TTL heartbeat, record reconcile, task
//!   extraction
//! - Manager: job configs from local disk to KV, time-plan scheduling
//! - Worker: job configs from KV to memory

pub mod events;
pub mod heartbeat;
pub mod member;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Local;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::error::Result;
use crate::job::{JobConfig, JobTask, SharedJobRecord};
use crate::kv::KvStore;

use events::EventBus;
use member::{Member, MemberRole, MemberSet};

/// In-memory job state, guarded by the shared refresh lock so config
/// mutation, record sync, task extraction and scheduling never interleave.
#[derive(Default)]
pub(crate) struct JobState {
    pub configs: Vec<JobConfig>,
    /// Active records by record id.
    pub records: HashMap<String, SharedJobRecord>,
    pub tasks: Vec<JobTask>,
}

pub struct Cluster {
    pub(crate) config: ClusterConfig,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) bus: EventBus,
    pub(crate) members: RwLock<MemberSet>,
    /// Non-blocking re-entrancy guard for the member reconciler; health
    /// probes may take seconds and must not serialize against the job timers.
    pub(crate) member_refresh_busy: AtomicBool,
    pub(crate) jobs: Mutex<JobState>,
    /// Cancelled on [`Cluster::shutdown`]; parents every background task.
    pub(crate) lifecycle: CancellationToken,
    monitor: StdMutex<Option<CancellationToken>>,
}

impl Cluster {
    pub fn new(config: ClusterConfig, kv: Arc<dyn KvStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            kv,
            bus: EventBus::new(),
            members: RwLock::new(MemberSet::default()),
            member_refresh_busy: AtomicBool::new(false),
            jobs: Mutex::new(JobState::default()),
            lifecycle: CancellationToken::new(),
            monitor: StdMutex::new(None),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Join the cluster: register with the service registry, start the TTL
    /// heartbeat and put the local member into the members list.
    ///
    /// Fails with [`crate::error::SwiftError::ManagerTaken`] when this
    /// process wants the Manager role but a different online Manager exists;
    /// the caller decides whether to fall back to Worker.
    pub async fn init(self: &Arc<Self>) -> Result<Member> {
        self.register_service().await?;
        self.spawn_heartbeat();
        self.register().await
    }

    /// Ensure the local member appears in the members list with status
    /// online. Safe to call again after a fallback role change.
    pub async fn register(&self) -> Result<Member> {
        member::register_member(
            self.kv.as_ref(),
            &self.config.cluster_name,
            &self.config.member_id,
            self.config.role,
            &self.config.timings,
        )
        .await
    }

    /// Spawn the periodic reconcile monitors for this member's role.
    /// Idempotent until [`Cluster::stop_monitor`].
    pub fn start_monitor(self: &Arc<Self>) {
        let mut guard = self.monitor.lock().expect("monitor lock poisoned");
        if guard.is_some() {
            return;
        }
        let token = self.lifecycle.child_token();
        *guard = Some(token.clone());
        drop(guard);

        let timings = self.config.timings.clone();

        self.spawn_monitor(
            "members",
            token.clone(),
            timings.member_refresh_delay,
            timings.member_refresh_interval,
            |cluster| async move { cluster.refresh_members().await },
        );

        match self.config.role {
            MemberRole::Manager => {
                self.spawn_monitor(
                    "job-configs",
                    token.clone(),
                    timings.config_refresh_delay,
                    timings.config_refresh_interval,
                    |cluster| async move { cluster.refresh_job_configs_from_disk().await },
                );
                self.spawn_monitor(
                    "schedule",
                    token.clone(),
                    timings.schedule_delay,
                    timings.schedule_interval,
                    |cluster| async move { cluster.schedule_due_jobs(Local::now()).await },
                );
            }
            MemberRole::Worker => {
                self.spawn_monitor(
                    "job-configs",
                    token.clone(),
                    timings.config_refresh_delay,
                    timings.config_refresh_interval,
                    |cluster| async move { cluster.refresh_job_configs_from_kv().await },
                );
            }
        }

        self.spawn_monitor(
            "job-records",
            token.clone(),
            timings.record_refresh_delay,
            timings.record_refresh_interval,
            |cluster| async move { cluster.refresh_job_records().await },
        );
        self.spawn_monitor(
            "tasks",
            token,
            timings.task_refresh_delay,
            timings.task_refresh_interval,
            |cluster| async move { cluster.refresh_tasks().await },
        );

        tracing::info!(
            cluster = %self.config.cluster_name,
            member_id = %self.config.member_id,
            role = %self.config.role,
            "Cluster monitors started"
        );
    }

    /// Stop the reconcile monitors. In-flight passes run to completion; the
    /// TTL heartbeat keeps running until [`Cluster::shutdown`].
    pub fn stop_monitor(&self) {
        if let Some(token) = self.monitor.lock().expect("monitor lock poisoned").take() {
            token.cancel();
            tracing::info!(cluster = %self.config.cluster_name, "Cluster monitors stopped");
        }
    }

    /// Stop everything, heartbeat included.
    pub fn shutdown(&self) {
        self.stop_monitor();
        self.lifecycle.cancel();
    }

    fn spawn_monitor<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        token: CancellationToken,
        delay: Duration,
        period: Duration,
        pass: F,
    ) where
        F: Fn(Arc<Cluster>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cluster = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let mut ticker = tokio::time::interval(period);
            // Consume the immediate tick; the first pass runs right away.
            ticker.tick().await;
            loop {
                if let Err(err) = pass(Arc::clone(&cluster)).await {
                    tracing::warn!(monitor = name, error = %err, "Reconcile pass failed");
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
            }
            tracing::debug!(monitor = name, "Monitor stopped");
        });
    }

    /// Snapshot of the members list.
    pub async fn members(&self) -> Vec<Member> {
        self.members.read().await.members.clone()
    }

    pub async fn current_member(&self) -> Option<Member> {
        self.members.read().await.current.clone()
    }

    pub async fn manager(&self) -> Option<Member> {
        self.members.read().await.manager.clone()
    }

    pub async fn workers(&self) -> Vec<Member> {
        self.members.read().await.workers.clone()
    }

    pub async fn job_configs(&self) -> Vec<JobConfig> {
        self.jobs.lock().await.configs.clone()
    }

    pub async fn job_records(&self) -> Vec<SharedJobRecord> {
        self.jobs.lock().await.records.values().cloned().collect()
    }

    pub async fn tasks(&self) -> Vec<JobTask> {
        self.jobs.lock().await.tasks.clone()
    }

    /// Active tasks assigned to the local member, the view a Worker polls
    /// to discover work.
    pub async fn local_tasks(&self) -> Vec<JobTask> {
        self.jobs
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| t.member_id == self.config.member_id)
            .cloned()
            .collect()
    }
}
