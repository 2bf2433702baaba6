use std::collections::HashSet;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::events::ClusterEvent;
use crate::cluster::Cluster;
use crate::config::ClusterTimings;
use crate::error::{Result, SwiftError};
use crate::kv::{members_key, KvPair, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    Manager,
    Worker,
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRole::Manager => write!(f, "Manager"),
            MemberRole::Worker => write!(f, "Worker"),
        }
    }
}

/// Serialized as 1 (online) / 0 (offline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MemberStatus {
    Offline,
    Online,
}

impl From<MemberStatus> for u8 {
    fn from(status: MemberStatus) -> u8 {
        match status {
            MemberStatus::Offline => 0,
            MemberStatus::Online => 1,
        }
    }
}

impl TryFrom<u8> for MemberStatus {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(MemberStatus::Offline),
            1 => Ok(MemberStatus::Online),
            other => Err(format!("invalid member status {other}")),
        }
    }
}

/// A participant process, identified by its stable network id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Member {
    pub id: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub first_register_time: DateTime<Utc>,
    pub online_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_time: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(id: impl Into<String>, role: MemberRole) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role,
            status: MemberStatus::Online,
            first_register_time: now,
            online_time: now,
            offline_time: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == MemberStatus::Online
    }

    pub fn is_manager(&self) -> bool {
        self.role == MemberRole::Manager
    }
}

/// In-memory view of the members list plus the derived lookups the rest of
/// the cluster reads.
#[derive(Debug, Default)]
pub struct MemberSet {
    pub members: Vec<Member>,
    pub current: Option<Member>,
    pub manager: Option<Member>,
    pub workers: Vec<Member>,
}

pub(crate) fn decode_members(pair: &KvPair) -> Result<Vec<Member>> {
    if pair.value.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&pair.value).map_err(|source| SwiftError::MalformedKvValue {
        key: pair.key.clone(),
        source,
    })
}

/// Put `member_id` into the members list with status online.
///
/// Fails with [`SwiftError::ManagerTaken`] when registering as Manager while
/// a different online Manager exists. The CAS loop retries indefinitely;
/// transport errors abort the attempt, and the whole attempt is retried up
/// to three times.
pub(crate) async fn register_member(
    kv: &dyn KvStore,
    cluster_name: &str,
    member_id: &str,
    role: MemberRole,
    timings: &ClusterTimings,
) -> Result<Member> {
    let mut attempt = 1;
    loop {
        match try_register(kv, cluster_name, member_id, role, timings).await {
            Ok(member) => return Ok(member),
            Err(err @ SwiftError::ManagerTaken(_)) => return Err(err),
            Err(err) => {
                if attempt >= 3 {
                    return Err(err);
                }
                tracing::warn!(member_id, attempt, error = %err, "Member registration failed, retrying");
                attempt += 1;
                tokio::time::sleep(timings.register_retry_backoff).await;
            }
        }
    }
}

async fn try_register(
    kv: &dyn KvStore,
    cluster_name: &str,
    member_id: &str,
    role: MemberRole,
    timings: &ClusterTimings,
) -> Result<Member> {
    let key = members_key(cluster_name);
    loop {
        let stored = kv.create(&key).await?;
        let mut members = decode_members(&stored)?;

        if role == MemberRole::Manager {
            if let Some(other) = members
                .iter()
                .find(|m| m.is_manager() && m.is_online() && m.id != member_id)
            {
                return Err(SwiftError::ManagerTaken(other.id.clone()));
            }
        }

        let now = Utc::now();
        let member = match members.iter_mut().find(|m| m.id == member_id) {
            Some(existing) => {
                existing.status = MemberStatus::Online;
                existing.role = role;
                existing.online_time = now;
                existing.offline_time = None;
                existing.clone()
            }
            None => {
                let member = Member::new(member_id, role);
                members.push(member.clone());
                member
            }
        };

        let pair = KvPair {
            key: key.clone(),
            value: serde_json::to_string(&members)?,
            modify_index: stored.modify_index,
        };
        if kv.cas(&pair).await? {
            tracing::info!(member_id, role = %role, "Member registered");
            return Ok(member);
        }
        tokio::time::sleep(timings.cas_retry_backoff).await;
    }
}

impl Cluster {
    /// Reconcile the members list: probe health, stamp offline transitions,
    /// prune long-offline members, then sync the in-memory view and emit
    /// join/remove events.
    ///
    /// Guarded by a non-blocking flag instead of the shared refresh lock so
    /// slow health probes never stall the job reconcilers; an overlapping
    /// tick returns immediately.
    ///
    /// The member monitor runs this every tick; call it directly to force a
    /// refresh between ticks.
    pub async fn refresh_members(&self) -> Result<()> {
        if self.member_refresh_busy.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.refresh_members_inner().await;
        self.member_refresh_busy.store(false, Ordering::SeqCst);
        result
    }

    async fn refresh_members_inner(&self) -> Result<()> {
        let key = members_key(&self.config.cluster_name);
        let prune_after = self.config.timings.offline_prune_after;

        let stored_members = loop {
            let stored = self.kv.create(&key).await?;
            let mut members = decode_members(&stored)?;
            let mut dirty = false;
            let now = Utc::now();

            for member in members.iter_mut() {
                let healthy = match self.kv.check_health(&member.id).await {
                    Ok(healthy) => healthy,
                    Err(err) => {
                        tracing::warn!(member_id = %member.id, error = %err, "Health probe failed");
                        continue;
                    }
                };
                if healthy {
                    if member.status != MemberStatus::Online {
                        member.status = MemberStatus::Online;
                        dirty = true;
                    }
                    if member.offline_time.take().is_some() {
                        dirty = true;
                    }
                } else {
                    if member.status != MemberStatus::Offline {
                        member.status = MemberStatus::Offline;
                        dirty = true;
                    }
                    if member.offline_time.is_none() {
                        member.offline_time = Some(now);
                        dirty = true;
                    }
                }
            }

            let before = members.len();
            members.retain(|m| {
                let expired = m.status == MemberStatus::Offline
                    && m.offline_time.is_some_and(|t| {
                        now.signed_duration_since(t)
                            .to_std()
                            .is_ok_and(|d| d > prune_after)
                    });
                if expired {
                    tracing::info!(member_id = %m.id, "Pruning long-offline member");
                }
                !expired
            });
            if members.len() != before {
                dirty = true;
            }

            if dirty {
                let pair = KvPair {
                    key: key.clone(),
                    value: serde_json::to_string(&members)?,
                    modify_index: stored.modify_index,
                };
                if !self.kv.cas(&pair).await? {
                    tokio::time::sleep(self.config.timings.cas_retry_backoff).await;
                    continue;
                }
            }
            break members;
        };

        let mut events = Vec::new();
        {
            let mut set = self.members.write().await;

            for stored in &stored_members {
                match set.members.iter_mut().find(|m| m.id == stored.id) {
                    Some(existing) => {
                        existing.role = stored.role;
                        existing.status = stored.status;
                        existing.first_register_time = stored.first_register_time;
                        existing.online_time = stored.online_time;
                        existing.offline_time = stored.offline_time;
                    }
                    None => {
                        set.members.push(stored.clone());
                        events.push(ClusterEvent::MemberJoin(stored.clone()));
                    }
                }
            }

            let stored_ids: HashSet<&str> = stored_members.iter().map(|m| m.id.as_str()).collect();
            let mut removed = Vec::new();
            set.members.retain(|m| {
                if stored_ids.contains(m.id.as_str()) {
                    true
                } else {
                    removed.push(m.clone());
                    false
                }
            });
            events.extend(removed.into_iter().map(ClusterEvent::MemberRemove));

            set.current = set
                .members
                .iter()
                .find(|m| m.id == self.config.member_id)
                .cloned();
            set.manager = set.members.iter().find(|m| m.is_manager()).cloned();
            set.workers = set
                .members
                .iter()
                .filter(|m| !m.is_manager())
                .cloned()
                .collect();
        }

        for event in &events {
            self.bus.emit(event);
        }
        Ok(())
    }
}
