use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SwiftError};
use crate::kv::KvPair;

/// Lifecycle of one job run. Status advances are driven by task execution,
/// which happens outside this crate; `TaskMerged` is the terminal state that
/// unblocks the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRecordStatus {
    Pending,
    PlanMaking,
    PlanMade,
    TaskExecuting,
    TaskSyncing,
    TaskMerging,
    TaskMerged,
    Failed,
}

impl std::fmt::Display for JobRecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobRecordStatus::Pending => "Pending",
            JobRecordStatus::PlanMaking => "PlanMaking",
            JobRecordStatus::PlanMade => "PlanMade",
            JobRecordStatus::TaskExecuting => "TaskExecuting",
            JobRecordStatus::TaskSyncing => "TaskSyncing",
            JobRecordStatus::TaskMerging => "TaskMerging",
            JobRecordStatus::TaskMerged => "TaskMerged",
            JobRecordStatus::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaskExecState {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
}

/// Declarative description of a recurring job, published by the Manager at
/// `Swift/<cluster>/Jobs/<name>/Config` and mirrored on its local disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct JobConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Wall-clock minutes (`"HH:MM"`) at which a new run may start.
    #[serde(default)]
    pub run_time_plan: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_record_start_time: Option<DateTime<Utc>>,
    /// KV version of this config; 0 until published.
    #[serde(skip)]
    pub modify_index: u64,
}

impl JobConfig {
    /// Field-wise equality over everything that is serialized; the KV
    /// modify index is deliberately ignored.
    pub fn definition_eq(&self, other: &JobConfig) -> bool {
        self.name == other.name
            && self.file_name == other.file_name
            && self.version == other.version
            && self.run_time_plan == other.run_time_plan
            && self.last_record_id == other.last_record_id
            && self.last_record_start_time == other.last_record_start_time
    }
}

/// One run of a job: the task plan and its lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct JobRecord {
    pub id: String,
    pub job_name: String,
    pub status: JobRecordStatus,
    /// Member id -> ordered tasks that member must perform.
    #[serde(default)]
    pub task_plan: BTreeMap<String, Vec<JobTask>>,
    #[serde(skip)]
    pub modify_index: u64,
}

impl JobRecord {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            job_name: job_name.into(),
            status: JobRecordStatus::Pending,
            task_plan: BTreeMap::new(),
            modify_index: 0,
        }
    }

    /// A plan exists once the record has moved past the making stages.
    pub fn plan_ready(&self) -> bool {
        !matches!(
            self.status,
            JobRecordStatus::Pending | JobRecordStatus::PlanMaking
        )
    }

    /// Flatten the task plan, member by member.
    pub fn planned_tasks(&self) -> Vec<JobTask> {
        self.task_plan.values().flatten().cloned().collect()
    }
}

/// Shared handle to an active record. Subscribers may hold on to it; the
/// record reconciler updates fields through the handle, never by replacing it.
pub type SharedJobRecord = Arc<RwLock<JobRecord>>;

/// One unit of work inside a job record, assigned to a single member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct JobTask {
    pub id: String,
    pub record_id: String,
    pub member_id: String,
    #[serde(default)]
    pub state: TaskExecState,
}

impl JobTask {
    /// Identity used when diffing active task sets.
    pub fn key(&self) -> (&str, &str) {
        (self.record_id.as_str(), self.id.as_str())
    }
}

/// Wire envelope for job keys. The `kind` marker makes the value
/// self-describing so a reader never depends on the key path to pick a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobValue {
    Config(JobConfig),
    Record(JobRecord),
}

impl JobValue {
    pub fn decode(pair: &KvPair) -> Result<JobValue> {
        serde_json::from_str(&pair.value).map_err(|source| SwiftError::MalformedKvValue {
            key: pair.key.clone(),
            source,
        })
    }
}

impl JobConfig {
    /// Decode a Config value, adopting the pair's modify index.
    pub fn from_pair(pair: &KvPair) -> Result<JobConfig> {
        match JobValue::decode(pair)? {
            JobValue::Config(mut config) => {
                config.modify_index = pair.modify_index;
                Ok(config)
            }
            JobValue::Record(_) => Err(SwiftError::MalformedKvValue {
                key: pair.key.clone(),
                source: serde::de::Error::custom("expected kind Config, found Record"),
            }),
        }
    }

    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(&JobValue::Config(self.clone()))?)
    }
}

impl JobRecord {
    /// Decode a Record value, adopting the pair's modify index.
    pub fn from_pair(pair: &KvPair) -> Result<JobRecord> {
        match JobValue::decode(pair)? {
            JobValue::Record(mut record) => {
                record.modify_index = pair.modify_index;
                Ok(record)
            }
            JobValue::Config(_) => Err(SwiftError::MalformedKvValue {
                key: pair.key.clone(),
                source: serde::de::Error::custom("expected kind Record, found Config"),
            }),
        }
    }

    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(&JobValue::Record(self.clone()))?)
    }
}
