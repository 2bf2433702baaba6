//! Cluster membership and job scheduling coordinated through a shared
//! consistent KV store.
//!
//! One member per cluster holds the Manager role and turns local job
//! packages into published configs, scheduled job records and task plans;
//! Workers mirror that state and discover the tasks assigned to them. All
//! coordination happens through compare-and-swap updates on KV keys under
//! `Swift/<cluster>/` and the KV's TTL health checks.

pub mod cluster;
pub mod config;
pub mod error;
pub mod job;
pub mod kv;
pub mod net;
pub mod shutdown;

pub use cluster::events::{ClusterEvent, EventBus, EventTopic, SubscriptionId};
pub use cluster::member::{Member, MemberRole, MemberStatus};
pub use cluster::Cluster;
pub use config::{ClusterConfig, ClusterTimings};
pub use error::{Result, SwiftError};
