//! Per-cluster event bus.
//!
//! Delta events emitted by the reconcilers: joins and removes for members,
//! job configs, job records and tasks. Dispatch is synchronous on the
//! reconciler task in subscription order, so subscribers must not block.
//! Each `Cluster` owns one bus; there is no process-wide registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::cluster::member::Member;
use crate::job::{JobConfig, JobTask, SharedJobRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    MemberJoin,
    MemberRemove,
    JobConfigJoin,
    JobConfigRemove,
    JobRecordJoin,
    JobRecordRemove,
    TaskJoin,
    TaskRemove,
}

#[derive(Debug, Clone)]
pub enum ClusterEvent {
    MemberJoin(Member),
    MemberRemove(Member),
    JobConfigJoin(JobConfig),
    JobConfigRemove(JobConfig),
    JobRecordJoin(SharedJobRecord),
    JobRecordRemove(SharedJobRecord),
    TaskJoin(JobTask),
    TaskRemove(JobTask),
}

impl ClusterEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            ClusterEvent::MemberJoin(_) => EventTopic::MemberJoin,
            ClusterEvent::MemberRemove(_) => EventTopic::MemberRemove,
            ClusterEvent::JobConfigJoin(_) => EventTopic::JobConfigJoin,
            ClusterEvent::JobConfigRemove(_) => EventTopic::JobConfigRemove,
            ClusterEvent::JobRecordJoin(_) => EventTopic::JobRecordJoin,
            ClusterEvent::JobRecordRemove(_) => EventTopic::JobRecordRemove,
            ClusterEvent::TaskJoin(_) => EventTopic::TaskJoin,
            ClusterEvent::TaskRemove(_) => EventTopic::TaskRemove,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ClusterEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventTopic, Vec<(SubscriptionId, Callback)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: EventTopic, callback: F) -> SubscriptionId
    where
        F: Fn(&ClusterEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .expect("event bus poisoned")
            .entry(topic)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns true when the subscription existed.
    pub fn unsubscribe(&self, topic: EventTopic, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().expect("event bus poisoned");
        match subscribers.get_mut(&topic) {
            Some(list) => {
                let before = list.len();
                list.retain(|(sid, _)| *sid != id);
                list.len() != before
            }
            None => false,
        }
    }

    /// Invoke every subscriber of the event's topic, in subscription order.
    pub fn emit(&self, event: &ClusterEvent) {
        // Snapshot the callbacks so a subscriber may (un)subscribe reentrantly.
        let callbacks: Vec<Callback> = {
            let subscribers = self.subscribers.read().expect("event bus poisoned");
            subscribers
                .get(&event.topic())
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(event);
        }
    }
}
