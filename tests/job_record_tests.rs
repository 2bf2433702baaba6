//! JobRecord reconciler tests: join, in-place update, eviction on
//! roll-forward and stale-pointer cleanup.


use std::sync::Arc;

use swift_cluster::job::{JobRecord, JobRecordStatus};
use swift_cluster::kv::{job_record_key, KvStore, MemoryKv};
use swift_cluster::{Cluster, EventTopic, MemberRole};
use test_harness::{new_member, put_config, put_record, test_job_config, EventRecorder};

fn record_with_id(job: &str, id: &str, status: JobRecordStatus) -> JobRecord {
    let mut record = JobRecord::new(job);
    record.id = id.to_string();
    record.status = status;
    record
}

async fn seed_config_pointing_at(
    kv: &MemoryKv,
    worker: &Cluster,
    job: &str,
    record_id: &str,
) {
    let mut config = test_job_config(job, &["12:00"]);
    config.last_record_id = Some(record_id.to_string());
    put_config(kv, "c1", &config).await;
    worker.refresh_job_configs_from_kv().await.unwrap();
}

#[tokio::test]
async fn test_record_joins_memory() {
    let kv = Arc::new(MemoryKv::new());
    let worker = new_member(&kv, "c1", "10.0.0.2", MemberRole::Worker);
    let recorder = EventRecorder::attach(
        &worker,
        &[EventTopic::JobRecordJoin, EventTopic::JobRecordRemove],
    );

    put_record(&kv, "c1", &record_with_id("j1", "r1", JobRecordStatus::PlanMade)).await;
    seed_config_pointing_at(&kv, &worker, "j1", "r1").await;

    worker.refresh_job_records().await.unwrap();

    let records = worker.job_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].read().unwrap().id, "r1");
    assert_eq!(recorder.count("JobRecordJoin:r1"), 1);

    // Unchanged state stays quiet.
    worker.refresh_job_records().await.unwrap();
    assert_eq!(recorder.count("JobRecordJoin:r1"), 1);
}

#[tokio::test]
async fn test_record_updates_through_held_reference() {
    let kv = Arc::new(MemoryKv::new());
    let worker = new_member(&kv, "c1", "10.0.0.2", MemberRole::Worker);

    put_record(&kv, "c1", &record_with_id("j1", "r1", JobRecordStatus::PlanMade)).await;
    seed_config_pointing_at(&kv, &worker, "j1", "r1").await;
    worker.refresh_job_records().await.unwrap();

    // A subscriber keeps this handle across reconciles.
    let held = worker.job_records().await[0].clone();
    assert_eq!(held.read().unwrap().status, JobRecordStatus::PlanMade);
    let held_index = held.read().unwrap().modify_index;

    put_record(
        &kv,
        "c1",
        &record_with_id("j1", "r1", JobRecordStatus::TaskExecuting),
    )
    .await;
    worker.refresh_job_records().await.unwrap();

    // Same object, new fields.
    let now_held = worker.job_records().await[0].clone();
    assert!(Arc::ptr_eq(&held, &now_held));
    assert_eq!(held.read().unwrap().status, JobRecordStatus::TaskExecuting);
    assert!(held.read().unwrap().modify_index > held_index);
}

#[tokio::test]
async fn test_stale_record_evicted_on_roll_forward() {
    let kv = Arc::new(MemoryKv::new());
    let worker = new_member(&kv, "c1", "10.0.0.2", MemberRole::Worker);
    let recorder = EventRecorder::attach(
        &worker,
        &[EventTopic::JobRecordJoin, EventTopic::JobRecordRemove],
    );

    put_record(&kv, "c1", &record_with_id("j1", "r1", JobRecordStatus::TaskMerged)).await;
    put_record(&kv, "c1", &record_with_id("j1", "r2", JobRecordStatus::Pending)).await;
    seed_config_pointing_at(&kv, &worker, "j1", "r1").await;
    worker.refresh_job_records().await.unwrap();
    assert_eq!(recorder.count("JobRecordJoin:r1"), 1);

    // The Manager rolls the config forward to r2.
    seed_config_pointing_at(&kv, &worker, "j1", "r2").await;
    worker.refresh_job_records().await.unwrap();

    assert_eq!(recorder.count("JobRecordRemove:r1"), 1);
    assert_eq!(recorder.count("JobRecordJoin:r2"), 1);
    let records = worker.job_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].read().unwrap().id, "r2");
}

#[tokio::test]
async fn test_vanished_record_dropped() {
    let kv = Arc::new(MemoryKv::new());
    let worker = new_member(&kv, "c1", "10.0.0.2", MemberRole::Worker);
    let recorder = EventRecorder::attach(
        &worker,
        &[EventTopic::JobRecordJoin, EventTopic::JobRecordRemove],
    );

    put_record(&kv, "c1", &record_with_id("j1", "r1", JobRecordStatus::PlanMade)).await;
    seed_config_pointing_at(&kv, &worker, "j1", "r1").await;
    worker.refresh_job_records().await.unwrap();

    kv.delete_tree(&job_record_key("c1", "j1", "r1")).await.unwrap();
    worker.refresh_job_records().await.unwrap();

    assert_eq!(recorder.count("JobRecordRemove:r1"), 1);
    assert!(worker.job_records().await.is_empty());
}

#[tokio::test]
async fn test_cleared_pointer_evicts_record() {
    let kv = Arc::new(MemoryKv::new());
    let worker = new_member(&kv, "c1", "10.0.0.2", MemberRole::Worker);
    let recorder = EventRecorder::attach(
        &worker,
        &[EventTopic::JobRecordJoin, EventTopic::JobRecordRemove],
    );

    put_record(&kv, "c1", &record_with_id("j1", "r1", JobRecordStatus::PlanMade)).await;
    seed_config_pointing_at(&kv, &worker, "j1", "r1").await;
    worker.refresh_job_records().await.unwrap();

    // Config no longer names a record at all.
    put_config(&kv, "c1", &test_job_config("j1", &["12:00"])).await;
    worker.refresh_job_configs_from_kv().await.unwrap();
    worker.refresh_job_records().await.unwrap();

    assert_eq!(recorder.count("JobRecordRemove:r1"), 1);
    assert!(worker.job_records().await.is_empty());
}

#[tokio::test]
async fn test_malformed_record_value_skipped() {
    let kv = Arc::new(MemoryKv::new());
    let worker = new_member(&kv, "c1", "10.0.0.2", MemberRole::Worker);

    kv.put(&job_record_key("c1", "j1", "r1"), "oops").await;
    seed_config_pointing_at(&kv, &worker, "j1", "r1").await;

    worker.refresh_job_records().await.unwrap();
    assert!(worker.job_records().await.is_empty());
}
