//! Time-plan scheduler tests: the wall-clock match, the TaskMerged gate and
//! the roll-forward of `last_record_id` across KV, memory and disk.


use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use swift_cluster::job::{JobConfig, JobRecord, JobRecordStatus};
use swift_cluster::kv::{job_config_key, jobs_prefix, KvStore, MemoryKv};
use swift_cluster::{Cluster, MemberRole};
use test_harness::{put_record, test_config, test_job_config};

fn local_at(hour: u32, minute: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 5, 14, hour, minute, 10).unwrap()
}

fn write_disk_config(jobs_dir: &Path, config: &JobConfig) {
    let dir = jobs_dir.join(&config.name).join("config");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("job.json"),
        serde_json::to_string_pretty(config).unwrap(),
    )
    .unwrap();
}

fn read_disk_config(jobs_dir: &Path, name: &str) -> JobConfig {
    let raw = fs::read_to_string(jobs_dir.join(name).join("config/job.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

async fn record_keys(kv: &MemoryKv) -> Vec<String> {
    kv.keys(&jobs_prefix("c1"))
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.contains("/Records/"))
        .collect()
}

fn manager_over(
    kv: &Arc<MemoryKv>,
    jobs_dir: &Path,
) -> Arc<Cluster> {
    Cluster::new(
        test_config("c1", "10.0.0.1", MemberRole::Manager, jobs_dir),
        Arc::clone(kv) as Arc<dyn KvStore>,
    )
}

#[tokio::test]
async fn test_creates_record_on_time_match() {
    let jobs = tempfile::tempdir().unwrap();
    write_disk_config(jobs.path(), &test_job_config("j1", &["12:00"]));

    let kv = Arc::new(MemoryKv::new());
    let manager = manager_over(&kv, jobs.path());
    manager.refresh_job_configs_from_disk().await.unwrap();

    manager.schedule_due_jobs(local_at(12, 0)).await.unwrap();

    let records = record_keys(&kv).await;
    assert_eq!(records.len(), 1);
    let record = JobRecord::from_pair(&kv.get(&records[0]).await.unwrap().unwrap()).unwrap();
    assert_eq!(record.job_name, "j1");
    assert_eq!(record.status, JobRecordStatus::Pending);

    // The published config points at the new record, with a start time.
    let published =
        JobConfig::from_pair(&kv.get(&job_config_key("c1", "j1")).await.unwrap().unwrap())
            .unwrap();
    assert_eq!(published.last_record_id.as_deref(), Some(record.id.as_str()));
    assert!(published.last_record_start_time.is_some());

    // Memory and disk follow.
    let held = manager.job_configs().await;
    assert_eq!(held[0].last_record_id.as_deref(), Some(record.id.as_str()));
    let disk = read_disk_config(jobs.path(), "j1");
    assert_eq!(disk.last_record_id.as_deref(), Some(record.id.as_str()));
}

#[tokio::test]
async fn test_off_minute_creates_nothing() {
    let jobs = tempfile::tempdir().unwrap();
    write_disk_config(jobs.path(), &test_job_config("j1", &["12:00"]));

    let kv = Arc::new(MemoryKv::new());
    let manager = manager_over(&kv, jobs.path());
    manager.refresh_job_configs_from_disk().await.unwrap();

    manager.schedule_due_jobs(local_at(12, 1)).await.unwrap();
    manager.schedule_due_jobs(local_at(0, 0)).await.unwrap();

    assert!(record_keys(&kv).await.is_empty());
}

#[tokio::test]
async fn test_gate_blocks_until_previous_run_merged() {
    let jobs = tempfile::tempdir().unwrap();
    let mut disk = test_job_config("j1", &["12:00"]);
    disk.last_record_id = Some("r0".to_string());
    write_disk_config(jobs.path(), &disk);

    let kv = Arc::new(MemoryKv::new());
    let mut r0 = JobRecord::new("j1");
    r0.id = "r0".to_string();
    r0.status = JobRecordStatus::TaskExecuting;
    put_record(&kv, "c1", &r0).await;

    let manager = manager_over(&kv, jobs.path());
    manager.refresh_job_configs_from_disk().await.unwrap();

    // Previous run still executing: the matching minute must not fire.
    manager.schedule_due_jobs(local_at(12, 0)).await.unwrap();
    assert_eq!(record_keys(&kv).await.len(), 1);

    // Once merged, the next matching minute fires exactly once.
    r0.status = JobRecordStatus::TaskMerged;
    put_record(&kv, "c1", &r0).await;
    manager.schedule_due_jobs(local_at(12, 0)).await.unwrap();

    let records = record_keys(&kv).await;
    assert_eq!(records.len(), 2);
    let published =
        JobConfig::from_pair(&kv.get(&job_config_key("c1", "j1")).await.unwrap().unwrap())
            .unwrap();
    let new_id = published.last_record_id.unwrap();
    assert_ne!(new_id, "r0");
}

#[tokio::test]
async fn test_second_probe_in_same_minute_is_deduplicated() {
    let jobs = tempfile::tempdir().unwrap();
    write_disk_config(jobs.path(), &test_job_config("j1", &["12:00"]));

    let kv = Arc::new(MemoryKv::new());
    let manager = manager_over(&kv, jobs.path());
    manager.refresh_job_configs_from_disk().await.unwrap();

    // The 30s period probes a matching minute twice; the fresh record is
    // still Pending, so the second probe is gated off.
    manager.schedule_due_jobs(local_at(12, 0)).await.unwrap();
    manager.schedule_due_jobs(local_at(12, 0)).await.unwrap();

    assert_eq!(record_keys(&kv).await.len(), 1);
}

#[tokio::test]
async fn test_dangling_pointer_counts_as_complete() {
    let jobs = tempfile::tempdir().unwrap();
    let mut disk = test_job_config("j1", &["12:00"]);
    disk.last_record_id = Some("ghost".to_string());
    write_disk_config(jobs.path(), &disk);

    let kv = Arc::new(MemoryKv::new());
    let manager = manager_over(&kv, jobs.path());
    manager.refresh_job_configs_from_disk().await.unwrap();

    manager.schedule_due_jobs(local_at(12, 0)).await.unwrap();
    assert_eq!(record_keys(&kv).await.len(), 1);
}

#[tokio::test]
async fn test_multiple_plan_entries_fire_at_their_minute() {
    let jobs = tempfile::tempdir().unwrap();
    write_disk_config(jobs.path(), &test_job_config("j1", &["06:00", "18:00"]));

    let kv = Arc::new(MemoryKv::new());
    let manager = manager_over(&kv, jobs.path());
    manager.refresh_job_configs_from_disk().await.unwrap();

    manager.schedule_due_jobs(local_at(6, 0)).await.unwrap();
    assert_eq!(record_keys(&kv).await.len(), 1);

    // Evening run is still blocked on the morning record.
    manager.schedule_due_jobs(local_at(18, 0)).await.unwrap();
    assert_eq!(record_keys(&kv).await.len(), 1);

    // Merge the morning run; the evening minute fires.
    let published =
        JobConfig::from_pair(&kv.get(&job_config_key("c1", "j1")).await.unwrap().unwrap())
            .unwrap();
    let morning_id = published.last_record_id.unwrap();
    let mut morning = JobRecord::new("j1");
    morning.id = morning_id;
    morning.status = JobRecordStatus::TaskMerged;
    put_record(&kv, "c1", &morning).await;

    manager.schedule_due_jobs(local_at(18, 0)).await.unwrap();
    assert_eq!(record_keys(&kv).await.len(), 2);
}
