pub mod config_sync;
pub mod model;
pub mod package;
pub mod record_sync;
pub mod schedule;
pub mod task_sync;

pub use model::{
    JobConfig, JobRecord, JobRecordStatus, JobTask, JobValue, SharedJobRecord, TaskExecState,
};
pub use schedule::plan_matches;
