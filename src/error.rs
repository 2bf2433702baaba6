use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwiftError {
    #[error("KV store unavailable: {0}")]
    KvUnavailable(String),

    #[error("CAS conflict on key {0}")]
    CasConflict(String),

    #[error("another manager is already online: {0}")]
    ManagerTaken(String),

    #[error("failed to extract config from job package {package}: {reason}")]
    JobPackageConfigExtract { package: String, reason: String },

    #[error("malformed KV value at {key}: {source}")]
    MalformedKvValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("health probe failed for {0}")]
    HealthProbeFailed(String),

    #[error("no usable local address found")]
    NoLocalAddress,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwiftError>;
