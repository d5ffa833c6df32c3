//! Error taxonomy for the profiler
//!
//! Only `Report`, `InvalidConfig`, `QueryLimitExceeded` and `Json` ever reach a
//! caller. `Capture` and `Resolution` are recovered on the capture path and
//! `Aggregation` degrades the session it occurred in.

use thiserror::Error;

/// Errors produced by the profiler
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Call-site resolution failed: {0}")]
    Resolution(String),

    #[error("Aggregation invariant violated for {key}: {reason}")]
    Aggregation { key: String, reason: String },

    #[error("Report build failed: {0}")]
    Report(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Query limit exceeded: {actual} queries completed, limit is {limit}")]
    QueryLimitExceeded { limit: u64, actual: u64 },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProfilerError>;
