//! CLI argument parsing for querylens

use crate::config::ProfilerConfig;
use crate::detector::DuplicateScope;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Output format for the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary table (default)
    Text,
    /// JSON report for machine parsing
    Json,
}

/// Unit of work used for duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    /// Count executions across the whole log
    Session,
    /// Count executions per recorded `unit_of_work` id
    UnitOfWork,
}

impl From<ScopeArg> for DuplicateScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Session => DuplicateScope::Session,
            ScopeArg::UnitOfWork => DuplicateScope::UnitOfWork,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "querylens")]
#[command(version)]
#[command(about = "Query profiler: replays recorded ORM query logs and reports N+1 patterns", long_about = None)]
pub struct Cli {
    /// JSON-lines query log to analyze
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// TOML profiler configuration
    #[arg(short, long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Unit of work for duplicate detection (required)
    #[arg(long = "scope", value_enum)]
    pub scope: ScopeArg,

    /// Override the duplicate threshold from the configuration
    #[arg(long = "duplicate-threshold", value_name = "N")]
    pub duplicate_threshold: Option<u64>,

    /// Override the slow query threshold (milliseconds)
    #[arg(long = "slow-threshold-ms", value_name = "MS")]
    pub slow_threshold_ms: Option<u64>,

    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, mut config: ProfilerConfig) -> ProfilerConfig {
        if let Some(threshold) = self.duplicate_threshold {
            config.duplicate_threshold = threshold;
        }
        if let Some(ms) = self.slow_threshold_ms {
            config.slow_query_threshold = Duration::from_millis(ms);
        }
        config
    }
}
