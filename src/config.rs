// Profiler configuration
//
// Loaded from TOML or built in code. All thresholds live here so the capture
// path, the detector and the CLI agree on a single source of truth.

use crate::error::ProfilerError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration for a profiler and the sessions it starts
///
/// # Example
/// ```
/// use querylens::config::ProfilerConfig;
///
/// let config = ProfilerConfig::default();
/// assert_eq!(config.duplicate_threshold, 5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Module-path prefixes skipped during call-site resolution
    ///
    /// Typically the ORM and driver crates, e.g. `["diesel::", "sqlx::"]`.
    /// The profiler's own frames and the Rust runtime are always skipped.
    pub exclusion_modules: Vec<String>,

    /// A statement issued more than this many times from one call site
    /// (within the detector's unit-of-work scope) is reported as a duplicate
    pub duplicate_threshold: u64,

    /// Executions slower than this are reported as slow queries
    #[serde(rename = "slow_query_threshold_ms", with = "millis")]
    pub slow_query_threshold: Duration,

    /// Number of most-recent parameter sets kept per aggregate entry
    pub sample_size: usize,

    /// Maximum number of frames inspected when resolving a call site
    pub max_stack_depth: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            exclusion_modules: Vec::new(),
            duplicate_threshold: 5,
            slow_query_threshold: Duration::from_millis(100),
            sample_size: 5,
            max_stack_depth: 64,
        }
    }
}

impl ProfilerConfig {
    /// Strict configuration for CI gates: flags smaller loops and faster queries
    pub fn strict() -> Self {
        Self {
            duplicate_threshold: 2,
            slow_query_threshold: Duration::from_millis(20),
            ..Self::default()
        }
    }

    /// Permissive configuration for noisy production-like workloads
    pub fn permissive() -> Self {
        Self {
            duplicate_threshold: 20,
            slow_query_threshold: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Builder-style helper to append ORM/driver prefixes to the exclusion set
    pub fn with_exclusions<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusion_modules
            .extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults. The result is validated.
    ///
    /// # Example TOML
    /// ```toml
    /// exclusion_modules = ["diesel::", "my_orm::"]
    /// duplicate_threshold = 3
    /// slow_query_threshold_ms = 250
    /// sample_size = 10
    /// max_stack_depth = 48
    /// ```
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read profiler config: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ProfilerConfig =
            toml::from_str(content).context("Failed to parse profiler config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ProfilerError> {
        if self.duplicate_threshold == 0 {
            return Err(ProfilerError::InvalidConfig(
                "duplicate_threshold must be >= 1".to_string(),
            ));
        }

        if self.max_stack_depth == 0 {
            return Err(ProfilerError::InvalidConfig(
                "max_stack_depth must be >= 1".to_string(),
            ));
        }

        if let Some(empty) = self.exclusion_modules.iter().position(|m| m.trim().is_empty()) {
            return Err(ProfilerError::InvalidConfig(format!(
                "exclusion_modules[{}] is empty and would exclude every frame",
                empty
            )));
        }

        Ok(())
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
