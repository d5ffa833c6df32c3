//! Duplicate / N+1 query detection
//!
//! Scans a [`SessionSnapshot`] for three patterns:
//!
//! - **DuplicateQuery**: the same statement shape issued more than
//!   `duplicate_threshold` times from one call site within one unit of work
//!   (the classic N+1: a loop issuing one lookup per parent row)
//! - **SlowQuery**: an entry whose slowest execution exceeded
//!   `slow_query_threshold`
//! - **ErrorRate**: an entry with failed executions
//!
//! Findings borrow the entries they reference, so they cannot outlive the
//! snapshot they were derived from. Detection is pure: the same snapshot
//! always yields the same findings in the same order.
//!
//! # Example
//!
//! ```
//! use querylens::detector::{Detector, DetectorThresholds, DuplicateScope};
//! use querylens::profiler::Profiler;
//! use querylens::config::ProfilerConfig;
//!
//! let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
//! let snapshot = profiler.start_session().finish();
//!
//! let detector = Detector::new(DetectorThresholds::default(), DuplicateScope::Session);
//! assert!(detector.detect(&snapshot).is_empty());
//! ```

use crate::aggregator::AggregateEntry;
use crate::callsite::CallSiteId;
use crate::config::ProfilerConfig;
use crate::event::duration_micros;
use crate::session::SessionSnapshot;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// What counts as "one unit of work" for duplicate detection
///
/// There is no default: the caller states which boundary applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateScope {
    /// The whole session is one unit of work
    Session,
    /// Each caller-supplied unit-of-work id is counted separately;
    /// executions without an id do not count
    UnitOfWork,
}

impl DuplicateScope {
    /// Execution count of `entry` under this scope
    pub fn count(&self, entry: &AggregateEntry) -> u64 {
        match self {
            DuplicateScope::Session => entry.count,
            DuplicateScope::UnitOfWork => entry.max_unit_count(),
        }
    }
}

impl fmt::Display for DuplicateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateScope::Session => write!(f, "session"),
            DuplicateScope::UnitOfWork => write!(f, "unit of work"),
        }
    }
}

/// Thresholds for finding detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorThresholds {
    /// Flag a shape issued more than this many times per unit of work
    /// Default: 5
    pub duplicate_threshold: u64,

    /// Flag an entry whose slowest execution took longer than this
    /// Default: 100ms
    pub slow_query_threshold: Duration,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            duplicate_threshold: 5,
            slow_query_threshold: Duration::from_millis(100),
        }
    }
}

impl From<&ProfilerConfig> for DetectorThresholds {
    fn from(config: &ProfilerConfig) -> Self {
        Self {
            duplicate_threshold: config.duplicate_threshold,
            slow_query_threshold: config.slow_query_threshold,
        }
    }
}

/// Severity level of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Minor optimization opportunity
    Low,
    /// Noticeable performance impact
    Medium,
    /// Significant bottleneck
    High,
    /// Dominates the unit of work
    Critical,
}

impl Severity {
    /// Band a measured value against its threshold
    ///
    /// More than 10x the threshold is critical, more than 5x high, more
    /// than 2x medium.
    fn from_ratio(metric: u64, threshold: u64) -> Self {
        let over = |factor: u64| metric > threshold.saturating_mul(factor);
        if over(10) {
            Severity::Critical
        } else if over(5) {
            Severity::High
        } else if over(2) {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn from_error_rate(rate: f64) -> Self {
        if rate >= 1.0 {
            Severity::Critical
        } else if rate >= 0.5 {
            Severity::High
        } else if rate >= 0.1 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a finding; the declaration order is the report order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    DuplicateQuery,
    SlowQuery,
    ErrorRate,
}

impl FindingKind {
    pub fn name(&self) -> &'static str {
        match self {
            FindingKind::DuplicateQuery => "Duplicate Query",
            FindingKind::SlowQuery => "Slow Query",
            FindingKind::ErrorRate => "Error Rate",
        }
    }
}

/// One detected pattern, borrowing the entries it refers to
#[derive(Debug, Clone, PartialEq)]
pub struct Finding<'a> {
    pub kind: FindingKind,
    pub severity: Severity,
    /// Referenced entries, most significant first
    pub entries: Vec<&'a AggregateEntry>,
    /// Scope the duplicate counts were measured in
    pub scope: DuplicateScope,
    /// Measured value that tripped the detector (count, microseconds, or
    /// failed executions depending on kind)
    pub metric: u64,
    /// Threshold the metric was compared against
    pub threshold: u64,
}

impl<'a> Finding<'a> {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Count of `entry` as measured for this finding
    pub fn entry_count(&self, entry: &AggregateEntry) -> u64 {
        match self.kind {
            FindingKind::DuplicateQuery => self.scope.count(entry),
            FindingKind::SlowQuery => entry.count,
            FindingKind::ErrorRate => entry.error_count,
        }
    }

    /// Human-readable description of what was observed
    pub fn description(&self) -> String {
        let Some(first) = self.entries.first() else {
            return format!("{} with no entries", self.name());
        };
        match self.kind {
            FindingKind::DuplicateQuery => {
                let per = match self.scope {
                    DuplicateScope::Session => "in this session",
                    DuplicateScope::UnitOfWork => "within a single unit of work",
                };
                if self.entries.len() == 1 {
                    format!(
                        "`{}` issued {} times {} from {} (threshold {})",
                        first.normalized_shape,
                        self.entry_count(first),
                        per,
                        first.call_site.label,
                        self.threshold
                    )
                } else {
                    format!(
                        "{} statement shapes each issued more than {} times {} from {} \
                         (worst: `{}`, {} times)",
                        self.entries.len(),
                        self.threshold,
                        per,
                        first.call_site.label,
                        first.normalized_shape,
                        self.entry_count(first)
                    )
                }
            }
            FindingKind::SlowQuery => format!(
                "`{}` from {} took up to {:.2}ms (threshold {:.2}ms, mean {:.2}ms over {} executions)",
                first.normalized_shape,
                first.call_site.label,
                self.metric as f64 / 1000.0,
                self.threshold as f64 / 1000.0,
                first.mean_duration().as_secs_f64() * 1000.0,
                first.count
            ),
            FindingKind::ErrorRate => {
                let last = first
                    .last_error
                    .as_ref()
                    .map(|e| format!("; last error {}: {}", e.kind, e.message))
                    .unwrap_or_default();
                format!(
                    "`{}` from {} failed {} of {} times ({:.1}%){}",
                    first.normalized_shape,
                    first.call_site.label,
                    first.error_count,
                    first.count,
                    first.error_rate() * 100.0,
                    last
                )
            }
        }
    }

    /// Actionable advice for this kind of finding
    pub fn recommendation(&self) -> &'static str {
        match self.kind {
            FindingKind::DuplicateQuery => {
                "Load the related rows in one statement (eager loading, a join, or a \
                 batched IN lookup) instead of one statement per parent row."
            }
            FindingKind::SlowQuery => {
                "Inspect the execution plan; consider an index on the filtered columns, \
                 narrowing the selected columns, or paginating the result."
            }
            FindingKind::ErrorRate => {
                "Check the last error; failing statements usually indicate a constraint \
                 violation, a schema mismatch, or a retry loop hiding a bug."
            }
        }
    }
}

/// Finding detector over session snapshots
#[derive(Debug, Clone)]
pub struct Detector {
    thresholds: DetectorThresholds,
    scope: DuplicateScope,
}

impl Detector {
    pub fn new(thresholds: DetectorThresholds, scope: DuplicateScope) -> Self {
        Self { thresholds, scope }
    }

    /// Detector using the thresholds of a profiler configuration
    pub fn from_config(config: &ProfilerConfig, scope: DuplicateScope) -> Self {
        Self::new(DetectorThresholds::from(config), scope)
    }

    pub fn thresholds(&self) -> &DetectorThresholds {
        &self.thresholds
    }

    pub fn scope(&self) -> DuplicateScope {
        self.scope
    }

    /// Analyze a snapshot
    ///
    /// Findings are ordered by kind, then by their most significant entry.
    pub fn detect<'a>(&self, snapshot: &'a SessionSnapshot) -> Vec<Finding<'a>> {
        let mut findings = self.detect_duplicates(snapshot);
        findings.extend(self.detect_slow(snapshot));
        findings.extend(self.detect_errors(snapshot));
        findings
    }

    fn detect_duplicates<'a>(&self, snapshot: &'a SessionSnapshot) -> Vec<Finding<'a>> {
        let threshold = self.thresholds.duplicate_threshold;
        let mut groups: BTreeMap<CallSiteId, Vec<&'a AggregateEntry>> = BTreeMap::new();
        for entry in snapshot.entries() {
            if self.scope.count(entry) > threshold {
                groups.entry(entry.call_site.id).or_default().push(entry);
            }
        }

        let mut findings: Vec<Finding<'a>> = groups
            .into_values()
            .map(|mut entries| {
                entries.sort_by(|a, b| self.entry_order(a, b));
                let metric = self.scope.count(entries[0]);
                Finding {
                    kind: FindingKind::DuplicateQuery,
                    severity: Severity::from_ratio(metric, threshold),
                    entries,
                    scope: self.scope,
                    metric,
                    threshold,
                }
            })
            .collect();
        findings.sort_by(|a, b| self.entry_order(a.entries[0], b.entries[0]));
        findings
    }

    fn detect_slow<'a>(&self, snapshot: &'a SessionSnapshot) -> Vec<Finding<'a>> {
        let threshold = self.thresholds.slow_query_threshold;
        let mut slow: Vec<&'a AggregateEntry> = snapshot
            .entries()
            .iter()
            .filter(|e| e.max_duration > threshold)
            .collect();
        slow.sort_by(|a, b| self.entry_order(a, b));

        let threshold_us = duration_micros(threshold);
        slow.into_iter()
            .map(|entry| {
                let metric = duration_micros(entry.max_duration);
                Finding {
                    kind: FindingKind::SlowQuery,
                    severity: Severity::from_ratio(metric, threshold_us),
                    entries: vec![entry],
                    scope: self.scope,
                    metric,
                    threshold: threshold_us,
                }
            })
            .collect()
    }

    fn detect_errors<'a>(&self, snapshot: &'a SessionSnapshot) -> Vec<Finding<'a>> {
        let mut failing: Vec<&'a AggregateEntry> = snapshot
            .entries()
            .iter()
            .filter(|e| e.error_count > 0)
            .collect();
        failing.sort_by(|a, b| self.entry_order(a, b));

        failing
            .into_iter()
            .map(|entry| Finding {
                kind: FindingKind::ErrorRate,
                severity: Severity::from_error_rate(entry.error_rate()),
                entries: vec![entry],
                scope: self.scope,
                metric: entry.error_count,
                threshold: 0,
            })
            .collect()
    }

    /// Count desc, total duration desc, label asc, shape asc
    fn entry_order(&self, a: &AggregateEntry, b: &AggregateEntry) -> Ordering {
        self.scope
            .count(b)
            .cmp(&self.scope.count(a))
            .then_with(|| b.total_duration.cmp(&a.total_duration))
            .then_with(|| a.call_site.label.cmp(&b.call_site.label))
            .then_with(|| a.normalized_shape.cmp(&b.normalized_shape))
            .then_with(|| a.call_site.id.cmp(&b.call_site.id))
    }
}
