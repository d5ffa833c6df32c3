//! Structured profiling reports
//!
//! [`ReportBuilder::build`] turns a frozen session snapshot and the findings
//! derived from it into a [`Report`]: an owned, serde-serializable document
//! with stable snake_case field names. Durations are reported in whole
//! microseconds.

use crate::aggregator::AggregateEntry;
use crate::callsite::CallSiteId;
use crate::detector::{Finding, FindingKind, Severity};
use crate::error::{ProfilerError, Result};
use crate::event::{duration_micros, unix_micros, ErrorInfo, Parameters};
use crate::session::SessionSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Version of the report layout, bumped on incompatible changes
pub const REPORT_FORMAT_VERSION: &str = "1";

/// Profiling report for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub format_version: String,
    pub session_id: String,
    pub started_at_unix_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at_unix_us: Option<u64>,
    pub degraded: bool,
    pub summary: ReportSummary,
    /// Sorted by total duration, most expensive first
    pub entries: Vec<ReportEntry>,
    pub findings: Vec<ReportFinding>,
}

/// Session-wide totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_queries: u64,
    pub total_errors: u64,
    pub total_duration_us: u64,
    pub distinct_call_sites: usize,
    pub distinct_statements: usize,
    pub dropped_events: u64,
}

/// One aggregate entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub call_site_id: CallSiteId,
    pub call_site: String,
    pub normalized_shape: String,
    pub example_statement: String,
    pub count: u64,
    pub error_count: u64,
    pub total_duration_us: u64,
    pub mean_duration_us: u64,
    pub min_duration_us: u64,
    pub max_duration_us: u64,
    pub sample_parameters: Vec<Parameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,
}

/// One detector finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFinding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    pub entries: Vec<FindingEntryRef>,
}

/// Reference from a finding to the entry it concerns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingEntryRef {
    pub call_site_id: CallSiteId,
    pub call_site: String,
    pub normalized_shape: String,
    /// Count as measured by the finding (scoped count for duplicates)
    pub count: u64,
}

impl ReportEntry {
    fn from_entry(entry: &AggregateEntry) -> Result<Self> {
        let key = entry.key();
        if entry.count == 0 {
            return Err(ProfilerError::Report(format!("entry {} has zero executions", key)));
        }
        if entry.min_duration > entry.max_duration {
            return Err(ProfilerError::Report(format!(
                "entry {} has min duration {:?} above max {:?}",
                key, entry.min_duration, entry.max_duration
            )));
        }
        if entry.total_duration < entry.max_duration {
            return Err(ProfilerError::Report(format!(
                "entry {} has total duration {:?} below max {:?}",
                key, entry.total_duration, entry.max_duration
            )));
        }

        Ok(Self {
            call_site_id: entry.call_site.id,
            call_site: entry.call_site.label.clone(),
            normalized_shape: entry.normalized_shape.clone(),
            example_statement: entry.example_statement.clone(),
            count: entry.count,
            error_count: entry.error_count,
            total_duration_us: duration_micros(entry.total_duration),
            mean_duration_us: duration_micros(entry.mean_duration()),
            min_duration_us: duration_micros(entry.min_duration),
            max_duration_us: duration_micros(entry.max_duration),
            sample_parameters: entry.sample_parameters.iter().cloned().collect(),
            last_error: entry.last_error.clone(),
        })
    }
}

/// Builds reports from snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportBuilder;

impl ReportBuilder {
    /// Build a report
    ///
    /// Fails with [`ProfilerError::Report`] when an entry is malformed or a
    /// finding references an entry that does not belong to `snapshot`.
    pub fn build(snapshot: &SessionSnapshot, findings: &[Finding<'_>]) -> Result<Report> {
        let mut entries = snapshot
            .entries()
            .iter()
            .map(ReportEntry::from_entry)
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| {
            b.total_duration_us
                .cmp(&a.total_duration_us)
                .then_with(|| b.count.cmp(&a.count))
                .then_with(|| a.call_site.cmp(&b.call_site))
                .then_with(|| a.normalized_shape.cmp(&b.normalized_shape))
        });

        let findings = findings
            .iter()
            .map(|finding| Self::build_finding(snapshot, finding))
            .collect::<Result<Vec<_>>>()?;

        Ok(Report {
            format_version: REPORT_FORMAT_VERSION.to_string(),
            session_id: snapshot.id().to_string(),
            started_at_unix_us: unix_micros(snapshot.started_at()),
            ended_at_unix_us: snapshot.ended_at().map(unix_micros),
            degraded: snapshot.is_degraded(),
            summary: ReportSummary {
                total_queries: snapshot.total_queries(),
                total_errors: snapshot.total_errors(),
                total_duration_us: duration_micros(snapshot.total_duration()),
                distinct_call_sites: snapshot.distinct_call_sites(),
                distinct_statements: snapshot.distinct_statements(),
                dropped_events: snapshot.dropped_events(),
            },
            entries,
            findings,
        })
    }

    fn build_finding(snapshot: &SessionSnapshot, finding: &Finding<'_>) -> Result<ReportFinding> {
        let entries = finding
            .entries
            .iter()
            .map(|&entry| {
                let owned = snapshot
                    .entries()
                    .iter()
                    .any(|candidate| std::ptr::eq(candidate, entry));
                if !owned {
                    return Err(ProfilerError::Report(format!(
                        "{} finding references entry {} from another snapshot",
                        finding.name(),
                        entry.key()
                    )));
                }
                Ok(FindingEntryRef {
                    call_site_id: entry.call_site.id,
                    call_site: entry.call_site.label.clone(),
                    normalized_shape: entry.normalized_shape.clone(),
                    count: finding.entry_count(entry),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ReportFinding {
            kind: finding.kind,
            severity: finding.severity,
            description: finding.description(),
            recommendation: finding.recommendation().to_string(),
            entries,
        })
    }
}

impl Report {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    /// Human-readable summary table followed by the findings list
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "╔════════════════════════════════════════════════════════════════════════════════╗");
        let _ = writeln!(out, "║  Query Profile Summary (sorted by total time)                                  ║");
        let _ = writeln!(out, "╚════════════════════════════════════════════════════════════════════════════════╝");
        let _ = writeln!(out, "Session:  {}", self.session_id);
        let _ = writeln!(
            out,
            "Queries:  {} ({} errors, {} dropped) in {:.3}ms",
            self.summary.total_queries,
            self.summary.total_errors,
            self.summary.dropped_events,
            self.summary.total_duration_us as f64 / 1000.0
        );
        let _ = writeln!(
            out,
            "Distinct: {} call sites, {} statements",
            self.summary.distinct_call_sites, self.summary.distinct_statements
        );
        if self.degraded {
            let _ = writeln!(out, "WARNING: session degraded, some events were not aggregated");
        }
        let _ = writeln!(out);

        if self.entries.is_empty() {
            let _ = writeln!(out, "No queries recorded.");
        } else {
            let _ = writeln!(
                out,
                "{:>8} {:>8} {:>12} {:>12}  {}",
                "Calls", "Errors", "Total (ms)", "Mean (ms)", "Statement"
            );
            let _ = writeln!(out, "{}", "─".repeat(82));
            for entry in &self.entries {
                let _ = writeln!(
                    out,
                    "{:>8} {:>8} {:>12.3} {:>12.3}  {}",
                    entry.count,
                    entry.error_count,
                    entry.total_duration_us as f64 / 1000.0,
                    entry.mean_duration_us as f64 / 1000.0,
                    entry.normalized_shape
                );
                let _ = writeln!(out, "{:>44}  at {}", "", entry.call_site);
            }
        }

        let _ = writeln!(out);
        if self.findings.is_empty() {
            let _ = writeln!(out, "No findings.");
        } else {
            let _ = writeln!(out, "Findings ({}):", self.findings.len());
            for (i, finding) in self.findings.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. [{}] {}: {}",
                    i + 1,
                    finding.severity,
                    finding.kind.name(),
                    finding.description
                );
                let _ = writeln!(out, "     → {}", finding.recommendation);
            }
        }
        out
    }
}
