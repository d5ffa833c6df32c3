//! Replay of recorded query logs
//!
//! A query log is a JSON-lines file with one completed execution per line:
//!
//! ```json
//! {"statement": "SELECT * FROM users WHERE id = $1", "params": [7], "duration_us": 420,
//!  "stack": [{"function": "app::handlers::show", "file": "src/handlers.rs", "line": 31}],
//!  "unit_of_work": "req-1"}
//! ```
//!
//! Replayed executions go through the same call-site resolution and
//! aggregation as live captures, so a log exported from one process can be
//! analyzed offline.

use crate::callsite::Frame;
use crate::event::{ErrorInfo, Event, Outcome, Parameters};
use crate::session::Session;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One frame of a recorded stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub function: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
}

impl From<&RecordedFrame> for Frame {
    fn from(frame: &RecordedFrame) -> Self {
        Frame::new(frame.function.as_str(), frame.file.as_str(), frame.line)
    }
}

/// One completed execution as stored in a query log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedQuery {
    pub statement: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub duration_us: u64,
    /// Innermost frame first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<RecordedFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_work: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_unix_us: Option<u64>,
}

impl RecordedQuery {
    fn outcome(&self) -> Outcome {
        match &self.error {
            Some(info) => Outcome::Error(info.clone()),
            None => Outcome::Success,
        }
    }

    fn started_at(&self) -> SystemTime {
        self.started_at_unix_us
            .map(|us| UNIX_EPOCH + Duration::from_micros(us))
            .unwrap_or_else(SystemTime::now)
    }
}

/// Parse JSON-lines text; blank lines are skipped
pub fn parse_jsonl(content: &str) -> Result<Vec<RecordedQuery>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid query record on line {}", idx + 1))
        })
        .collect()
}

/// Load a JSON-lines query log from disk
pub fn load_jsonl<P: AsRef<Path>>(path: P) -> Result<Vec<RecordedQuery>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read query log: {}", path.as_ref().display()))?;
    parse_jsonl(&content)
        .with_context(|| format!("Failed to parse query log: {}", path.as_ref().display()))
}

/// Feed recorded executions into a session
///
/// Returns how many were recorded (fewer than `queries.len()` only if the
/// session closed or degraded along the way).
pub fn replay_into(session: &Session, queries: &[RecordedQuery]) -> usize {
    let mut recorded = 0;
    for query in queries {
        let stack: Vec<Frame> = query.stack.iter().map(Frame::from).collect();
        let call_site = session.resolve_call_site(&stack);
        let event = Event::new(
            query.statement.as_str(),
            Parameters::capture(&query.params),
            query.started_at(),
            Duration::from_micros(query.duration_us),
            query.outcome(),
            call_site.id,
            query.unit_of_work.clone(),
        );
        if session.record(event, &call_site) {
            recorded += 1;
        }
    }
    tracing::debug!(session = %session.id(), recorded, total = queries.len(), "query log replayed");
    recorded
}
