//! Captured execution events
//!
//! An [`Event`] is the immutable record of one completed statement execution.
//! It is produced by the capture hook (or by log replay) and consumed by the
//! session aggregator.

use crate::callsite::{CallSiteId, Frame};
use crate::error::ProfilerError;
use crate::normalize::normalize_statement;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Marker stored in place of parameters that could not be serialized
pub const UNREPRESENTABLE_MARKER: &str = "<unrepresentable>";

/// Bound parameter values of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameters {
    /// Ordered bound values
    Values(Vec<serde_json::Value>),
    /// The host's values had no JSON representation
    Unrepresentable(String),
}

impl Parameters {
    /// No bound values
    pub fn none() -> Self {
        Parameters::Values(Vec::new())
    }

    /// Capture bound values from anything serializable
    ///
    /// Never fails: values that cannot be represented degrade to the
    /// [`UNREPRESENTABLE_MARKER`] sentinel. A single value (not a sequence) is
    /// stored as a one-element list.
    ///
    /// # Example
    /// ```
    /// use querylens::event::Parameters;
    ///
    /// let params = Parameters::capture(&(42, "alice"));
    /// assert_eq!(params.len(), 2);
    /// ```
    pub fn capture<T: Serialize + ?Sized>(values: &T) -> Self {
        match Self::try_capture(values) {
            Ok(params) => params,
            Err(err) => {
                tracing::debug!("{}; storing sentinel parameters", err);
                Parameters::Unrepresentable(UNREPRESENTABLE_MARKER.to_string())
            }
        }
    }

    fn try_capture<T: Serialize + ?Sized>(values: &T) -> Result<Self, ProfilerError> {
        let value = serde_json::to_value(values)
            .map_err(|e| ProfilerError::Capture(format!("parameter serialization: {}", e)))?;
        Ok(match value {
            serde_json::Value::Array(items) => Parameters::Values(items),
            serde_json::Value::Null => Parameters::Values(Vec::new()),
            single => Parameters::Values(vec![single]),
        })
    }

    /// Number of captured values (0 for the sentinel)
    pub fn len(&self) -> usize {
        match self {
            Parameters::Values(values) => values.len(),
            Parameters::Unrepresentable(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_unrepresentable(&self) -> bool {
        matches!(self, Parameters::Unrepresentable(_))
    }
}

/// Error reported by the host for a failed execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error class, e.g. `"UniqueViolation"` or the driver's error code
    pub kind: String,
    pub message: String,
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error(ErrorInfo),
}

impl Outcome {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Outcome::Error(ErrorInfo {
            kind: kind.into(),
            message: message.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

/// Host-supplied context for one execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Caller-defined unit of work (request id, transaction id, ...)
    pub unit_of_work: Option<String>,
    /// Explicit call stack, innermost frame first
    ///
    /// When absent the capture hook walks the current thread's stack.
    pub stack: Option<Vec<Frame>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit_of_work(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_work = Some(unit.into());
        self
    }

    pub fn with_stack(mut self, stack: Vec<Frame>) -> Self {
        self.stack = Some(stack);
        self
    }
}

/// One completed statement execution
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    statement_text: String,
    normalized_shape: String,
    parameters: Parameters,
    started_at: SystemTime,
    ended_at: SystemTime,
    duration: Duration,
    outcome: Outcome,
    call_site_id: CallSiteId,
    unit_of_work: Option<String>,
}

impl Event {
    /// Build an event from a statement that has not been normalized yet
    pub fn new(
        statement_text: impl Into<String>,
        parameters: Parameters,
        started_at: SystemTime,
        duration: Duration,
        outcome: Outcome,
        call_site_id: CallSiteId,
        unit_of_work: Option<String>,
    ) -> Self {
        let statement_text = statement_text.into();
        let normalized_shape = normalize_statement(&statement_text);
        Self::with_shape(
            statement_text,
            normalized_shape,
            parameters,
            started_at,
            duration,
            outcome,
            call_site_id,
            unit_of_work,
        )
    }

    /// Build an event whose shape was already computed (at before-execute time)
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_shape(
        statement_text: String,
        normalized_shape: String,
        parameters: Parameters,
        started_at: SystemTime,
        duration: Duration,
        outcome: Outcome,
        call_site_id: CallSiteId,
        unit_of_work: Option<String>,
    ) -> Self {
        Self {
            statement_text,
            normalized_shape,
            parameters,
            started_at,
            ended_at: started_at + duration,
            duration,
            outcome,
            call_site_id,
            unit_of_work,
        }
    }

    pub fn statement_text(&self) -> &str {
        &self.statement_text
    }

    pub fn normalized_shape(&self) -> &str {
        &self.normalized_shape
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn ended_at(&self) -> SystemTime {
        self.ended_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn call_site_id(&self) -> CallSiteId {
        self.call_site_id
    }

    pub fn unit_of_work(&self) -> Option<&str> {
        self.unit_of_work.as_deref()
    }
}

/// Whole microseconds in `duration`, saturating at `u64::MAX`
pub fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Microseconds since the Unix epoch (0 for clocks set before 1970)
pub fn unix_micros(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(duration_micros)
        .unwrap_or(0)
}
