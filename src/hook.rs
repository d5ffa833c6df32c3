//! Statement lifecycle capture
//!
//! ORM integrations report executions through the [`QueryObserver`] trait:
//! one `on_before_execute` per statement, then exactly one of
//! `on_after_execute`, `on_error` or `on_cancel` for the returned token.
//!
//! [`CaptureHook`] turns those notifications into [`Event`]s for one session.
//! Pending executions are keyed by token in a concurrent map, so nested or
//! interleaved executions on any thread never share timing state.

use crate::callsite::CallSite;
use crate::event::{Event, ExecutionContext, Outcome, Parameters};
use crate::normalize::normalize_statement;
use crate::session::Session;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Error kind recorded by [`CaptureHook::observe`] for failed executions
pub const OBSERVED_ERROR_KIND: &str = "Error";

/// Identifies one logical execution between its before and after notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionToken(pub u64);

impl fmt::Display for ExecutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec#{}", self.0)
    }
}

/// Callbacks an ORM integration drives for every statement it executes
///
/// Implementations must not fail or block: every method absorbs its own
/// errors so the application's query path is never affected.
pub trait QueryObserver: Send + Sync {
    /// A statement is about to execute
    fn on_before_execute(
        &self,
        statement: &str,
        parameters: Parameters,
        context: &ExecutionContext,
    ) -> ExecutionToken;

    /// The execution identified by `token` finished
    fn on_after_execute(&self, token: ExecutionToken, outcome: Outcome);

    /// The execution identified by `token` failed
    fn on_error(&self, token: ExecutionToken, kind: &str, message: &str) {
        self.on_after_execute(token, Outcome::error(kind, message));
    }

    /// The execution identified by `token` was abandoned and will never finish
    fn on_cancel(&self, token: ExecutionToken);
}

#[derive(Debug)]
struct PendingExecution {
    statement: String,
    normalized_shape: String,
    parameters: Parameters,
    call_site: CallSite,
    unit_of_work: Option<String>,
    started_at: SystemTime,
    started: Instant,
}

/// [`QueryObserver`] feeding one profiling session
#[derive(Debug)]
pub struct CaptureHook {
    session: Arc<Session>,
    next_token: AtomicU64,
    pending: DashMap<ExecutionToken, PendingExecution>,
}

impl CaptureHook {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            next_token: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Convenience wrapper capturing any serializable parameter collection
    pub fn before_execute<P: Serialize + ?Sized>(
        &self,
        statement: &str,
        parameters: &P,
        context: &ExecutionContext,
    ) -> ExecutionToken {
        self.on_before_execute(statement, Parameters::capture(parameters), context)
    }

    /// Run `execute` as one observed statement execution
    ///
    /// `Ok` and `Err` results are recorded as success and error outcomes; an
    /// `Err` is recorded with kind [`OBSERVED_ERROR_KIND`] and its display
    /// text as the message. If `execute` panics the execution stays pending
    /// and is never recorded.
    pub fn observe<T, E, F>(
        &self,
        statement: &str,
        parameters: Parameters,
        context: &ExecutionContext,
        execute: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let token = self.on_before_execute(statement, parameters, context);
        let result = execute();
        match &result {
            Ok(_) => self.on_after_execute(token, Outcome::Success),
            Err(err) => self.on_error(token, OBSERVED_ERROR_KIND, &err.to_string()),
        }
        result
    }

    /// Number of executions that started but have not finished
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending execution, counting them as dropped events
    pub fn abandon_pending(&self) -> usize {
        let mut abandoned = 0;
        self.pending.retain(|_, _| {
            abandoned += 1;
            false
        });
        if abandoned > 0 {
            tracing::debug!(
                session = %self.session.id(),
                abandoned,
                "pending executions abandoned"
            );
            self.session.add_dropped(abandoned as u64);
        }
        abandoned
    }

    fn next_token(&self) -> ExecutionToken {
        ExecutionToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

impl QueryObserver for CaptureHook {
    fn on_before_execute(
        &self,
        statement: &str,
        parameters: Parameters,
        context: &ExecutionContext,
    ) -> ExecutionToken {
        let token = self.next_token();
        if !self.session.is_open() {
            tracing::trace!(%token, "session closed; execution not tracked");
            return token;
        }

        // The call site is where the statement was issued, so resolve now
        let call_site = match context.stack.as_deref() {
            Some(stack) => self.session.resolve_call_site(stack),
            None => self.session.capture_call_site(),
        };

        self.pending.insert(
            token,
            PendingExecution {
                statement: statement.to_string(),
                normalized_shape: normalize_statement(statement),
                parameters,
                call_site,
                unit_of_work: context.unit_of_work.clone(),
                started_at: SystemTime::now(),
                started: Instant::now(),
            },
        );
        token
    }

    fn on_after_execute(&self, token: ExecutionToken, outcome: Outcome) {
        let duration_end = Instant::now();
        let Some((_, pending)) = self.pending.remove(&token) else {
            tracing::debug!(%token, "completion for unknown or finished execution ignored");
            return;
        };

        let duration = duration_end.saturating_duration_since(pending.started);
        let event = Event::with_shape(
            pending.statement,
            pending.normalized_shape,
            pending.parameters,
            pending.started_at,
            duration,
            outcome,
            pending.call_site.id,
            pending.unit_of_work,
        );
        self.session.record(event, &pending.call_site);
    }

    fn on_cancel(&self, token: ExecutionToken) {
        if self.pending.remove(&token).is_some() {
            tracing::trace!(%token, "execution cancelled");
        }
    }
}

impl Drop for CaptureHook {
    fn drop(&mut self) {
        self.abandon_pending();
    }
}
