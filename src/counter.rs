//! Lightweight per-request query counting
//!
//! [`QueryCounter`] is a second [`QueryObserver`] for cases where a full
//! profiling session is too much: it only counts completed executions and,
//! optionally, remembers the normalized shapes it saw. The typical use is a
//! test asserting that a request handler stays within a query budget.
//!
//! # Example
//!
//! ```
//! use querylens::counter::QueryCounter;
//! use querylens::event::{ExecutionContext, Outcome, Parameters};
//! use querylens::hook::QueryObserver;
//!
//! let counter = QueryCounter::new();
//! let token = counter.on_before_execute("SELECT 1", Parameters::none(), &ExecutionContext::new());
//! counter.on_after_execute(token, Outcome::Success);
//!
//! assert_eq!(counter.count(), 1);
//! assert!(counter.check_limit(1).is_ok());
//! assert!(counter.check_limit(0).is_err());
//! ```

use crate::error::{ProfilerError, Result};
use crate::event::{ExecutionContext, Outcome, Parameters};
use crate::hook::{ExecutionToken, QueryObserver};
use crate::normalize::normalize_statement;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Counts completed executions
#[derive(Debug)]
pub struct QueryCounter {
    next_token: AtomicU64,
    /// Normalized shape per in-flight execution (empty when shapes are off)
    pending: DashMap<ExecutionToken, String>,
    completed: AtomicU64,
    errors: AtomicU64,
    shape_capacity: usize,
    shapes: Mutex<Vec<String>>,
}

impl Default for QueryCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCounter {
    /// Counter that keeps no shapes
    pub fn new() -> Self {
        Self::with_shape_capacity(0)
    }

    /// Counter that remembers up to `capacity` normalized shapes, in
    /// completion order
    pub fn with_shape_capacity(capacity: usize) -> Self {
        Self {
            next_token: AtomicU64::new(1),
            pending: DashMap::new(),
            completed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            shape_capacity: capacity,
            shapes: Mutex::new(Vec::new()),
        }
    }

    /// Completed executions, successful or not
    pub fn count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Completed executions that ended in an error
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Recorded shapes (at most the configured capacity)
    pub fn shapes(&self) -> Vec<String> {
        self.shapes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Executions that started but have not finished
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Forget every in-flight execution; they will not be counted
    pub fn abandon_pending(&self) -> usize {
        let mut abandoned = 0;
        self.pending.retain(|_, _| {
            abandoned += 1;
            false
        });
        if abandoned > 0 {
            tracing::debug!(abandoned, "counter abandoned pending executions");
        }
        abandoned
    }

    /// Zero all counters and forget recorded shapes
    ///
    /// Executions still in flight are kept and count once they complete;
    /// call [`abandon_pending`](Self::abandon_pending) to drop them as well.
    pub fn reset(&self) {
        self.completed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.shapes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Fail if more than `max` executions completed
    pub fn check_limit(&self, max: u64) -> Result<()> {
        let actual = self.count();
        if actual > max {
            return Err(ProfilerError::QueryLimitExceeded { limit: max, actual });
        }
        Ok(())
    }
}

impl QueryObserver for QueryCounter {
    fn on_before_execute(
        &self,
        statement: &str,
        _parameters: Parameters,
        _context: &ExecutionContext,
    ) -> ExecutionToken {
        let token = ExecutionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let shape = if self.shape_capacity > 0 {
            normalize_statement(statement)
        } else {
            String::new()
        };
        self.pending.insert(token, shape);
        token
    }

    fn on_after_execute(&self, token: ExecutionToken, outcome: Outcome) {
        let Some((_, shape)) = self.pending.remove(&token) else {
            tracing::debug!(%token, "counter ignored unknown execution");
            return;
        };

        self.completed.fetch_add(1, Ordering::Relaxed);
        if outcome.is_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }

        if self.shape_capacity > 0 {
            let mut shapes = self.shapes.lock().unwrap_or_else(PoisonError::into_inner);
            if shapes.len() < self.shape_capacity {
                shapes.push(shape);
            }
        }
    }

    fn on_cancel(&self, token: ExecutionToken) {
        self.pending.remove(&token);
    }
}
