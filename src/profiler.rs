//! Profiler facade
//!
//! A [`Profiler`] owns a validated configuration and hands out sessions.
//! There is no global state: every session is an explicit object, and its
//! lifetime is bounded by the [`SessionGuard`] returned from
//! [`Profiler::start_session`].
//!
//! # Example
//!
//! ```
//! use querylens::config::ProfilerConfig;
//! use querylens::detector::DuplicateScope;
//! use querylens::event::{ExecutionContext, Outcome, Parameters};
//! use querylens::hook::QueryObserver;
//! use querylens::profiler::Profiler;
//!
//! let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
//! let ((), snapshot) = profiler.with_session(|hook| {
//!     for id in 0..10 {
//!         let token = hook.on_before_execute(
//!             "SELECT * FROM comments WHERE post_id = $1",
//!             Parameters::capture(&[id]),
//!             &ExecutionContext::new(),
//!         );
//!         hook.on_after_execute(token, Outcome::Success);
//!     }
//! });
//!
//! let report = profiler.report(&snapshot, DuplicateScope::Session).unwrap();
//! assert_eq!(report.summary.total_queries, 10);
//! assert_eq!(report.findings.len(), 1);
//! ```

use crate::callsite::{BacktraceProvider, StackProvider};
use crate::config::ProfilerConfig;
use crate::detector::{Detector, DuplicateScope};
use crate::error::Result;
use crate::hook::CaptureHook;
use crate::report::{Report, ReportBuilder};
use crate::session::{Session, SessionGuard, SessionSnapshot};
use std::fmt;
use std::sync::Arc;

/// Entry point for profiling sessions
#[derive(Clone)]
pub struct Profiler {
    config: ProfilerConfig,
    stack_provider: Arc<dyn StackProvider>,
}

impl fmt::Debug for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profiler").field("config", &self.config).finish()
    }
}

impl Profiler {
    /// Create a profiler; fails if the configuration is invalid
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stack_provider: Arc::new(BacktraceProvider::new()),
        })
    }

    /// Replace the stack source used for call-site capture
    pub fn with_stack_provider(mut self, provider: Arc<dyn StackProvider>) -> Self {
        self.stack_provider = provider;
        self
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Open a new, isolated session
    ///
    /// The session closes when the guard is dropped.
    pub fn start_session(&self) -> SessionGuard {
        SessionGuard::new(Session::with_stack_provider(
            &self.config,
            Arc::clone(&self.stack_provider),
        ))
    }

    /// Run `work` inside a fresh session
    ///
    /// Returns the work's own result together with the closed session's
    /// snapshot, so the snapshot is available even when `work` returns an
    /// error.
    pub fn with_session<R, F>(&self, work: F) -> (R, SessionSnapshot)
    where
        F: FnOnce(&CaptureHook) -> R,
    {
        let guard = self.start_session();
        let hook = guard.hook();
        let result = work(&hook);
        drop(hook);
        (result, guard.finish())
    }

    /// Detector using this profiler's thresholds
    pub fn detector(&self, scope: DuplicateScope) -> Detector {
        Detector::from_config(&self.config, scope)
    }

    /// Detect findings and build the report for a snapshot
    pub fn report(&self, snapshot: &SessionSnapshot, scope: DuplicateScope) -> Result<Report> {
        let findings = self.detector(scope).detect(snapshot);
        ReportBuilder::build(snapshot, &findings)
    }
}
