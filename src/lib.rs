//! querylens - ORM query profiler with call-site attribution and N+1 detection
//!
//! An ORM integration registers a [`hook::QueryObserver`] and reports every
//! statement it executes. Events are normalized, attributed to the
//! application frame that issued them, and aggregated per session; on demand
//! the detector flags duplicate (N+1), slow and failing statements and the
//! report builder turns everything into a serializable [`report::Report`].
//!
//! ```
//! use querylens::prelude::*;
//!
//! let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
//! let session = profiler.start_session();
//! let hook = session.hook();
//!
//! let context = ExecutionContext::new().with_unit_of_work("req-1");
//! let token = hook.before_execute("SELECT * FROM users WHERE id = $1", &[1], &context);
//! hook.on_after_execute(token, Outcome::Success);
//! drop(hook);
//!
//! let snapshot = session.finish();
//! let report = profiler.report(&snapshot, DuplicateScope::UnitOfWork).unwrap();
//! assert_eq!(report.summary.total_queries, 1);
//! ```

pub mod aggregator;
pub mod callsite;
pub mod cli;
pub mod config;
pub mod counter;
pub mod detector;
pub mod error;
pub mod event;
pub mod hook;
pub mod normalize;
pub mod profiler;
pub mod replay;
pub mod report;
pub mod session;

pub use error::{ProfilerError, Result};

/// Commonly used types
pub mod prelude {
    pub use crate::callsite::{CallSite, CallSiteId, Frame, StackProvider};
    pub use crate::config::ProfilerConfig;
    pub use crate::counter::QueryCounter;
    pub use crate::detector::{Detector, DetectorThresholds, DuplicateScope, Finding, Severity};
    pub use crate::event::{ExecutionContext, Outcome, Parameters};
    pub use crate::hook::{CaptureHook, ExecutionToken, QueryObserver};
    pub use crate::profiler::Profiler;
    pub use crate::report::{Report, ReportBuilder};
    pub use crate::session::{SessionGuard, SessionSnapshot};
}
