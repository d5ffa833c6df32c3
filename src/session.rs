//! Profiling sessions
//!
//! A [`Session`] is one bounded profiling window with its own isolated
//! aggregate state. It is opened by [`crate::profiler::Profiler::start_session`],
//! shared with its capture hook through an `Arc`, and closed exactly once.
//! After close the state is frozen into a [`SessionSnapshot`].

use crate::aggregator::{AggregateEntry, AggregateKey, Aggregator};
use crate::callsite::{BacktraceProvider, CallSite, CallSiteResolver, Frame, StackProvider};
use crate::config::ProfilerConfig;
use crate::event::Event;
use crate::hook::CaptureHook;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// A profiling session
pub struct Session {
    id: Uuid,
    started_at: SystemTime,
    aggregator: Aggregator,
    resolver: CallSiteResolver,
    stack_provider: Arc<dyn StackProvider>,
    /// `true` while open. Recorders share the read side; close takes the
    /// write side so nothing lands after the frozen snapshot.
    gate: RwLock<bool>,
    degraded: AtomicBool,
    dropped_events: AtomicU64,
    frozen: OnceLock<SessionSnapshot>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("open", &self.is_open())
            .field("entries", &self.aggregator.len())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

impl Session {
    /// Open a session that captures stacks with the `backtrace` crate
    pub fn new(config: &ProfilerConfig) -> Self {
        Self::with_stack_provider(config, Arc::new(BacktraceProvider::default()))
    }

    /// Open a session with a custom stack source
    pub fn with_stack_provider(
        config: &ProfilerConfig,
        stack_provider: Arc<dyn StackProvider>,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, "profiling session started");
        Self {
            id,
            started_at: SystemTime::now(),
            aggregator: Aggregator::new(config.sample_size),
            resolver: CallSiteResolver::new(config),
            stack_provider,
            gate: RwLock::new(true),
            degraded: AtomicBool::new(false),
            dropped_events: AtomicU64::new(0),
            frozen: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn is_open(&self) -> bool {
        *self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an aggregation invariant was violated during this session
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Events that completed but were not recorded (session closed, abandoned
    /// executions, aggregation failures)
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub(crate) fn add_dropped(&self, n: u64) {
        if n > 0 {
            self.dropped_events.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn resolver(&self) -> &CallSiteResolver {
        &self.resolver
    }

    /// Resolve the call site of the code running on this thread
    pub fn capture_call_site(&self) -> CallSite {
        let stack = self.stack_provider.capture(self.resolver.max_depth());
        self.resolver.resolve(&stack)
    }

    /// Resolve an explicit stack (innermost frame first)
    pub fn resolve_call_site(&self, stack: &[Frame]) -> CallSite {
        self.resolver.resolve(stack)
    }

    /// Record one completed event
    ///
    /// Returns `false` when the event was not recorded: the session is
    /// closed, or the event violated an aggregation invariant (in which case
    /// the session is marked degraded). Never panics.
    pub fn record(&self, event: Event, call_site: &CallSite) -> bool {
        let open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            tracing::debug!(session = %self.id, "event after close dropped");
            self.add_dropped(1);
            return false;
        }

        match self.aggregator.record(event, call_site) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(session = %self.id, "{}; session marked degraded", err);
                self.degraded.store(true, Ordering::Relaxed);
                self.add_dropped(1);
                false
            }
        }
    }

    /// Create a capture hook bound to this session
    pub fn hook(self: &Arc<Self>) -> CaptureHook {
        CaptureHook::new(Arc::clone(self))
    }

    /// Current state as an owned copy
    ///
    /// After close this is always the frozen snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        if let Some(frozen) = self.frozen.get() {
            return frozen.clone();
        }
        self.build_snapshot(None)
    }

    /// Close the session and freeze its state
    ///
    /// Idempotent: later calls return the same snapshot.
    pub fn close(&self) -> SessionSnapshot {
        let mut open = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        if *open {
            *open = false;
            let snapshot = self.build_snapshot(Some(SystemTime::now()));
            tracing::debug!(
                session = %self.id,
                entries = snapshot.entries.len(),
                queries = snapshot.total_queries(),
                "profiling session closed"
            );
            // Only the first close (under the write lock) reaches this point
            let _ = self.frozen.set(snapshot);
        }
        drop(open);
        self.snapshot()
    }

    fn build_snapshot(&self, ended_at: Option<SystemTime>) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            started_at: self.started_at,
            ended_at,
            degraded: self.is_degraded(),
            dropped_events: self.dropped_events(),
            entries: self.aggregator.entries(),
        }
    }
}

/// Frozen, owned view of a session
///
/// Entries are sorted by `(call_site_id, normalized_shape)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub(crate) id: Uuid,
    pub(crate) started_at: SystemTime,
    pub(crate) ended_at: Option<SystemTime>,
    pub(crate) degraded: bool,
    pub(crate) dropped_events: u64,
    pub(crate) entries: Vec<AggregateEntry>,
}

impl SessionSnapshot {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// `None` while the session was still open when the snapshot was taken
    pub fn ended_at(&self) -> Option<SystemTime> {
        self.ended_at
    }

    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    pub fn entries(&self) -> &[AggregateEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by key
    pub fn entry(&self, key: &AggregateKey) -> Option<&AggregateEntry> {
        self.entries
            .binary_search_by(|e| {
                e.call_site
                    .id
                    .cmp(&key.call_site_id)
                    .then_with(|| e.normalized_shape.as_str().cmp(key.normalized_shape.as_str()))
            })
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn total_queries(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.entries.iter().map(|e| e.error_count).sum()
    }

    pub fn total_duration(&self) -> Duration {
        self.entries.iter().map(|e| e.total_duration).sum()
    }

    pub fn distinct_call_sites(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.call_site.id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn distinct_statements(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.normalized_shape.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Scoped ownership of an open session
///
/// The session is closed when the guard is dropped, including during
/// unwinding, so a report can still be built after an early exit.
#[derive(Debug)]
pub struct SessionGuard {
    session: Arc<Session>,
}

impl SessionGuard {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    /// Shared handle to the session (outlives the guard)
    pub fn handle(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// Create a capture hook bound to this session
    pub fn hook(&self) -> CaptureHook {
        self.session.hook()
    }

    /// Close the session and return its frozen state
    pub fn finish(self) -> SessionSnapshot {
        self.session.close()
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.close();
    }
}
