//! Per-session aggregation of captured events
//!
//! Events are folded into one [`AggregateEntry`] per
//! `(call-site identity, normalized shape)` key. The store is a sharded
//! concurrent map: an update holds only its shard's write lock, so each
//! entry changes atomically as a unit while unrelated keys keep recording
//! in parallel.

use crate::callsite::{CallSite, CallSiteId};
use crate::error::ProfilerError;
use crate::event::{ErrorInfo, Event, Parameters};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Unique key of an aggregate entry within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub call_site_id: CallSiteId,
    pub normalized_shape: String,
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.call_site_id, self.normalized_shape)
    }
}

/// Accumulated statistics for one statement shape issued from one call site
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateEntry {
    pub call_site: CallSite,
    pub normalized_shape: String,
    /// Raw text of the first execution, for display
    pub example_statement: String,
    pub count: u64,
    pub error_count: u64,
    pub last_error: Option<ErrorInfo>,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    /// Most recent parameter sets, oldest first
    pub sample_parameters: VecDeque<Parameters>,
    /// Executions per caller-supplied unit of work
    pub unit_counts: BTreeMap<String, u64>,
}

impl AggregateEntry {
    fn from_event(event: Event, call_site: &CallSite, sample_size: usize) -> Self {
        let mut entry = Self {
            call_site: call_site.clone(),
            normalized_shape: event.normalized_shape().to_string(),
            example_statement: event.statement_text().to_string(),
            count: 0,
            error_count: 0,
            last_error: None,
            total_duration: Duration::ZERO,
            min_duration: event.duration(),
            max_duration: event.duration(),
            sample_parameters: VecDeque::with_capacity(sample_size),
            unit_counts: BTreeMap::new(),
        };
        entry.absorb(event, sample_size);
        entry
    }

    fn absorb(&mut self, event: Event, sample_size: usize) {
        let duration = event.duration();
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);

        if let Some(unit) = event.unit_of_work() {
            *self.unit_counts.entry(unit.to_string()).or_insert(0) += 1;
        }

        if let crate::event::Outcome::Error(info) = event.outcome() {
            self.error_count += 1;
            self.last_error = Some(info.clone());
        }

        if sample_size > 0 {
            // FIFO: evict the oldest occurrence, not the least used
            while self.sample_parameters.len() >= sample_size {
                self.sample_parameters.pop_front();
            }
            self.sample_parameters.push_back(event.parameters().clone());
        }
    }

    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            call_site_id: self.call_site.id,
            normalized_shape: self.normalized_shape.clone(),
        }
    }

    pub fn mean_duration(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.count.min(u32::MAX as u64) as u32
    }

    /// Largest number of executions within a single unit of work
    pub fn max_unit_count(&self) -> u64 {
        self.unit_counts.values().copied().max().unwrap_or(0)
    }

    /// Fraction of executions that failed (0.0 - 1.0)
    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.count as f64
    }
}

/// Concurrent store of aggregate entries
#[derive(Debug)]
pub struct Aggregator {
    entries: DashMap<AggregateKey, AggregateEntry>,
    sample_size: usize,
    recorded: AtomicU64,
}

impl Aggregator {
    pub fn new(sample_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            sample_size,
            recorded: AtomicU64::new(0),
        }
    }

    /// Fold one event into its entry
    ///
    /// Fails only when the entry stored under the event's key belongs to a
    /// different source location (an identity collision), or the event was
    /// attributed to a different call site than the one supplied. The event
    /// is not recorded in either case.
    pub fn record(&self, event: Event, call_site: &CallSite) -> Result<(), ProfilerError> {
        if event.call_site_id() != call_site.id {
            return Err(ProfilerError::Aggregation {
                key: format!("{}/{}", call_site.id, event.normalized_shape()),
                reason: format!(
                    "event attributed to call site {} but recorded against {}",
                    event.call_site_id(),
                    call_site.id
                ),
            });
        }

        let key = AggregateKey {
            call_site_id: call_site.id,
            normalized_shape: event.normalized_shape().to_string(),
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let stored = &occupied.get().call_site;
                if !stored.same_location(call_site) {
                    return Err(ProfilerError::Aggregation {
                        key: occupied.key().to_string(),
                        reason: format!(
                            "call site identity shared by {} and {}",
                            stored.label, call_site.label
                        ),
                    });
                }
                occupied.get_mut().absorb(event, self.sample_size);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(AggregateEntry::from_event(event, call_site, self.sample_size));
            }
        }

        self.recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of events folded in so far
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry, sorted by key
    pub fn entries(&self) -> Vec<AggregateEntry> {
        let mut entries: Vec<AggregateEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.call_site
                .id
                .cmp(&b.call_site.id)
                .then_with(|| a.normalized_shape.cmp(&b.normalized_shape))
        });
        entries
    }
}
