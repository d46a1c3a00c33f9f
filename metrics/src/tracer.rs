//! Diagnostics collector for per-operation elapsed times.
//!
//! Entries keep their insertion index; the index keeps counting across
//! `clear` so entries from different collection windows never collide.
//! Only the most recent entries are kept. Averages and the overall sum
//! cover every entry logged since the last `clear`.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Serialize;

/// Entries kept by [`InMemoryTracer::new`].
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

pub trait Tracer: Send + Sync {
    /// Stores the time elapsed since `start` under `label`.
    fn log_time(&self, label: &str, start: Instant);

    fn get(&self) -> Trace;

    fn clear(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub index: u64,
    pub label: String,
    pub duration_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelAverage {
    pub label: String,
    pub average_ns: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Trace {
    /// Most recent entries, oldest first.
    pub entries: Vec<TraceEntry>,
    /// Sorted by label.
    pub averages: Vec<LabelAverage>,
    /// Sum of all durations logged since the last clear.
    pub overall_ns: u64,
}

#[derive(Default)]
struct LabelTotals {
    total_ns: u64,
    count: u64,
}

struct Inner {
    next_index: u64,
    entries: VecDeque<TraceEntry>,
    totals: BTreeMap<String, LabelTotals>,
    overall_ns: u64,
}

pub struct InMemoryTracer {
    name: String,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl InMemoryTracer {
    pub fn new(name: &str) -> Self {
        Self::with_capacity(name, DEFAULT_MAX_ENTRIES)
    }

    /// Keeps at most `max_entries` entries, at least one.
    pub fn with_capacity(name: &str, max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            name: name.to_string(),
            max_entries,
            inner: Mutex::new(Inner {
                next_index: 1,
                entries: VecDeque::with_capacity(max_entries.min(DEFAULT_MAX_ENTRIES)),
                totals: BTreeMap::new(),
                overall_ns: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, label: &str, elapsed: Duration) {
        let ns = nanos(elapsed);
        let mut inner = self.lock();
        let index = inner.next_index;
        inner.next_index += 1;
        inner.overall_ns = inner.overall_ns.saturating_add(ns);
        let totals = inner.totals.entry(label.to_string()).or_default();
        totals.total_ns = totals.total_ns.saturating_add(ns);
        totals.count += 1;
        if inner.entries.len() == self.max_entries {
            inner.entries.pop_front();
        }
        inner.entries.push_back(TraceEntry {
            index,
            label: label.to_string(),
            duration_ns: ns,
        });
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Tracer for InMemoryTracer {
    fn log_time(&self, label: &str, start: Instant) {
        self.record(label, start.elapsed());
    }

    fn get(&self) -> Trace {
        let inner = self.lock();
        Trace {
            entries: inner.entries.iter().cloned().collect(),
            averages: inner
                .totals
                .iter()
                .map(|(label, totals)| LabelAverage {
                    label: label.clone(),
                    average_ns: totals.total_ns / totals.count,
                })
                .collect(),
            overall_ns: inner.overall_ns,
        }
    }

    fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.totals.clear();
        inner.overall_ns = 0;
    }
}
