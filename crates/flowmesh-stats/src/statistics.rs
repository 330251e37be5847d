//! Per-connection statistics registry.
//!
//! One `Statistics` instance lives inside each edge master and holds a
//! [`StatEntry`] per `(target, source)` connection: the master's own
//! traffic plus everything the slaves publish through the store. Entries
//! appear lazily on first report and die together on `reset()`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use flowmesh_core::{NodeName, Sample, StatsReport};

use crate::rates::{median, rate};
use crate::window::FixedWindow;

/// Resolves a node's live replica count when a report does not carry one.
/// The master wires the discovery census in here.
pub type SizeLookup = Box<dyn Fn(&str) -> u32 + Send + Sync>;

/// Window set for one `(target, source)` connection.
#[derive(Debug, Clone)]
pub struct StatEntry {
    /// Cumulative requests (backlog + sent) counter snapshots.
    pub requests: FixedWindow<Sample>,
    /// Cumulative responses counter snapshots.
    pub responses: FixedWindow<Sample>,
    /// Round-trip times, milliseconds.
    pub durations: FixedWindow<f64>,
    /// Latest known replica count of the target.
    pub current_size: u32,
    /// Latest reported backlog from this source.
    pub queue_size: u64,
}

impl StatEntry {
    fn new(window_size: usize) -> Self {
        Self {
            requests: FixedWindow::new(window_size),
            responses: FixedWindow::new(window_size),
            durations: FixedWindow::new(window_size),
            current_size: 0,
            queue_size: 0,
        }
    }

    /// Derive the per-connection rates. Computed at decision time, never
    /// stored.
    pub fn snapshot(&self) -> RateSnapshot {
        let durations: Vec<f64> = self.durations.items().copied().collect();
        RateSnapshot {
            req_rate: rate(&self.requests),
            res_rate: rate(&self.responses),
            round_trip_ms: median(&durations),
            total_requests: self.requests.last().map(|s| s.count).unwrap_or(0),
            total_responses: self.responses.last().map(|s| s.count).unwrap_or(0),
            queue_size: self.queue_size,
        }
    }
}

/// Rates derived from one connection's windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSnapshot {
    pub req_rate: f64,
    pub res_rate: f64,
    pub round_trip_ms: f64,
    pub total_requests: u64,
    pub total_responses: u64,
    pub queue_size: u64,
}

/// Rates folded across every source feeding one target.
///
/// Additive quantities (rates, totals, backlog) are summed; the
/// round-trip time is a per-connection quantity and is averaged over the
/// sources that reported any.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregateSnapshot {
    pub req_rate: f64,
    pub res_rate: f64,
    pub round_trip_ms: f64,
    pub total_requests: u64,
    pub total_responses: u64,
    pub queue_size: u64,
    pub current_size: u32,
    /// How many sources contributed.
    pub sources: usize,
}

/// All window sets an edge master keeps, keyed `(target, source)`.
pub struct Statistics {
    window_size: usize,
    size_lookup: SizeLookup,
    entries: HashMap<(NodeName, NodeName), StatEntry>,
}

impl Statistics {
    /// Create a registry whose windows hold `window_size` samples each.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            size_lookup: Box::new(|_| 0),
            entries: HashMap::new(),
        }
    }

    /// Install the census lookup used when a report carries no
    /// `current_size`.
    pub fn with_size_lookup(mut self, lookup: SizeLookup) -> Self {
        self.size_lookup = lookup;
        self
    }

    /// Fold one report into its connection's windows, creating the entry
    /// on first sight.
    pub fn report(&mut self, report: &StatsReport) {
        let now = epoch_millis();
        let key = (report.target.clone(), report.source.clone());
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| StatEntry::new(self.window_size));

        entry.requests.add(Sample {
            time: now,
            count: report.queue_size + report.sent,
        });
        entry.responses.add(Sample {
            time: now,
            count: report.responses,
        });
        entry.durations.add_range(report.durations.iter().copied());
        entry.queue_size = report.queue_size;
        entry.current_size = report
            .current_size
            .unwrap_or_else(|| (self.size_lookup)(&report.target));
    }

    /// Every `(source, target, entry)` triple currently tracked.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &StatEntry)> {
        self.entries
            .iter()
            .map(|((target, source), entry)| (source.as_str(), target.as_str(), entry))
    }

    /// Fold all sources feeding `target` into one snapshot.
    pub fn aggregate(&self, target: &str) -> AggregateSnapshot {
        let mut agg = AggregateSnapshot::default();
        let mut round_trips = Vec::new();

        for ((entry_target, _source), entry) in &self.entries {
            if entry_target != target {
                continue;
            }
            let snap = entry.snapshot();
            agg.req_rate += snap.req_rate;
            agg.res_rate += snap.res_rate;
            agg.total_requests += snap.total_requests;
            agg.total_responses += snap.total_responses;
            agg.queue_size += snap.queue_size;
            agg.current_size = agg.current_size.max(entry.current_size);
            agg.sources += 1;
            if !entry.durations.is_empty() {
                round_trips.push(snap.round_trip_ms);
            }
        }

        if !round_trips.is_empty() {
            agg.round_trip_ms = round_trips.iter().sum::<f64>() / round_trips.len() as f64;
        }
        agg
    }

    /// Discard every entry (job restart).
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
