//! Sustained-condition stopwatch.

use std::time::{Duration, Instant};

/// Measures how long a condition has held continuously.
///
/// `mark()` starts the clock if it is not already running; `clear()` stops
/// it. Callers that re-evaluate a condition every tick use `update()` and
/// ask `exceeds()` whether the condition has been true long enough to act.
#[derive(Debug, Clone, Default)]
pub struct TimeMarker {
    since: Option<Instant>,
}

impl TimeMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing if not already started.
    pub fn mark(&mut self) {
        if self.since.is_none() {
            self.since = Some(Instant::now());
        }
    }

    /// Stop timing; the next `mark()` starts from zero.
    pub fn clear(&mut self) {
        self.since = None;
    }

    /// Re-evaluate the condition: `mark()` when active, `clear()` when not.
    pub fn update(&mut self, active: bool) {
        if active {
            self.mark();
        } else {
            self.clear();
        }
    }

    pub fn is_marked(&self) -> bool {
        self.since.is_some()
    }

    /// How long the condition has held; zero when not marked.
    pub fn sustained(&self) -> Duration {
        self.since.map(|s| s.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Whether the condition has held at least `threshold`. Always false
    /// when not marked.
    pub fn exceeds(&self, threshold: Duration) -> bool {
        self.since.is_some() && self.sustained() >= threshold
    }
}
