//! flowmesh-stats — traffic statistics for edge masters.
//!
//! An edge master estimates its downstream node's load from noisy,
//! periodically-published counter snapshots. This crate owns that path:
//! size-bounded [`FixedWindow`]s hold the snapshots, the pure functions in
//! [`rates`] turn windows into per-second rates, and [`Statistics`] keeps
//! one window set per `(target, source)` connection and derives the
//! aggregate the scaling policy consumes.
//!
//! # Architecture
//!
//! ```text
//! StatsReport ──► Statistics ──► StatEntry { requests / responses / durations }
//!                     │                         (FixedWindow each)
//!                     └──► aggregate(target) ──► AggregateSnapshot ──► policy
//! ```
//!
//! Estimation degrades instead of erroring: empty windows rate to zero,
//! unknown ratios resolve to 1, an empty median is 0.

pub mod rates;
pub mod statistics;
pub mod window;

pub use rates::{median, rate, ratio};
pub use statistics::{AggregateSnapshot, RateSnapshot, SizeLookup, StatEntry, Statistics};
pub use window::FixedWindow;
