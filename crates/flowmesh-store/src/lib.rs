//! flowmesh-store — the coordination store seam.
//!
//! Everything a worker needs from the outside world goes through the
//! [`CoordStore`] trait: edge locks, statistics pub/sub, the discovery
//! registry, queue introspection, and scale-job actuation. Transport
//! implementations live behind it; this crate ships the in-memory backend
//! used by tests and standalone mode.
//!
//! # Architecture
//!
//! ```text
//! election ──── acquire/release locks ────┐
//! slaves ────── report_stats ─────────────┤
//! masters ───── watch_stats, actuation ───┼──► CoordStore ──► backend
//! discovery ─── list_discovery ───────────┤
//! service ───── pipeline_definition ──────┘
//! ```
//!
//! Locks are leases: a lock acquired and never re-acquired expires after
//! the TTL, so a crashed holder is replaced within one election interval.

pub mod error;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::{CoordStore, DiscoveryFilter};
