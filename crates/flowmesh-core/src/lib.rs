//! flowmesh-core — shared domain types for the flowmesh worker mesh.
//!
//! Defines the pipeline graph snapshot handed to each worker at job start,
//! the wire shapes exchanged through the coordination store, the scaling
//! vocabulary, the closed set of in-process worker events, and the
//! configuration surface read by every control loop.
//!
//! # Architecture
//!
//! ```text
//! PipelineDef ──── immutable per job ────► worker snapshot (nodes, edges)
//! TrafficSample ── stamped by adapters ──► StatsReport (store pub/sub)
//! ScaleAction ──── actuation seam ───────► scale jobs / worker stops
//! WorkerEvent ──── broadcast channel ────► in-process subscribers
//! ```
//!
//! Nothing in this crate performs I/O or owns a task; it is the vocabulary
//! the other flowmesh crates agree on.

pub mod config;
pub mod events;
pub mod types;

pub use config::*;
pub use events::*;
pub use types::*;
