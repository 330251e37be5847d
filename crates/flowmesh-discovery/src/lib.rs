//! flowmesh-discovery — replica census over the coordination registry.
//!
//! Polls the registry for the live instances of one job, keeps a shared
//! per-node census, and announces membership changes to the rest of the
//! worker process. The census is the source of truth for `current_size`
//! wherever a reporter did not attach one.
//!
//! # Architecture
//!
//! ```text
//! registry ──poll──▶ ServiceDiscovery ──▶ Census (shared snapshot)
//!                         │
//!                         ├─▶ DiscoveryChanged   (per changed parent)
//!                         └─▶ ParentsDown        (sustained outage)
//! ```

pub mod discovery;

pub use discovery::{Census, ServiceDiscovery};
