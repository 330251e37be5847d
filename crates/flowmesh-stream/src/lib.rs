//! flowmesh-stream — per-job wiring of one flowmesh worker.
//!
//! A `StreamService` joins a worker process to a running job: it reads the
//! pipeline definition, keeps the worker's discovery record fresh, runs the
//! per-edge election, and drives the role-specific adapters — slaves forward
//! traffic samples to the elected master, masters fold them into the
//! scaling policy and act.
//!
//! # Architecture
//!
//! ```text
//! StreamService
//!   ├── Interval("election")   → Election tick → AdaptersProxy::bind
//!   ├── Interval("discovery")  → ServiceDiscovery tick → Census
//!   ├── Interval("scale")      → AdaptersProxy::scale
//!   │                              └── MasterAdapter → AutoScaler → store
//!   ├── Interval("metrics")    → MetricsChanged
//!   └── Interval("throughput") → ThroughputChanged
//! ```

pub mod collectors;
pub mod interval;
pub mod master;
pub mod proxy;
pub mod service;
pub mod slave;

pub use collectors::{MetricsCollector, ThroughputCollector};
pub use interval::{Interval, Tick};
pub use master::MasterAdapter;
pub use proxy::{AdaptersProxy, NodeAdapter};
pub use service::{StreamService, WorkerContext};
pub use slave::SlaveAdapter;
