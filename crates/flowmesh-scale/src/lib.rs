//! flowmesh-scale — the hysteresis control loop behind every edge master.
//!
//! Turns noisy window aggregates into bounded, debounced replica changes:
//!
//! ```text
//! AggregateSnapshot ──► AutoScaler (policy) ──► required
//!                            │
//!                            ▼
//!                       Scaler (state machine) ──► ScaleEnv::scale_up/down
//!                            │
//!              TimeMarker retry timers, PendingScale debounce
//! ```
//!
//! The [`AutoScaler`] computes how many replicas a node *should* have; the
//! [`Scaler`] decides whether acting on that now would duplicate an action
//! already in flight. Both keep their own pending bookkeeping — `desired`
//! hysteresis in the scaler, issued-target debounce in [`PendingScale`] —
//! and each contract holds on its own.

pub mod marker;
pub mod pending;
pub mod policy;
pub mod scaler;

pub use marker::TimeMarker;
pub use pending::PendingScale;
pub use policy::AutoScaler;
pub use scaler::{ScaleEnv, Scaler, ScalerConfig};
