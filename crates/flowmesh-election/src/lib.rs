//! flowmesh-election — decides who scales what.
//!
//! Every worker runs one [`Election`] per job. Each tick it attempts the
//! distributed lock for every child edge of its node: winning makes it
//! (or keeps it) master for that edge, losing makes it a slave. There is
//! no heartbeat protocol — repeating the acquisition *is* the lease
//! renewal, and a crashed master is replaced within one tick of its lease
//! expiring in the store.
//!
//! Masters are sticky: a sitting master that loses an acquisition attempt
//! keeps its role. Authority is only given up through [`Election::release_all`].

pub mod election;

pub use election::{Election, RoleChange};
