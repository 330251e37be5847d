//! The `CoordStore` trait: what a worker asks of the coordination store.

use async_trait::async_trait;
use tokio::sync::broadcast;

use flowmesh_core::{
    DiscoveryInstance, JobId, LockKey, PipelineDef, ScaleJobSpec, StatsReport, WorkerId,
};

use crate::error::StoreResult;

/// Filter for discovery registry queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub job_id: JobId,
}

impl DiscoveryFilter {
    pub fn job(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
        }
    }
}

/// The coordination store seam.
///
/// All methods are best-effort: callers treat every error as transient and
/// retry on their own cadence. Implementations must be safe to share
/// across tasks (`Send + Sync`), and lock acquisition must be atomic per
/// key within the backend.
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Try to take (or renew) the lease on an edge lock. `Ok(false)` means
    /// another live owner holds it; the caller becomes a follower. Never
    /// blocks waiting for the lock.
    async fn acquire_lock(&self, key: &LockKey, owner: &str) -> StoreResult<bool>;

    /// Release a held lock. Releasing a lock owned by someone else is a
    /// quiet no-op: the sitting owner keeps it.
    async fn release_lock(&self, key: &LockKey, owner: &str) -> StoreResult<()>;

    /// Publish one stamped traffic report for the edge master to consume.
    async fn report_stats(&self, report: StatsReport) -> StoreResult<()>;

    /// Subscribe to the stats stream of one job. Reports published before
    /// the subscription are not replayed.
    async fn watch_stats(&self, job_id: &str) -> StoreResult<broadcast::Receiver<StatsReport>>;

    /// Write (or refresh) this worker's discovery record.
    async fn register_instance(&self, instance: DiscoveryInstance) -> StoreResult<()>;

    /// Remove a worker's discovery record.
    async fn deregister_instance(&self, worker_id: &WorkerId) -> StoreResult<()>;

    /// All discovery records matching the filter, in no particular order.
    async fn list_discovery(&self, filter: &DiscoveryFilter)
    -> StoreResult<Vec<DiscoveryInstance>>;

    /// Backlog of the external algorithm queue, `None` when the backend
    /// has no record for the algorithm.
    async fn queue_depth(&self, algorithm: &str) -> StoreResult<Option<u64>>;

    /// Why the external scheduler cannot place the algorithm right now,
    /// `None` when placement is fine.
    async fn unscheduled_reason(&self, algorithm: &str) -> StoreResult<Option<String>>;

    /// Ask the fleet to stop one worker. Takes effect asynchronously; the
    /// census catches up on a later discovery poll.
    async fn stop_worker(&self, worker_id: &WorkerId) -> StoreResult<()>;

    /// Hand a scale-up job (N task descriptors) to the external queue.
    async fn enqueue_scale_job(&self, job: ScaleJobSpec) -> StoreResult<()>;

    /// The pipeline definition for a job, read once at job start.
    async fn pipeline_definition(&self, job_id: &str) -> StoreResult<PipelineDef>;
}
