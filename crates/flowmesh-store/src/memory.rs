//! In-memory coordination store.
//!
//! Backs every test and the daemon's standalone mode. Implements the full
//! [`CoordStore`] contract in-process: leased locks, a per-job stats
//! broadcast, a discovery registry, and recorders for the actuation calls
//! (worker stops, scale jobs) so callers can observe what was issued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::debug;

use flowmesh_core::{
    DiscoveryInstance, JobId, LockKey, PipelineDef, ScaleJobSpec, StatsReport, WorkerId,
    WorkerStatus,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{CoordStore, DiscoveryFilter};

/// Buffered reports per job before slow watchers start lagging.
const STATS_CHANNEL_CAPACITY: usize = 128;

/// One held edge lock.
struct LockEntry {
    owner: String,
    expires_at: Instant,
}

struct Inner {
    lease_ttl: Duration,
    locks: Mutex<HashMap<String, LockEntry>>,
    stats: Mutex<HashMap<JobId, broadcast::Sender<StatsReport>>>,
    discovery: RwLock<HashMap<WorkerId, DiscoveryInstance>>,
    queue_depths: RwLock<HashMap<String, u64>>,
    unscheduled: RwLock<HashMap<String, String>>,
    stopped: Mutex<Vec<WorkerId>>,
    scale_jobs: Mutex<Vec<ScaleJobSpec>>,
    pipelines: RwLock<HashMap<JobId, PipelineDef>>,
}

/// In-process [`CoordStore`] backend.
///
/// `Clone` + `Send` + `Sync` (backed by `Arc`), so one store can be shared
/// by many simulated workers in a single process.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create a store with the default lock lease (9 seconds, three
    /// default election intervals).
    pub fn new() -> Self {
        Self::with_lease_ttl(Duration::from_secs(9))
    }

    /// Create a store with an explicit lock lease TTL.
    pub fn with_lease_ttl(lease_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lease_ttl,
                locks: Mutex::new(HashMap::new()),
                stats: Mutex::new(HashMap::new()),
                discovery: RwLock::new(HashMap::new()),
                queue_depths: RwLock::new(HashMap::new()),
                unscheduled: RwLock::new(HashMap::new()),
                stopped: Mutex::new(Vec::new()),
                scale_jobs: Mutex::new(Vec::new()),
                pipelines: RwLock::new(HashMap::new()),
            }),
        }
    }

    // ── Seeding & inspection (not part of the trait) ──────────────

    /// Seed the pipeline definition for a job.
    pub async fn put_pipeline(&self, job_id: &str, def: PipelineDef) {
        self.inner
            .pipelines
            .write()
            .await
            .insert(job_id.to_string(), def);
    }

    /// Seed the backlog of an algorithm queue.
    pub async fn set_queue_depth(&self, algorithm: &str, depth: u64) {
        self.inner
            .queue_depths
            .write()
            .await
            .insert(algorithm.to_string(), depth);
    }

    /// Seed (or clear) the unscheduled reason for an algorithm.
    pub async fn set_unscheduled_reason(&self, algorithm: &str, reason: Option<&str>) {
        let mut map = self.inner.unscheduled.write().await;
        match reason {
            Some(r) => map.insert(algorithm.to_string(), r.to_string()),
            None => map.remove(algorithm),
        };
    }

    /// Worker ids that received a stop command, in issue order.
    pub async fn stopped_workers(&self) -> Vec<WorkerId> {
        self.inner.stopped.lock().await.clone()
    }

    /// Scale jobs enqueued so far, in issue order.
    pub async fn scale_jobs(&self) -> Vec<ScaleJobSpec> {
        self.inner.scale_jobs.lock().await.clone()
    }

    /// Current owner of an edge lock, if the lease is still live.
    pub async fn lock_owner(&self, key: &LockKey) -> Option<String> {
        let locks = self.inner.locks.lock().await;
        locks
            .get(&key.path())
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.owner.clone())
    }

    async fn stats_sender(&self, job_id: &str) -> broadcast::Sender<StatsReport> {
        let mut stats = self.inner.stats.lock().await;
        stats
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(STATS_CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordStore for MemoryStore {
    async fn acquire_lock(&self, key: &LockKey, owner: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut locks = self.inner.locks.lock().await;
        let path = key.path();

        match locks.get_mut(&path) {
            Some(entry) if entry.owner == owner => {
                // Lease renewal: winning again is the heartbeat.
                entry.expires_at = now + self.inner.lease_ttl;
                Ok(true)
            }
            Some(entry) if entry.expires_at > now => Ok(false),
            _ => {
                locks.insert(
                    path,
                    LockEntry {
                        owner: owner.to_string(),
                        expires_at: now + self.inner.lease_ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &LockKey, owner: &str) -> StoreResult<()> {
        let mut locks = self.inner.locks.lock().await;
        let path = key.path();
        if let Some(entry) = locks.get(&path) {
            if entry.owner == owner {
                locks.remove(&path);
            } else {
                debug!(lock = %path, owner, "release ignored: not the owner");
            }
        }
        Ok(())
    }

    async fn report_stats(&self, report: StatsReport) -> StoreResult<()> {
        let tx = self.stats_sender(&report.job_id).await;
        // No subscribers is fine; the report is simply unobserved.
        let _ = tx.send(report);
        Ok(())
    }

    async fn watch_stats(&self, job_id: &str) -> StoreResult<broadcast::Receiver<StatsReport>> {
        Ok(self.stats_sender(job_id).await.subscribe())
    }

    async fn register_instance(&self, instance: DiscoveryInstance) -> StoreResult<()> {
        self.inner
            .discovery
            .write()
            .await
            .insert(instance.worker_id.clone(), instance);
        Ok(())
    }

    async fn deregister_instance(&self, worker_id: &WorkerId) -> StoreResult<()> {
        self.inner.discovery.write().await.remove(worker_id);
        Ok(())
    }

    async fn list_discovery(
        &self,
        filter: &DiscoveryFilter,
    ) -> StoreResult<Vec<DiscoveryInstance>> {
        let discovery = self.inner.discovery.read().await;
        Ok(discovery
            .values()
            .filter(|i| i.job_id == filter.job_id)
            .cloned()
            .collect())
    }

    async fn queue_depth(&self, algorithm: &str) -> StoreResult<Option<u64>> {
        Ok(self.inner.queue_depths.read().await.get(algorithm).copied())
    }

    async fn unscheduled_reason(&self, algorithm: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.unscheduled.read().await.get(algorithm).cloned())
    }

    async fn stop_worker(&self, worker_id: &WorkerId) -> StoreResult<()> {
        self.inner.stopped.lock().await.push(worker_id.clone());
        // The census catches up: the record goes Stopped and later polls
        // filter it out.
        if let Some(instance) = self.inner.discovery.write().await.get_mut(worker_id) {
            instance.worker_status = WorkerStatus::Stopped;
        }
        Ok(())
    }

    async fn enqueue_scale_job(&self, job: ScaleJobSpec) -> StoreResult<()> {
        self.inner.scale_jobs.lock().await.push(job);
        Ok(())
    }

    async fn pipeline_definition(&self, job_id: &str) -> StoreResult<PipelineDef> {
        self.inner
            .pipelines
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("pipeline for job {job_id}")))
    }
}
