//! Registry polling and the per-node instance census.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use flowmesh_core::{
    DiscoveryChange, DiscoveryInstance, JobId, NodeName, ParentsDownInfo, PipelineNode,
    WorkerEvent, WorkerId, WorkerStatus,
};
use flowmesh_scale::TimeMarker;
use flowmesh_store::{CoordStore, DiscoveryFilter, StoreResult};

/// Shared snapshot of live instances per node, replaced wholesale on each
/// successful poll.
///
/// Reads are synchronous so the census can back the statistics size
/// lookup; the lock is held only for a hash map access.
#[derive(Clone, Default)]
pub struct Census {
    inner: Arc<RwLock<HashMap<NodeName, Vec<DiscoveryInstance>>>>,
}

impl Census {
    /// Live instance count for a node; zero when the node is unknown.
    pub fn count(&self, node: &str) -> usize {
        self.inner.read().unwrap().get(node).map_or(0, Vec::len)
    }

    /// Snapshot of a node's live instances.
    pub fn instances(&self, node: &str) -> Vec<DiscoveryInstance> {
        self.inner
            .read()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    fn replace(&self, next: HashMap<NodeName, Vec<DiscoveryInstance>>) {
        *self.inner.write().unwrap() = next;
    }
}

/// Periodic registry poller for one worker.
///
/// Each tick re-reads the job's discovery records, drops this worker's own
/// record and anything already `Stopped`, and diffs the sets of the node's
/// *parents* against the previous poll. Parent membership changes go out as
/// [`WorkerEvent::DiscoveryChanged`]; a sustained outage of every parent
/// goes out once per episode as [`WorkerEvent::ParentsDown`].
pub struct ServiceDiscovery {
    store: Arc<dyn CoordStore>,
    job_id: JobId,
    worker_id: WorkerId,
    node: PipelineNode,
    /// How long every parent must stay absent before the outage is announced.
    parents_down_after: Duration,
    census: Census,
    outage: TimeMarker,
    outage_announced: bool,
    events: broadcast::Sender<WorkerEvent>,
}

impl ServiceDiscovery {
    pub fn new(
        store: Arc<dyn CoordStore>,
        job_id: &str,
        worker_id: &str,
        node: PipelineNode,
        parents_down_after: Duration,
        events: broadcast::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
            node,
            parents_down_after,
            census: Census::default(),
            outage: TimeMarker::new(),
            outage_announced: false,
            events,
        }
    }

    /// Handle to the shared census, for size lookups outside the poll loop.
    pub fn census(&self) -> Census {
        self.census.clone()
    }

    /// Live instance count for a node, per the latest poll.
    pub fn count_instances(&self, node: &str) -> usize {
        self.census.count(node)
    }

    /// Live instances of a node, per the latest poll.
    pub fn instances(&self, node: &str) -> Vec<DiscoveryInstance> {
        self.census.instances(node)
    }

    /// One poll of the registry. A store error leaves the census and the
    /// outage clock untouched; the next tick retries.
    pub async fn tick(&mut self) -> StoreResult<()> {
        let records = self
            .store
            .list_discovery(&DiscoveryFilter::job(&self.job_id))
            .await?;

        let mut next: HashMap<NodeName, Vec<DiscoveryInstance>> = HashMap::new();
        for record in records {
            if record.worker_id == self.worker_id {
                continue;
            }
            if record.worker_status == WorkerStatus::Stopped {
                continue;
            }
            next.entry(record.node_name.clone()).or_default().push(record);
        }

        for parent in &self.node.parents {
            let before = self.census.instances(parent);
            let after = next.get(parent).cloned().unwrap_or_default();

            let added: Vec<DiscoveryInstance> = after
                .iter()
                .filter(|a| !before.iter().any(|b| b.worker_id == a.worker_id))
                .cloned()
                .collect();
            let removed: Vec<DiscoveryInstance> = before
                .into_iter()
                .filter(|b| !after.iter().any(|a| a.worker_id == b.worker_id))
                .collect();

            if !added.is_empty() || !removed.is_empty() {
                debug!(
                    parent = %parent,
                    added = added.len(),
                    removed = removed.len(),
                    total = after.len(),
                    "parent instance set changed"
                );
                let _ = self.events.send(WorkerEvent::DiscoveryChanged(DiscoveryChange {
                    node_name: parent.clone(),
                    added,
                    removed,
                    total: after.len(),
                }));
            }
        }

        self.census.replace(next);
        self.check_parents();
        Ok(())
    }

    /// Track the all-parents-absent condition and announce it once it has
    /// held for `parents_down_after`. One announcement per outage; any
    /// parent reappearing resets both the clock and the announcement.
    fn check_parents(&mut self) {
        if self.node.parents.is_empty() || !self.node.is_stateless() {
            return;
        }

        let all_absent = self.node.parents.iter().all(|p| self.census.count(p) == 0);
        self.outage.update(all_absent);
        if !all_absent {
            self.outage_announced = false;
            return;
        }
        if self.outage_announced || !self.outage.exceeds(self.parents_down_after) {
            return;
        }

        let down_for_ms = self.outage.sustained().as_millis() as u64;
        warn!(node = %self.node.node_name, down_for_ms, "every parent is down");
        self.outage_announced = true;
        let _ = self.events.send(WorkerEvent::ParentsDown(ParentsDownInfo {
            node_name: self.node.node_name.clone(),
            parents: self.node.parents.clone(),
            down_for_ms,
        }));
    }
}
