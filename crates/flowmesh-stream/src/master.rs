//! Master side of an edge: the elected scaling authority for one node.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowmesh_core::{
    DiscoveryInstance, EdgeThroughput, JobId, NodeName, NodeScaleMetrics, PipelineNode,
    ScaleAction, ScaleJobSpec, ScaleTaskSpec, StatsReport, StreamConfig,
};
use flowmesh_discovery::Census;
use flowmesh_scale::{AutoScaler, PendingScale, ScaleEnv, Scaler, ScalerConfig};
use flowmesh_stats::Statistics;
use flowmesh_store::{CoordStore, StoreResult};

/// The scaler's window on the world, wired for one downstream node: census
/// for the live size, the external queue for back-pressure signals, the
/// store for actuation.
struct MasterEnv {
    store: Arc<dyn CoordStore>,
    node: PipelineNode,
    job_id: JobId,
    census: Census,
    /// Shared with the owning adapter, which re-checks it each tick.
    pending: Arc<Mutex<PendingScale>>,
}

#[async_trait]
impl ScaleEnv for MasterEnv {
    async fn current_size(&self) -> u32 {
        self.census.count(&self.node.node_name) as u32
    }

    async fn queue_depth(&self) -> anyhow::Result<Option<u64>> {
        Ok(self.store.queue_depth(&self.node.algorithm_name).await?)
    }

    async fn unscheduled_reason(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .store
            .unscheduled_reason(&self.node.algorithm_name)
            .await?)
    }

    async fn scale_up(&self, action: ScaleAction) -> anyhow::Result<()> {
        let job = build_scale_job(&self.job_id, &self.node, action.replicas);
        info!(
            node = %self.node.node_name,
            replicas = action.replicas,
            scale_to = action.scale_to,
            "enqueueing scale-up job"
        );
        self.store.enqueue_scale_job(job).await?;
        self.pending.lock().unwrap().update_up(action.scale_to);
        Ok(())
    }

    async fn scale_down(&self, action: ScaleAction) -> anyhow::Result<()> {
        let instances = self.census.instances(&self.node.node_name);
        let victims = select_victims(instances, action.replicas as usize);

        // Partial failure is fine: the next tick re-evaluates against the
        // fresh census instead of retrying here.
        let mut stopped = 0u32;
        for victim in victims {
            match self.store.stop_worker(&victim.worker_id).await {
                Ok(()) => stopped += 1,
                Err(e) => {
                    warn!(worker = %victim.worker_id, error = %e, "stop command failed");
                }
            }
        }
        info!(
            node = %self.node.node_name,
            stopped,
            scale_to = action.scale_to,
            "issued stop commands"
        );
        self.pending.lock().unwrap().update_down(action.scale_to);
        Ok(())
    }
}

/// Elected scaling authority for one downstream node.
///
/// Owns the node's [`AutoScaler`] (statistics, policy, scaler) and the
/// [`PendingScale`] debounce, and holds the store subscription carrying
/// the slaves' reports. Everything is mutated only from `scale()`: the
/// subscription buffers reports between ticks, and the tick starts by
/// draining them into the windows.
pub struct MasterAdapter {
    target: NodeName,
    autoscaler: AutoScaler,
    pending: Arc<Mutex<PendingScale>>,
    census: Census,
    subscription: broadcast::Receiver<StatsReport>,
}

impl MasterAdapter {
    pub async fn new(
        store: Arc<dyn CoordStore>,
        job_id: &str,
        node: PipelineNode,
        config: &StreamConfig,
        census: Census,
    ) -> StoreResult<Self> {
        let subscription = store.watch_stats(job_id).await?;
        let pending = Arc::new(Mutex::new(PendingScale::new(Duration::from_millis(
            config.min_time_wait_before_retry_scale_ms,
        ))));

        let env = Arc::new(MasterEnv {
            store,
            node: node.clone(),
            job_id: job_id.to_string(),
            census: census.clone(),
            pending: pending.clone(),
        });
        let scaler = Scaler::new(&node.node_name, ScalerConfig::from_stream(config), env);

        let lookup = census.clone();
        let stats = Statistics::new(config.statistics.max_window_size)
            .with_size_lookup(Box::new(move |name| lookup.count(name) as u32));

        let target = node.node_name.clone();
        Ok(Self {
            target,
            autoscaler: AutoScaler::new(node, config, stats, scaler),
            pending,
            census,
            subscription,
        })
    }

    /// Fold one locally observed report straight into the windows.
    pub fn report(&mut self, report: &StatsReport) {
        self.autoscaler.report(report);
    }

    /// One control-loop evaluation: drain the slaves' buffered reports,
    /// re-check the pending debounce against the census, then run the
    /// policy and the scaler.
    pub async fn scale(&mut self) -> anyhow::Result<()> {
        self.drain_subscription();
        let current = self.census.count(&self.target) as u32;
        self.pending.lock().unwrap().check(current);
        self.autoscaler.tick(current).await
    }

    /// Scaler state for the `MetricsChanged` event.
    pub fn metrics(&self) -> NodeScaleMetrics {
        self.autoscaler
            .metrics(self.census.count(&self.target) as u32)
    }

    /// Per-edge throughput for the `ThroughputChanged` event.
    pub fn throughput(&self) -> Vec<EdgeThroughput> {
        self.autoscaler.throughput()
    }

    /// Whether an issued scale action is still being realized.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().unwrap().is_pending()
    }

    /// Release the subscription and retire the scaler. Buffered reports
    /// are discarded.
    pub fn finish(self) {
        debug!(target = %self.target, "master adapter finished, subscription released");
    }

    fn drain_subscription(&mut self) {
        loop {
            match self.subscription.try_recv() {
                Ok(report) => {
                    if report.target == self.target {
                        self.autoscaler.report(&report);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(target = %self.target, skipped, "stats subscription lagged, reports dropped");
                }
                Err(_) => break,
            }
        }
    }
}

/// Expand a node's declared input template into `replicas` independent task
/// descriptors, each with a fresh task id, tagged as scaling-originated.
fn build_scale_job(job_id: &str, node: &PipelineNode, replicas: u32) -> ScaleJobSpec {
    let tasks = (0..replicas)
        .map(|_| ScaleTaskSpec {
            task_id: Uuid::new_v4().to_string(),
            node_name: node.node_name.clone(),
            algorithm_name: node.algorithm_name.clone(),
            input: node.input.clone(),
        })
        .collect();

    ScaleJobSpec {
        job_id: job_id.to_string(),
        node_name: node.node_name.clone(),
        tasks,
        is_scaled: true,
    }
}

/// Pick `count` instances to stop. Non-masters go first; masters are only
/// taken when nothing else is left (which includes scaling to zero).
fn select_victims(mut instances: Vec<DiscoveryInstance>, count: usize) -> Vec<DiscoveryInstance> {
    instances.sort_by_key(|i| i.is_master);
    instances.truncate(count);
    instances
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use serde_json::json;

    use flowmesh_core::{ScaleStatus, StateType, TrafficSample, WorkerStatus};
    use flowmesh_discovery::ServiceDiscovery;
    use flowmesh_store::MemoryStore;

    fn target_node() -> PipelineNode {
        PipelineNode {
            node_name: "D".to_string(),
            algorithm_name: "alg-d".to_string(),
            state_type: StateType::Stateless,
            kind: "algorithm".to_string(),
            min_replicas: None,
            max_replicas: None,
            parents: vec!["A".to_string()],
            children: vec![],
            input: vec![json!({"stream": "s1"})],
        }
    }

    fn d_instance(worker: &str, is_master: bool) -> DiscoveryInstance {
        DiscoveryInstance {
            job_id: "job-1".to_string(),
            node_name: "D".to_string(),
            worker_id: worker.to_string(),
            address: "10.0.0.2:9020".to_string(),
            is_master,
            worker_status: WorkerStatus::Working,
        }
    }

    fn backlog_sample(queue: u64) -> StatsReport {
        TrafficSample {
            node_name: "D".to_string(),
            queue_size: queue,
            sent: 0,
            responses: 0,
            durations: vec![],
            current_size: None,
        }
        .stamp("job-1", "A")
    }

    /// Census fed through a real discovery poll, as in production.
    async fn polled_census(store: &MemoryStore) -> Census {
        let (tx, _rx) = tokio::sync::broadcast::channel(8);
        let mut discovery = ServiceDiscovery::new(
            Arc::new(store.clone()),
            "job-1",
            "observer",
            target_node(),
            Duration::from_secs(3600),
            tx,
        );
        discovery.tick().await.unwrap();
        discovery.census()
    }

    async fn make_master(store: &MemoryStore, config: &StreamConfig, census: Census) -> MasterAdapter {
        MasterAdapter::new(
            Arc::new(store.clone()),
            "job-1",
            target_node(),
            config,
            census,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn scale_up_enqueues_a_tagged_job_with_fresh_task_ids() {
        let store = MemoryStore::new();
        let config = StreamConfig::default();
        let mut master = make_master(&store, &config, Census::default()).await;

        master.report(&backlog_sample(5));
        master.scale().await.unwrap();

        let jobs = store.scale_jobs().await;
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.node_name, "D");
        assert!(job.is_scaled);
        assert_eq!(job.tasks.len(), 3);

        let ids: HashSet<_> = job.tasks.iter().map(|t| t.task_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        for task in &job.tasks {
            assert_eq!(task.algorithm_name, "alg-d");
            assert_eq!(task.input, vec![json!({"stream": "s1"})]);
        }
        assert!(master.is_pending());
    }

    #[tokio::test]
    async fn buffered_slave_reports_drive_the_next_tick() {
        let store = MemoryStore::new();
        let config = StreamConfig::default();
        let mut master = make_master(&store, &config, Census::default()).await;

        // A slave on another worker publishes; an unrelated target too.
        store.report_stats(backlog_sample(5)).await.unwrap();
        let mut other = backlog_sample(100);
        other.target = "E".to_string();
        store.report_stats(other).await.unwrap();

        master.scale().await.unwrap();

        let jobs = store.scale_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].tasks.len(), 3);
        // Only the adapter's own target was folded in.
        assert_eq!(master.throughput().len(), 1);
        assert_eq!(master.throughput()[0].source, "A");
    }

    #[tokio::test]
    async fn scale_down_stops_non_masters_first() {
        let store = MemoryStore::new();
        store.register_instance(d_instance("d1", true)).await.unwrap();
        store.register_instance(d_instance("d2", false)).await.unwrap();
        store.register_instance(d_instance("d3", false)).await.unwrap();
        let census = polled_census(&store).await;

        let mut config = StreamConfig::default();
        config.scale_down.min_time_idle_before_replica_down_ms = 0;
        config.min_time_wait_before_retry_scale_ms = 0;
        let mut node = target_node();
        node.min_replicas = Some(1);
        let mut master = MasterAdapter::new(
            Arc::new(store.clone()),
            "job-1",
            node,
            &config,
            census,
        )
        .await
        .unwrap();

        // No traffic at all: idle from the first evaluation, released down
        // to the floor of one.
        master.scale().await.unwrap();

        let stopped: HashSet<_> = store.stopped_workers().await.into_iter().collect();
        assert_eq!(stopped, HashSet::from(["d2".to_string(), "d3".to_string()]));
    }

    #[tokio::test]
    async fn scaling_to_zero_takes_the_master_too() {
        let store = MemoryStore::new();
        store.register_instance(d_instance("d1", true)).await.unwrap();
        store.register_instance(d_instance("d2", false)).await.unwrap();
        let census = polled_census(&store).await;

        let mut config = StreamConfig::default();
        config.scale_down.min_time_idle_before_replica_down_ms = 0;
        config.min_time_wait_before_retry_scale_ms = 0;
        let mut master = make_master(&store, &config, census).await;

        master.scale().await.unwrap();

        assert_eq!(store.stopped_workers().await.len(), 2);
    }

    #[tokio::test]
    async fn queue_state_surfaces_in_the_scaler_status() {
        let store = MemoryStore::new();
        let config = StreamConfig::default();
        let mut master = make_master(&store, &config, Census::default()).await;

        store.set_queue_depth("alg-d", 4).await;
        master.scale().await.unwrap();
        assert_eq!(master.metrics().status, ScaleStatus::PendingQueue);

        // An unscheduled reason outranks a plain backlog.
        store
            .set_unscheduled_reason("alg-d", Some("insufficient cpu"))
            .await;
        master.scale().await.unwrap();
        assert_eq!(master.metrics().status, ScaleStatus::UnableScale);

        store.set_unscheduled_reason("alg-d", None).await;
        store.set_queue_depth("alg-d", 0).await;
        master.scale().await.unwrap();
        assert_eq!(master.metrics().status, ScaleStatus::Idle);
    }

    #[tokio::test]
    async fn pending_up_clears_once_the_census_catches_up() {
        let store = MemoryStore::new();
        let mut config = StreamConfig::default();
        config.min_time_wait_before_retry_scale_ms = 0;

        // The adapter keeps the same census handle the discovery loop
        // refreshes, so later polls are visible to it.
        let (tx, _rx) = tokio::sync::broadcast::channel(8);
        let mut discovery = ServiceDiscovery::new(
            Arc::new(store.clone()),
            "job-1",
            "observer",
            target_node(),
            Duration::from_secs(3600),
            tx,
        );
        discovery.tick().await.unwrap();
        let mut master = make_master(&store, &config, discovery.census()).await;

        master.report(&backlog_sample(5));
        master.scale().await.unwrap();
        assert!(master.is_pending());

        // Three replicas come up; the next poll sees them.
        for id in ["d1", "d2", "d3"] {
            store.register_instance(d_instance(id, false)).await.unwrap();
        }
        discovery.tick().await.unwrap();

        master.scale().await.unwrap();
        assert!(!master.is_pending());
        // Demand is already met: no second job.
        assert_eq!(store.scale_jobs().await.len(), 1);
    }
}
