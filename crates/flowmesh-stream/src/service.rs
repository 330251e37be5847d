//! The assembled worker sidecar: registration, control loops, shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use flowmesh_core::{
    DiscoveryInstance, JobId, StreamConfig, TrafficSample, WorkerEvent, WorkerId, WorkerStatus,
};
use flowmesh_discovery::ServiceDiscovery;
use flowmesh_election::Election;
use flowmesh_store::{CoordStore, StoreResult};

use crate::collectors::{MetricsCollector, ThroughputCollector};
use crate::interval::{Interval, Tick};
use crate::proxy::AdaptersProxy;

/// Buffered events per subscriber before a slow one starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Identity and configuration of one worker process.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub job_id: String,
    pub worker_id: String,
    /// The pipeline node this worker runs.
    pub node_name: String,
    /// Address published in the discovery record.
    pub address: String,
    pub config: StreamConfig,
}

/// Keeps this worker's discovery record fresh. Re-written every election
/// round so the registry doubles as a liveness heartbeat and carries the
/// current master flag.
struct Registrar {
    store: Arc<dyn CoordStore>,
    record: DiscoveryInstance,
}

impl Registrar {
    fn new(store: Arc<dyn CoordStore>, ctx: &WorkerContext) -> Self {
        Self {
            store,
            record: DiscoveryInstance {
                job_id: ctx.job_id.clone(),
                node_name: ctx.node_name.clone(),
                worker_id: ctx.worker_id.clone(),
                address: ctx.address.clone(),
                is_master: false,
                worker_status: WorkerStatus::Working,
            },
        }
    }

    async fn register(&self) -> StoreResult<()> {
        self.store.register_instance(self.record.clone()).await
    }

    async fn refresh(&mut self, is_master: bool) -> StoreResult<()> {
        self.record.is_master = is_master;
        self.register().await
    }
}

/// Election round: acquire, re-apply every decided role to the adapter
/// table, refresh the registration.
struct ElectionJob {
    election: Arc<Mutex<Election>>,
    proxy: Arc<AdaptersProxy>,
    registrar: Registrar,
}

#[async_trait]
impl Tick for ElectionJob {
    async fn tick(&mut self) -> anyhow::Result<()> {
        let roles = {
            let mut election = self.election.lock().await;
            election.tick().await;
            election.roles()
        };

        // The whole set, not just this round's changes: a bind that failed
        // on a previous round gets another chance here.
        for (edge, role) in &roles {
            if let Err(e) = self.proxy.bind(edge, *role).await {
                warn!(
                    source = %edge.source,
                    target = %edge.target,
                    error = %e,
                    "adapter bind failed"
                );
            }
        }

        self.registrar.refresh(self.proxy.masters_any().await).await?;
        Ok(())
    }
}

struct DiscoveryJob {
    discovery: ServiceDiscovery,
}

#[async_trait]
impl Tick for DiscoveryJob {
    async fn tick(&mut self) -> anyhow::Result<()> {
        Ok(self.discovery.tick().await?)
    }
}

struct ScaleJob {
    proxy: Arc<AdaptersProxy>,
}

#[async_trait]
impl Tick for ScaleJob {
    async fn tick(&mut self) -> anyhow::Result<()> {
        self.proxy.scale().await;
        Ok(())
    }
}

/// One worker's autoscaling sidecar, fully assembled.
///
/// `start` registers the worker and spawns the control loops; the wrapper
/// then feeds [`TrafficSample`]s through [`report`](Self::report) and may
/// watch the event bus via [`subscribe`](Self::subscribe). `stop` takes
/// the service down in order: loops first, then locks, adapters, and the
/// discovery record.
pub struct StreamService {
    store: Arc<dyn CoordStore>,
    job_id: JobId,
    worker_id: WorkerId,
    election: Arc<Mutex<Election>>,
    proxy: Arc<AdaptersProxy>,
    events: broadcast::Sender<WorkerEvent>,
    intervals: Vec<Interval>,
}

impl StreamService {
    pub async fn start(store: Arc<dyn CoordStore>, ctx: WorkerContext) -> anyhow::Result<Self> {
        let pipeline = store.pipeline_definition(&ctx.job_id).await?;
        let node = pipeline
            .node(&ctx.node_name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("node {} is not part of the pipeline", ctx.node_name))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let discovery = ServiceDiscovery::new(
            store.clone(),
            &ctx.job_id,
            &ctx.worker_id,
            node.clone(),
            Duration::from_millis(ctx.config.time_wait_on_parents_down_ms),
            events.clone(),
        );
        let proxy = Arc::new(AdaptersProxy::new(
            store.clone(),
            &ctx.job_id,
            &ctx.node_name,
            pipeline,
            ctx.config.clone(),
            discovery.census(),
        ));
        let election = Arc::new(Mutex::new(Election::new(
            store.clone(),
            &ctx.job_id,
            &ctx.worker_id,
            node,
        )));

        let registrar = Registrar::new(store.clone(), &ctx);
        registrar.register().await?;
        info!(
            job = %ctx.job_id,
            worker = %ctx.worker_id,
            node = %ctx.node_name,
            "stream service starting"
        );

        let intervals = vec![
            Interval::spawn(
                "election",
                ctx.config.election_interval(),
                ElectionJob {
                    election: election.clone(),
                    proxy: proxy.clone(),
                    registrar,
                },
            ),
            Interval::spawn(
                "discovery",
                ctx.config.discovery_interval(),
                DiscoveryJob { discovery },
            ),
            Interval::spawn(
                "scale",
                ctx.config.scale_interval(),
                ScaleJob {
                    proxy: proxy.clone(),
                },
            ),
            Interval::spawn(
                "metrics",
                ctx.config.scale_interval(),
                MetricsCollector::new(&ctx.job_id, proxy.clone(), events.clone()),
            ),
            Interval::spawn(
                "throughput",
                ctx.config.scale_interval(),
                ThroughputCollector::new(&ctx.job_id, proxy.clone(), events.clone()),
            ),
        ];

        Ok(Self {
            store,
            job_id: ctx.job_id,
            worker_id: ctx.worker_id,
            election,
            proxy,
            events,
            intervals,
        })
    }

    /// Subscribe to the worker's event bus. Events published before the
    /// subscription are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Feed one locally observed traffic sample into the edge machinery.
    pub async fn report(&self, sample: TrafficSample) -> StoreResult<()> {
        self.proxy.report(sample).await
    }

    /// Graceful shutdown: control loops, then locks, adapters, and the
    /// discovery record.
    pub async fn stop(mut self) {
        info!(job = %self.job_id, worker = %self.worker_id, "stream service stopping");
        // Signal every loop before joining any, so they wind down together.
        for interval in &self.intervals {
            interval.stop();
        }
        for interval in self.intervals.drain(..) {
            interval.shutdown().await;
        }
        self.election.lock().await.release_all().await;
        self.proxy.finish().await;
        if let Err(e) = self.store.deregister_instance(&self.worker_id).await {
            warn!(worker = %self.worker_id, error = %e, "deregistration failed, record left behind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use flowmesh_core::{Edge, PipelineDef, PipelineNode, StateType};
    use flowmesh_store::{DiscoveryFilter, MemoryStore};

    fn pipeline() -> PipelineDef {
        PipelineDef {
            nodes: vec![PipelineNode {
                node_name: "A".to_string(),
                algorithm_name: "alg-a".to_string(),
                state_type: StateType::Stateful,
                kind: "algorithm".to_string(),
                min_replicas: None,
                max_replicas: None,
                parents: vec![],
                children: vec!["D".to_string()],
                input: vec![],
            }],
            edges: vec![Edge::new("A", "D")],
        }
    }

    fn ctx(node: &str) -> WorkerContext {
        WorkerContext {
            job_id: "job-1".to_string(),
            worker_id: "w1".to_string(),
            node_name: node.to_string(),
            address: "10.0.0.1:9020".to_string(),
            config: StreamConfig::default(),
        }
    }

    #[tokio::test]
    async fn start_needs_a_pipeline_definition() {
        let store = MemoryStore::new();
        let result = StreamService::start(Arc::new(store), ctx("A")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_rejects_a_node_outside_the_pipeline() {
        let store = MemoryStore::new();
        store.put_pipeline("job-1", pipeline()).await;

        let result = StreamService::start(Arc::new(store), ctx("X")).await;
        let err = result.err().unwrap().to_string();
        assert!(err.contains("not part of the pipeline"), "got: {err}");
    }

    #[tokio::test]
    async fn start_registers_and_stop_deregisters() {
        let store = MemoryStore::new();
        store.put_pipeline("job-1", pipeline()).await;

        let service = StreamService::start(Arc::new(store.clone()), ctx("A"))
            .await
            .unwrap();

        let records = store
            .list_discovery(&DiscoveryFilter::job("job-1"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].worker_id, "w1");
        assert_eq!(records[0].worker_status, WorkerStatus::Working);
        assert!(!records[0].is_master);

        service.stop().await;
        let records = store
            .list_discovery(&DiscoveryFilter::job("job-1"))
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
