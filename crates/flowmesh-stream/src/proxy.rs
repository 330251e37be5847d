//! Role-dispatching adapter registry for a worker's outbound edges.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use flowmesh_core::{
    Edge, EdgeThroughput, JobId, NodeName, NodeScaleMetrics, PipelineDef, Role, StreamConfig,
    TrafficSample,
};
use flowmesh_discovery::Census;
use flowmesh_store::{CoordStore, StoreError, StoreResult};

use crate::master::MasterAdapter;
use crate::slave::SlaveAdapter;

/// What a worker holds for one outbound edge, per the election outcome.
pub enum NodeAdapter {
    Master(MasterAdapter),
    Slave(SlaveAdapter),
}

impl NodeAdapter {
    pub fn is_master(&self) -> bool {
        matches!(self, NodeAdapter::Master(_))
    }
}

/// The worker's edge-adapter table, keyed by target node.
///
/// The election loop binds and upgrades adapters; the wrapper's traffic
/// samples are stamped here (once) and dispatched to the edge's adapter.
/// Because a role never moves back from master, an upgrade rebuilds the
/// adapter and a re-bind of the same role is a no-op.
pub struct AdaptersProxy {
    store: Arc<dyn CoordStore>,
    job_id: JobId,
    /// The worker's own node, the source side of every edge in the table.
    source: NodeName,
    pipeline: PipelineDef,
    config: StreamConfig,
    census: Census,
    adapters: RwLock<HashMap<NodeName, NodeAdapter>>,
}

impl AdaptersProxy {
    pub fn new(
        store: Arc<dyn CoordStore>,
        job_id: &str,
        source: &str,
        pipeline: PipelineDef,
        config: StreamConfig,
        census: Census,
    ) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
            source: source.to_string(),
            pipeline,
            config,
            census,
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Install or upgrade the adapter for an edge after an election round.
    pub async fn bind(&self, edge: &Edge, role: Role) -> StoreResult<()> {
        let mut adapters = self.adapters.write().await;
        match adapters.get(&edge.target) {
            None => {
                let adapter = self.make_adapter(&edge.target, role).await?;
                info!(target = %edge.target, role = ?role, "adapter bound");
                adapters.insert(edge.target.clone(), adapter);
            }
            Some(NodeAdapter::Slave(_)) if role == Role::Master => {
                let adapter = self.make_adapter(&edge.target, role).await?;
                info!(target = %edge.target, "adapter upgraded to master");
                adapters.insert(edge.target.clone(), adapter);
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Stamp one locally observed sample and hand it to the edge's
    /// adapter: folded into the windows on a master, forwarded to the
    /// store on a slave, dropped when the edge has no adapter yet.
    pub async fn report(&self, sample: TrafficSample) -> StoreResult<()> {
        let report = sample.stamp(&self.job_id, &self.source);
        let mut adapters = self.adapters.write().await;
        match adapters.get_mut(&report.target) {
            Some(NodeAdapter::Master(master)) => {
                master.report(&report);
                Ok(())
            }
            Some(NodeAdapter::Slave(slave)) => slave.report(report).await,
            None => {
                debug!(target = %report.target, "report for an unbound edge dropped");
                Ok(())
            }
        }
    }

    /// One scaling evaluation across every mastered edge. A failing
    /// target is logged and the rest still run.
    pub async fn scale(&self) {
        let mut adapters = self.adapters.write().await;
        for (target, adapter) in adapters.iter_mut() {
            if let NodeAdapter::Master(master) = adapter
                && let Err(e) = master.scale().await
            {
                warn!(target = %target, error = %e, "scale evaluation failed");
            }
        }
    }

    /// Scaler state of every mastered edge.
    pub async fn metrics(&self) -> Vec<NodeScaleMetrics> {
        self.adapters
            .read()
            .await
            .values()
            .filter_map(|adapter| match adapter {
                NodeAdapter::Master(master) => Some(master.metrics()),
                NodeAdapter::Slave(_) => None,
            })
            .collect()
    }

    /// Edge throughput of every mastered edge, one entry per source.
    pub async fn throughput(&self) -> Vec<EdgeThroughput> {
        self.adapters
            .read()
            .await
            .values()
            .flat_map(|adapter| match adapter {
                NodeAdapter::Master(master) => master.throughput(),
                NodeAdapter::Slave(_) => Vec::new(),
            })
            .collect()
    }

    /// Whether this worker currently masters any edge.
    pub async fn masters_any(&self) -> bool {
        self.adapters.read().await.values().any(NodeAdapter::is_master)
    }

    /// Drop every adapter, retiring the masters' subscriptions.
    pub async fn finish(&self) {
        let mut adapters = self.adapters.write().await;
        for (target, adapter) in adapters.drain() {
            match adapter {
                NodeAdapter::Master(master) => master.finish(),
                NodeAdapter::Slave(_) => debug!(target = %target, "slave adapter dropped"),
            }
        }
    }

    async fn make_adapter(&self, target: &str, role: Role) -> StoreResult<NodeAdapter> {
        let node = self
            .pipeline
            .node(target)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("pipeline node {target}")))?;

        Ok(match role {
            Role::Master => NodeAdapter::Master(
                MasterAdapter::new(
                    self.store.clone(),
                    &self.job_id,
                    node,
                    &self.config,
                    self.census.clone(),
                )
                .await?,
            ),
            Role::Slave => NodeAdapter::Slave(SlaveAdapter::new(self.store.clone())),
        })
    }
}
