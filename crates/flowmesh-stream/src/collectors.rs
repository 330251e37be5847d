//! Periodic event-bus snapshots of the worker's mastered edges.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use flowmesh_core::{JobId, MetricsReport, ThroughputReport, WorkerEvent};

use crate::interval::Tick;
use crate::proxy::AdaptersProxy;

/// Publishes [`WorkerEvent::MetricsChanged`] snapshots. Quiet while the
/// worker masters nothing.
pub struct MetricsCollector {
    job_id: JobId,
    proxy: Arc<AdaptersProxy>,
    events: broadcast::Sender<WorkerEvent>,
}

impl MetricsCollector {
    pub fn new(job_id: &str, proxy: Arc<AdaptersProxy>, events: broadcast::Sender<WorkerEvent>) -> Self {
        Self {
            job_id: job_id.to_string(),
            proxy,
            events,
        }
    }
}

#[async_trait]
impl Tick for MetricsCollector {
    async fn tick(&mut self) -> anyhow::Result<()> {
        let nodes = self.proxy.metrics().await;
        if nodes.is_empty() {
            return Ok(());
        }
        let _ = self.events.send(WorkerEvent::MetricsChanged(MetricsReport {
            job_id: self.job_id.clone(),
            nodes,
        }));
        Ok(())
    }
}

/// Publishes [`WorkerEvent::ThroughputChanged`] snapshots, one edge entry
/// per traffic source seen in the windows.
pub struct ThroughputCollector {
    job_id: JobId,
    proxy: Arc<AdaptersProxy>,
    events: broadcast::Sender<WorkerEvent>,
}

impl ThroughputCollector {
    pub fn new(job_id: &str, proxy: Arc<AdaptersProxy>, events: broadcast::Sender<WorkerEvent>) -> Self {
        Self {
            job_id: job_id.to_string(),
            proxy,
            events,
        }
    }
}

#[async_trait]
impl Tick for ThroughputCollector {
    async fn tick(&mut self) -> anyhow::Result<()> {
        let edges = self.proxy.throughput().await;
        if edges.is_empty() {
            return Ok(());
        }
        let _ = self.events.send(WorkerEvent::ThroughputChanged(ThroughputReport {
            job_id: self.job_id.clone(),
            edges,
        }));
        Ok(())
    }
}
