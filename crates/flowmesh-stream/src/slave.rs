//! Slave side of an edge: forward and forget.

use std::sync::Arc;

use tracing::debug;

use flowmesh_core::StatsReport;
use flowmesh_store::{CoordStore, StoreResult};

/// Passive reporter for an edge this worker did not win.
///
/// Publishes stamped traffic reports for the elected master to fold in.
/// No local computation, no windows, no state beyond the store handle.
pub struct SlaveAdapter {
    store: Arc<dyn CoordStore>,
}

impl SlaveAdapter {
    pub fn new(store: Arc<dyn CoordStore>) -> Self {
        Self { store }
    }

    /// Forward one stamped report to the store.
    pub async fn report(&self, report: StatsReport) -> StoreResult<()> {
        debug!(
            source = %report.source,
            target = %report.target,
            queue = report.queue_size,
            "forwarding sample to the edge master"
        );
        self.store.report_stats(report).await
    }
}
