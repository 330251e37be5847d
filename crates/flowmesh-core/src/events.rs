//! In-process worker events.
//!
//! A worker fans these out on a single `tokio::sync::broadcast` channel.
//! The set of kinds is closed: subscribers match exhaustively and a new
//! kind is an API change, not a stringly-typed topic.

use serde::{Deserialize, Serialize};

use crate::types::{DiscoveryInstance, JobId, NodeName, ScaleStatus};

/// Everything a worker announces to in-process subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerEvent {
    DiscoveryChanged(DiscoveryChange),
    ParentsDown(ParentsDownInfo),
    MetricsChanged(MetricsReport),
    ThroughputChanged(ThroughputReport),
}

/// The instance set for a node changed between two discovery polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryChange {
    pub node_name: NodeName,
    pub added: Vec<DiscoveryInstance>,
    pub removed: Vec<DiscoveryInstance>,
    /// Instance count after the change.
    pub total: usize,
}

/// Every parent of a stateless node has been absent for longer than the
/// configured grace period. The consumer decides what to do about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentsDownInfo {
    /// The node whose parents disappeared.
    pub node_name: NodeName,
    pub parents: Vec<NodeName>,
    /// How long the outage has lasted, milliseconds.
    pub down_for_ms: u64,
}

/// Scaler state for one downstream node, as seen by its master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeScaleMetrics {
    pub node_name: NodeName,
    pub required: u32,
    pub desired: u32,
    pub current_size: u32,
    pub status: ScaleStatus,
}

/// Periodic snapshot of every scaler this worker masters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub job_id: JobId,
    pub nodes: Vec<NodeScaleMetrics>,
}

/// Throughput over one edge, derived from the master's windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeThroughput {
    pub source: NodeName,
    pub target: NodeName,
    /// Requests per second over the window.
    pub req_rate: f64,
    /// Responses per second over the window.
    pub res_rate: f64,
    /// Responses as a percentage of requests (100 = keeping up).
    pub ratio_pct: f64,
    /// Median round-trip time, milliseconds.
    pub round_trip_ms: f64,
}

/// Periodic throughput snapshot across every edge this worker masters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputReport {
    pub job_id: JobId,
    pub edges: Vec<EdgeThroughput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_by_kind() {
        let event = WorkerEvent::ParentsDown(ParentsDownInfo {
            node_name: "B".to_string(),
            parents: vec!["A".to_string()],
            down_for_ms: 31_000,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"parents_down\""));
        let back: WorkerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
