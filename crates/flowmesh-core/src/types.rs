//! Domain types for the flowmesh worker mesh.
//!
//! These types describe the pipeline graph snapshot each worker receives at
//! job start, the statistics exchanged between workers through the
//! coordination store, and the scaling actions issued by edge masters. All
//! wire-adjacent types are JSON-serializable.

use serde::{Deserialize, Serialize};

/// Unique identifier for a running pipeline job.
pub type JobId = String;

/// Name of a node in the pipeline graph (unique within a job).
pub type NodeName = String;

/// Unique identifier for a worker process instance.
pub type WorkerId = String;

// ── Pipeline graph ────────────────────────────────────────────────

/// Whether a node keeps cross-message state.
///
/// Only stateless nodes are ever scaled; a stateful node's statistics are
/// still collected but its replica count is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Stateful,
    Stateless,
}

/// One node of the pipeline graph, as handed to a worker at job start.
///
/// Immutable for the lifetime of the job: topology changes arrive as a new
/// pipeline definition, never as in-place mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineNode {
    pub node_name: NodeName,
    /// Name of the algorithm image this node runs.
    pub algorithm_name: String,
    pub state_type: StateType,
    /// Node kind tag from the pipeline definition (e.g. "algorithm").
    #[serde(default)]
    pub kind: String,
    /// Lower replica bound enforced after the policy computes `required`.
    #[serde(default)]
    pub min_replicas: Option<u32>,
    /// Upper replica bound enforced after the policy computes `required`.
    #[serde(default)]
    pub max_replicas: Option<u32>,
    /// Upstream node names feeding this node.
    #[serde(default)]
    pub parents: Vec<NodeName>,
    /// Downstream node names this node feeds.
    #[serde(default)]
    pub children: Vec<NodeName>,
    /// Declared input template, expanded into task descriptors when the
    /// node is scaled up.
    #[serde(default)]
    pub input: Vec<serde_json::Value>,
}

/// One directed edge of the pipeline graph: a single scaling responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeName,
    pub target: NodeName,
}

/// The pipeline definition for one job: the full graph snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineDef {
    pub nodes: Vec<PipelineNode>,
    pub edges: Vec<Edge>,
}

/// Role a worker holds for one edge, decided by election.
///
/// A master is never automatically demoted; the role only changes
/// Slave → Master, or is dropped entirely when the worker finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Slave,
}

// ── Locks ─────────────────────────────────────────────────────────

/// Identity of the distributed lock guarding one edge of one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub job_id: JobId,
    pub source: NodeName,
    pub target: NodeName,
}

// ── Statistics wire shapes ────────────────────────────────────────

/// A monotonic counter snapshot: the unit stored in a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds at observation time.
    pub time: u64,
    /// Counter value at observation time (cumulative, non-decreasing).
    pub count: u64,
}

/// One traffic observation produced by the local algorithm wrapper,
/// addressed to a downstream node. Not yet stamped with its origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrafficSample {
    /// The downstream node this traffic is headed for.
    pub node_name: NodeName,
    /// Messages waiting to be sent (instantaneous backlog).
    pub queue_size: u64,
    /// Messages sent so far (cumulative).
    pub sent: u64,
    /// Responses received so far (cumulative).
    pub responses: u64,
    /// Round-trip times observed since the previous report, milliseconds.
    #[serde(default)]
    pub durations: Vec<f64>,
    /// Live replica count of the downstream node, when the reporter knows it.
    #[serde(default)]
    pub current_size: Option<u32>,
}

/// A traffic sample stamped with its origin, as published through the
/// coordination store for the edge master to consume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsReport {
    pub job_id: JobId,
    /// The node whose wrapper observed this traffic.
    pub source: NodeName,
    /// The downstream node the traffic is headed for.
    pub target: NodeName,
    pub queue_size: u64,
    pub sent: u64,
    pub responses: u64,
    #[serde(default)]
    pub durations: Vec<f64>,
    #[serde(default)]
    pub current_size: Option<u32>,
}

// ── Discovery ─────────────────────────────────────────────────────

/// Lifecycle status a worker advertises in its discovery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Working,
    Stopping,
    Stopped,
}

/// One worker's discovery record, as read from the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryInstance {
    pub job_id: JobId,
    pub node_name: NodeName,
    pub worker_id: WorkerId,
    /// Reachable address of the worker (ip:port).
    pub address: String,
    /// Whether this worker currently masters any edge.
    pub is_master: bool,
    pub worker_status: WorkerStatus,
}

// ── Scaling actions ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
}

/// An intention to change a node's replica count, handed to the actuation
/// seam. Never persisted; the next census correction supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleAction {
    pub node_name: NodeName,
    pub direction: ScaleDirection,
    /// How many replicas to add or remove.
    pub replicas: u32,
    /// Census size observed when the action was issued.
    pub current_size: u32,
    /// Target size after the action completes.
    pub scale_to: u32,
}

/// One task descriptor inside a scale-up job: a fresh execution slot for
/// the node's algorithm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleTaskSpec {
    pub task_id: String,
    pub node_name: NodeName,
    pub algorithm_name: String,
    #[serde(default)]
    pub input: Vec<serde_json::Value>,
}

/// A scale-up job handed to the external queue: `replicas` independent
/// task descriptors tagged as scaling-originated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleJobSpec {
    pub job_id: JobId,
    pub node_name: NodeName,
    pub tasks: Vec<ScaleTaskSpec>,
    /// Marks the job as produced by the autoscaler rather than a user.
    pub is_scaled: bool,
}

// ── Scaler status ─────────────────────────────────────────────────

/// Where a node's scaler currently stands. Reported through the
/// `MetricsChanged` event for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleStatus {
    Idle,
    /// The external scheduler reports the algorithm cannot be placed.
    UnableScale,
    /// The algorithm queue is non-empty; workers are still expected.
    PendingQueue,
    /// A raise of `desired` is still being fulfilled.
    PendingScaleUp,
    /// A lowering of `desired` is still draining.
    PendingScaleDown,
    ScalingUp,
    ScalingDown,
}

impl LockKey {
    pub fn new(job_id: &str, source: &str, target: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    /// Composite key for the lock table: `{job_id}/{source}/{target}`.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.job_id, self.source, self.target)
    }
}

impl Edge {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

impl PipelineNode {
    pub fn is_stateless(&self) -> bool {
        self.state_type == StateType::Stateless
    }

    /// Lower replica bound, defaulting to zero when unset.
    pub fn min_replicas(&self) -> u32 {
        self.min_replicas.unwrap_or(0)
    }
}

impl PipelineDef {
    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.node_name == name)
    }

    /// Edges leaving the given node, in definition order.
    pub fn edges_from(&self, source: &str) -> Vec<Edge> {
        self.edges
            .iter()
            .filter(|e| e.source == source)
            .cloned()
            .collect()
    }
}

impl TrafficSample {
    /// Stamp this sample with its origin, producing the store wire shape.
    pub fn stamp(self, job_id: &str, source: &str) -> StatsReport {
        StatsReport {
            job_id: job_id.to_string(),
            source: source.to_string(),
            target: self.node_name,
            queue_size: self.queue_size,
            sent: self.sent,
            responses: self.responses,
            durations: self.durations,
            current_size: self.current_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_def() -> PipelineDef {
        PipelineDef {
            nodes: vec![
                PipelineNode {
                    node_name: "A".to_string(),
                    algorithm_name: "alg-a".to_string(),
                    state_type: StateType::Stateful,
                    kind: "algorithm".to_string(),
                    min_replicas: None,
                    max_replicas: None,
                    parents: vec![],
                    children: vec!["B".to_string(), "C".to_string()],
                    input: vec![],
                },
                PipelineNode {
                    node_name: "B".to_string(),
                    algorithm_name: "alg-b".to_string(),
                    state_type: StateType::Stateless,
                    kind: "algorithm".to_string(),
                    min_replicas: Some(1),
                    max_replicas: Some(10),
                    parents: vec!["A".to_string()],
                    children: vec![],
                    input: vec![],
                },
            ],
            edges: vec![Edge::new("A", "B"), Edge::new("A", "C")],
        }
    }

    #[test]
    fn lock_key_path_is_job_scoped() {
        let key = LockKey::new("job-1", "A", "B");
        assert_eq!(key.path(), "job-1/A/B");
    }

    #[test]
    fn edges_from_returns_outgoing_edges() {
        let def = test_def();
        let edges = def.edges_from("A");
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].target, "B");
        assert!(def.edges_from("B").is_empty());
    }

    #[test]
    fn node_lookup_and_bounds() {
        let def = test_def();
        let b = def.node("B").unwrap();
        assert!(b.is_stateless());
        assert_eq!(b.min_replicas(), 1);
        assert!(def.node("missing").is_none());
    }

    #[test]
    fn traffic_sample_stamp_fills_origin() {
        let sample = TrafficSample {
            node_name: "B".to_string(),
            queue_size: 5,
            sent: 2,
            responses: 1,
            durations: vec![12.5],
            current_size: Some(3),
        };
        let report = sample.stamp("job-1", "A");
        assert_eq!(report.source, "A");
        assert_eq!(report.target, "B");
        assert_eq!(report.queue_size, 5);
        assert_eq!(report.current_size, Some(3));
    }

    #[test]
    fn wire_shapes_round_trip_json() {
        let report = StatsReport {
            job_id: "job-1".to_string(),
            source: "A".to_string(),
            target: "B".to_string(),
            queue_size: 5,
            sent: 0,
            responses: 0,
            durations: vec![],
            current_size: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: StatsReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
