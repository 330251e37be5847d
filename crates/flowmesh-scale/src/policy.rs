//! AutoScaler — required-replica policy for one downstream node.
//!
//! Owns the node's [`Statistics`] and [`Scaler`]: every evaluation folds
//! the per-source windows into one aggregate, runs the decision rules to
//! compute the demand, caps it to the node's bounds, and hands it to the
//! scaler to act on.
//!
//! Decision rules, in order:
//! 1. First scale — traffic exists, nothing ever answered, nothing runs:
//!    jump to the configured floor or what the backlog demands, whichever
//!    is larger.
//! 2. Steady state — enough replicas to drain the backlog plus expected
//!    arrivals over the cleanup horizon, at the observed per-replica rate.
//! 3. Idle — rates flat and backlog negligible for long enough: release
//!    down to the node's floor.

use std::time::Duration;

use tracing::info;

use flowmesh_core::{
    EdgeThroughput, NodeScaleMetrics, PipelineNode, ScaleDownConfig, ScaleUpConfig, StatsReport,
    StreamConfig,
};
use flowmesh_stats::{AggregateSnapshot, Statistics, ratio};

use crate::marker::TimeMarker;
use crate::scaler::Scaler;

/// Per-replica drain rate assumed when no round-trip samples exist yet,
/// messages per second.
const DEFAULT_POD_RATE: f64 = 1.0;

/// Policy-plus-actuation bundle for one stateless downstream node.
pub struct AutoScaler {
    node: PipelineNode,
    scale_up: ScaleUpConfig,
    scale_down: ScaleDownConfig,
    stats: Statistics,
    scaler: Scaler,
    idle: TimeMarker,
    /// Last `(demand, capped)` pair already logged; suppresses repeats.
    last_cap_log: Option<(u32, u32)>,
}

impl AutoScaler {
    pub fn new(node: PipelineNode, config: &StreamConfig, stats: Statistics, scaler: Scaler) -> Self {
        Self {
            node,
            scale_up: config.scale_up.clone(),
            scale_down: config.scale_down.clone(),
            stats,
            scaler,
            idle: TimeMarker::new(),
            last_cap_log: None,
        }
    }

    /// Fold one traffic report into the node's windows.
    pub fn report(&mut self, report: &StatsReport) {
        self.stats.report(report);
    }

    /// Discard all windows (job restart).
    pub fn reset(&mut self) {
        self.stats.reset();
        self.idle.clear();
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// One policy evaluation followed by one scaler tick. `current` is the
    /// node's live replica count from the discovery census.
    ///
    /// Stateful nodes collect statistics but are never scaled.
    pub async fn tick(&mut self, current: u32) -> anyhow::Result<()> {
        if !self.node.is_stateless() {
            return Ok(());
        }

        let snap = self.stats.aggregate(&self.node.node_name);
        let idle_now = snap.req_rate == 0.0
            && snap.queue_size <= self.scale_down.min_queue_size_before_scale_down;
        self.idle.update(idle_now);

        let demand = compute_demand(&snap, current, &self.scale_up).or_else(|| {
            let idle_for =
                Duration::from_millis(self.scale_down.min_time_idle_before_replica_down_ms);
            (current > self.node.min_replicas() && self.idle.exceeds(idle_for))
                .then(|| self.node.min_replicas())
        });

        if let Some(mut demand) = demand {
            if demand > current {
                demand += self.scale_up.replicas_extra;
            }
            let capped = self.cap(demand);
            self.scaler.update_required(capped);
        }

        self.scaler.tick().await?;
        Ok(())
    }

    /// Scaler state for the `MetricsChanged` event.
    pub fn metrics(&self, current: u32) -> NodeScaleMetrics {
        NodeScaleMetrics {
            node_name: self.node.node_name.clone(),
            required: self.scaler.required(),
            desired: self.scaler.desired(),
            current_size: current,
            status: self.scaler.status(),
        }
    }

    /// Per-edge throughput derived from the windows, one entry per source.
    pub fn throughput(&self) -> Vec<EdgeThroughput> {
        self.stats
            .entries()
            .map(|(source, target, entry)| {
                let snap = entry.snapshot();
                EdgeThroughput {
                    source: source.to_string(),
                    target: target.to_string(),
                    req_rate: snap.req_rate,
                    res_rate: snap.res_rate,
                    ratio_pct: ratio(snap.res_rate, snap.req_rate) * 100.0,
                    round_trip_ms: snap.round_trip_ms,
                }
            })
            .collect()
    }

    /// Clamp to the node's configured bounds, logging once per distinct
    /// capping outcome.
    fn cap(&mut self, demand: u32) -> u32 {
        let mut capped = demand;
        if let Some(min) = self.node.min_replicas {
            capped = capped.max(min);
        }
        if let Some(max) = self.node.max_replicas {
            capped = capped.min(max);
        }

        if capped == demand {
            self.last_cap_log = None;
        } else if self.last_cap_log != Some((demand, capped)) {
            info!(
                node = %self.node.node_name,
                demand,
                capped,
                "demand capped by node bounds"
            );
            self.last_cap_log = Some((demand, capped));
        }
        capped
    }
}

/// Demand from the ordered decision rules; `None` means no rule fired and
/// the previous demand stands.
fn compute_demand(snap: &AggregateSnapshot, current: u32, config: &ScaleUpConfig) -> Option<u32> {
    // First scale: traffic exists, nothing has ever answered, nothing runs.
    if snap.total_requests > 0 && snap.total_responses == 0 && current == 0 {
        return Some(config.replicas_on_first_scale.max(queue_formula(snap, config)));
    }

    // Steady state: the backlog formula, but only upward — shrinking is
    // the idle rule's job.
    if snap.total_requests > 0 && current >= config.replicas_on_first_scale {
        let formula = queue_formula(snap, config);
        if formula >= current {
            return Some(formula);
        }
    }

    None
}

/// Replicas needed to drain the backlog plus the arrivals expected over
/// the cleanup horizon, at the observed per-replica rate.
///
/// `pod_rate = 1000 / round_trip_ms`; without round-trip samples each
/// replica is assumed to drain [`DEFAULT_POD_RATE`] messages per second.
fn queue_formula(snap: &AggregateSnapshot, config: &ScaleUpConfig) -> u32 {
    let horizon = config.min_time_to_clean_up_queue_secs.max(1) as f64;
    let pod_rate = if snap.round_trip_ms > 0.0 {
        1_000.0 / snap.round_trip_ms
    } else {
        DEFAULT_POD_RATE
    };
    let msg_clean_up = (pod_rate * horizon).ceil();
    ((snap.queue_size as f64 + snap.req_rate * horizon) / msg_clean_up).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use flowmesh_core::{ScaleAction, StateType};

    use crate::scaler::{ScaleEnv, ScalerConfig};

    #[derive(Default)]
    struct RecordingEnv {
        size: AtomicU32,
        ups: Mutex<Vec<ScaleAction>>,
        downs: Mutex<Vec<ScaleAction>>,
    }

    #[async_trait]
    impl ScaleEnv for RecordingEnv {
        async fn current_size(&self) -> u32 {
            self.size.load(Ordering::SeqCst)
        }

        async fn queue_depth(&self) -> anyhow::Result<Option<u64>> {
            Ok(None)
        }

        async fn unscheduled_reason(&self) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        async fn scale_up(&self, action: ScaleAction) -> anyhow::Result<()> {
            self.ups.lock().unwrap().push(action);
            Ok(())
        }

        async fn scale_down(&self, action: ScaleAction) -> anyhow::Result<()> {
            self.downs.lock().unwrap().push(action);
            Ok(())
        }
    }

    fn test_node(state_type: StateType) -> PipelineNode {
        PipelineNode {
            node_name: "D".to_string(),
            algorithm_name: "alg-d".to_string(),
            state_type,
            kind: "algorithm".to_string(),
            min_replicas: None,
            max_replicas: None,
            parents: vec!["A".to_string()],
            children: vec![],
            input: vec![],
        }
    }

    fn test_report(queue: u64, sent: u64, responses: u64) -> StatsReport {
        StatsReport {
            job_id: "job-1".to_string(),
            source: "A".to_string(),
            target: "D".to_string(),
            queue_size: queue,
            sent,
            responses,
            durations: vec![],
            current_size: None,
        }
    }

    fn make_autoscaler(node: PipelineNode, config: StreamConfig) -> (AutoScaler, Arc<RecordingEnv>) {
        let env = Arc::new(RecordingEnv::default());
        let scaler = Scaler::new(
            &node.node_name,
            ScalerConfig::from_stream(&config),
            env.clone(),
        );
        let stats = Statistics::new(config.statistics.max_window_size);
        (AutoScaler::new(node, &config, stats, scaler), env)
    }

    fn snap(total_requests: u64, total_responses: u64, queue: u64, req_rate: f64) -> AggregateSnapshot {
        AggregateSnapshot {
            req_rate,
            res_rate: 0.0,
            round_trip_ms: 0.0,
            total_requests,
            total_responses,
            queue_size: queue,
            current_size: 0,
            sources: 1,
        }
    }

    #[test]
    fn first_scale_uses_the_configured_floor() {
        let config = ScaleUpConfig {
            replicas_on_first_scale: 2,
            ..Default::default()
        };
        // Traffic seen, nothing answered, nothing running, no backlog
        // pressure: the floor wins.
        let demand = compute_demand(&snap(10, 0, 0, 0.0), 0, &config);
        assert_eq!(demand, Some(2));
    }

    #[test]
    fn first_scale_takes_the_backlog_when_it_demands_more() {
        let config = ScaleUpConfig {
            replicas_on_first_scale: 1,
            min_time_to_clean_up_queue_secs: 30,
            ..Default::default()
        };
        // Backlog of 5 at 2.5 msg/s over a 30s horizon on the 1 msg/s
        // default drain: ceil(80/30) = 3.
        let demand = compute_demand(&snap(5, 0, 5, 2.5), 0, &config);
        assert_eq!(demand, Some(3));
    }

    #[test]
    fn round_trip_formula_matches_the_observed_drain() {
        let config = ScaleUpConfig {
            min_time_to_clean_up_queue_secs: 10,
            ..Default::default()
        };
        let mut snap = snap(60, 10, 10, 5.0);
        snap.round_trip_ms = 500.0; // pod_rate = 2/s, msg_clean_up = 20
        assert_eq!(queue_formula(&snap, &config), 3); // ceil(60/20)
    }

    #[test]
    fn steady_state_never_shrinks() {
        let config = ScaleUpConfig::default();
        // Formula would say 1; with 4 running, no rule fires.
        assert_eq!(compute_demand(&snap(100, 90, 0, 0.5), 4, &config), None);
    }

    #[tokio::test]
    async fn backlog_report_scales_an_unstarted_node() {
        let (mut autoscaler, env) = make_autoscaler(
            test_node(StateType::Stateless),
            StreamConfig::default(),
        );
        autoscaler.report(&test_report(5, 0, 0));

        autoscaler.tick(0).await.unwrap();

        let ups = env.ups.lock().unwrap().clone();
        assert_eq!(ups.len(), 1);
        assert_eq!(ups[0].replicas, 3);
        assert_eq!(ups[0].scale_to, 3);
        assert_eq!(autoscaler.metrics(0).required, 3);
    }

    #[tokio::test]
    async fn replicas_extra_pads_upward_moves() {
        let mut config = StreamConfig::default();
        config.scale_up.replicas_extra = 1;
        let (mut autoscaler, env) = make_autoscaler(test_node(StateType::Stateless), config);
        autoscaler.report(&test_report(5, 0, 0));

        autoscaler.tick(0).await.unwrap();

        assert_eq!(env.ups.lock().unwrap()[0].replicas, 4);
    }

    #[tokio::test]
    async fn stateful_nodes_are_left_alone() {
        let (mut autoscaler, env) = make_autoscaler(
            test_node(StateType::Stateful),
            StreamConfig::default(),
        );
        autoscaler.report(&test_report(50, 0, 0));

        autoscaler.tick(0).await.unwrap();

        assert!(env.ups.lock().unwrap().is_empty());
        assert_eq!(autoscaler.metrics(0).required, 0);
    }

    #[tokio::test]
    async fn node_bounds_cap_the_demand() {
        let mut node = test_node(StateType::Stateless);
        node.max_replicas = Some(2);
        let (mut autoscaler, env) = make_autoscaler(node, StreamConfig::default());
        autoscaler.report(&test_report(500, 0, 0));

        autoscaler.tick(0).await.unwrap();

        let ups = env.ups.lock().unwrap().clone();
        assert_eq!(ups[0].scale_to, 2);
    }

    #[tokio::test]
    async fn sustained_idle_releases_down_to_the_floor() {
        let mut config = StreamConfig::default();
        config.scale_down.min_time_idle_before_replica_down_ms = 0;
        config.min_time_wait_before_retry_scale_ms = 0;
        let (mut autoscaler, env) = make_autoscaler(test_node(StateType::Stateless), config);

        // Three replicas running, no windows at all: idle from the first
        // evaluation.
        env.size.store(3, Ordering::SeqCst);
        autoscaler.tick(3).await.unwrap();

        let downs = env.downs.lock().unwrap().clone();
        assert_eq!(downs.len(), 1);
        assert_eq!(downs[0].replicas, 3);
        assert_eq!(downs[0].scale_to, 0);
    }

    #[tokio::test]
    async fn backlog_blocks_the_idle_release() {
        let mut config = StreamConfig::default();
        config.scale_down.min_time_idle_before_replica_down_ms = 0;
        config.min_time_wait_before_retry_scale_ms = 0;
        let (mut autoscaler, env) = make_autoscaler(test_node(StateType::Stateless), config);

        env.size.store(3, Ordering::SeqCst);
        autoscaler.report(&test_report(5, 0, 0));
        autoscaler.tick(3).await.unwrap();

        assert!(env.downs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn throughput_derives_one_entry_per_source() {
        let (mut autoscaler, _env) = make_autoscaler(
            test_node(StateType::Stateless),
            StreamConfig::default(),
        );
        let mut report = test_report(5, 0, 0);
        report.durations = vec![10.0, 20.0, 30.0];
        autoscaler.report(&report);

        let throughput = autoscaler.throughput();
        assert_eq!(throughput.len(), 1);
        assert_eq!(throughput[0].source, "A");
        assert_eq!(throughput[0].target, "D");
        assert_eq!(throughput[0].req_rate, 2.5);
        assert_eq!(throughput[0].round_trip_ms, 20.0);
    }

    #[tokio::test]
    async fn reset_forgets_the_windows() {
        let (mut autoscaler, env) = make_autoscaler(
            test_node(StateType::Stateless),
            StreamConfig::default(),
        );
        autoscaler.report(&test_report(5, 0, 0));
        autoscaler.reset();

        autoscaler.tick(0).await.unwrap();
        assert!(env.ups.lock().unwrap().is_empty());
        assert!(autoscaler.statistics().is_empty());
    }
}
