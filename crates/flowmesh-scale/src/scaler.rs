//! Scaler — per-node hysteresis state machine.
//!
//! Sits between the policy (which says how many replicas a node should
//! have) and the actuation seam (which makes it so). Its one job is to
//! never duplicate an action that is still propagating: `desired` records
//! what has already been committed, and a raise that outruns the census
//! is only re-issued after a retry wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use flowmesh_core::{NodeName, ScaleAction, ScaleDirection, ScaleStatus, StreamConfig};

use crate::marker::TimeMarker;

/// What the scaler asks of the world around it. The edge master wires the
/// census, the external queue introspection, and the actuation calls in
/// here; tests substitute a mock.
#[async_trait]
pub trait ScaleEnv: Send + Sync {
    /// Live replica count of the node, from the discovery census.
    async fn current_size(&self) -> u32;

    /// Backlog of the node's algorithm queue, `None` when unknown.
    async fn queue_depth(&self) -> anyhow::Result<Option<u64>>;

    /// Why the external scheduler cannot place the algorithm, `None` when
    /// placement is fine.
    async fn unscheduled_reason(&self) -> anyhow::Result<Option<String>>;

    async fn scale_up(&self, action: ScaleAction) -> anyhow::Result<()>;

    async fn scale_down(&self, action: ScaleAction) -> anyhow::Result<()>;
}

/// Bounds and timing for one node's scaler.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// Hard ceiling on the node's replica count.
    pub max_replicas_per_node: u32,
    /// Most replicas a single tick may add.
    pub max_replicas_per_tick: u32,
    /// How long an unfulfilled raise/lowering stays pending before it may
    /// be re-issued.
    pub min_time_wait_before_retry_scale: Duration,
    /// Cooldown between scales in opposite directions.
    pub min_time_between_scales: Duration,
}

impl ScalerConfig {
    pub fn from_stream(config: &StreamConfig) -> Self {
        Self {
            max_replicas_per_node: config.scale_up.max_replicas_per_node,
            max_replicas_per_tick: config.scale_up.max_replicas_per_tick,
            min_time_wait_before_retry_scale: Duration::from_millis(
                config.min_time_wait_before_retry_scale_ms,
            ),
            min_time_between_scales: Duration::from_millis(config.min_time_between_scales_ms),
        }
    }
}

/// Per-node hysteresis control loop.
///
/// `required` is the latest computed demand; `desired` is the last value
/// this controller committed to act on, `None` until the first commitment.
/// A new scale-up is only issued while no previous raise is outstanding
/// (or its retry wait elapsed), and likewise for scale-down.
pub struct Scaler {
    node_name: NodeName,
    config: ScalerConfig,
    env: Arc<dyn ScaleEnv>,
    required: u32,
    desired: Option<u32>,
    status: ScaleStatus,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    not_fulfilled_up: TimeMarker,
    not_fulfilled_down: TimeMarker,
}

impl Scaler {
    pub fn new(node_name: &str, config: ScalerConfig, env: Arc<dyn ScaleEnv>) -> Self {
        Self {
            node_name: node_name.to_string(),
            config,
            env,
            required: 0,
            desired: None,
            status: ScaleStatus::Idle,
            last_scale_up: None,
            last_scale_down: None,
            not_fulfilled_up: TimeMarker::new(),
            not_fulfilled_down: TimeMarker::new(),
        }
    }

    /// Install the latest computed demand. Returns whether anything
    /// changed; an unchanged value is a no-op so the retry timers are
    /// never re-armed by a steady policy outcome.
    pub fn update_required(&mut self, n: u32) -> bool {
        let capped = n.min(self.config.max_replicas_per_node);
        if capped == self.required {
            return false;
        }
        debug!(node = %self.node_name, from = self.required, to = capped, "required updated");
        self.required = capped;
        true
    }

    /// One control-loop evaluation.
    ///
    /// Callback errors propagate to the owning interval; a failed tick
    /// never mutates `desired` or `required` (commitment happens only
    /// after the actuation call returns Ok).
    pub async fn tick(&mut self) -> anyhow::Result<ScaleStatus> {
        self.status = ScaleStatus::Idle;

        // Informational only: neither blocks the decision below.
        if self
            .env
            .unscheduled_reason()
            .await?
            .is_some_and(|r| !r.is_empty())
        {
            self.status = ScaleStatus::UnableScale;
        } else if self.env.queue_depth().await?.is_some_and(|d| d > 0) {
            self.status = ScaleStatus::PendingQueue;
        }

        let current = self.env.current_size().await;

        if self.should_scale_up(current) {
            if self.desired.is_none_or(|d| d <= current) {
                self.not_fulfilled_up.clear();
                self.execute_scale_up(current).await?;
            } else {
                // A previous raise is still propagating; hold until the
                // retry wait elapses, then re-issue the missing amount.
                self.not_fulfilled_up.mark();
                if self
                    .not_fulfilled_up
                    .exceeds(self.config.min_time_wait_before_retry_scale)
                {
                    self.not_fulfilled_up.clear();
                    self.execute_scale_up(current).await?;
                } else {
                    self.status = ScaleStatus::PendingScaleUp;
                }
            }
        } else if self.should_scale_down(current) {
            if self.desired.is_none_or(|d| d >= current) {
                self.not_fulfilled_down.clear();
                self.execute_scale_down(current).await?;
            } else {
                self.not_fulfilled_down.mark();
                if self
                    .not_fulfilled_down
                    .exceeds(self.config.min_time_wait_before_retry_scale)
                {
                    self.not_fulfilled_down.clear();
                    self.execute_scale_down(current).await?;
                } else {
                    self.status = ScaleStatus::PendingScaleDown;
                }
            }
        }

        Ok(self.status)
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    pub fn desired(&self) -> u32 {
        self.desired.unwrap_or(0)
    }

    pub fn status(&self) -> ScaleStatus {
        self.status
    }

    fn should_scale_up(&self, current: u32) -> bool {
        current < self.required
            && self.desired.is_none_or(|d| d <= self.required)
            && !recent(self.last_scale_down, self.config.min_time_between_scales)
    }

    fn should_scale_down(&self, current: u32) -> bool {
        current > self.required
            && self.desired.is_none_or(|d| d >= self.required)
            && !recent(self.last_scale_up, self.config.min_time_between_scales)
    }

    async fn execute_scale_up(&mut self, current: u32) -> anyhow::Result<()> {
        // `desired.min(current)` equals the committed amount on the
        // immediate path and hands the retry path the still-missing one.
        let wanted = self.required - self.desired.unwrap_or(0).min(current);
        let headroom = self.config.max_replicas_per_node.saturating_sub(current);
        let replicas = wanted.min(self.config.max_replicas_per_tick).min(headroom);
        if replicas == 0 {
            return Ok(());
        }

        let action = ScaleAction {
            node_name: self.node_name.clone(),
            direction: ScaleDirection::Up,
            replicas,
            current_size: current,
            scale_to: current + replicas,
        };
        debug!(
            node = %self.node_name,
            replicas,
            current,
            scale_to = action.scale_to,
            "scaling up"
        );
        self.env.scale_up(action).await?;

        self.desired = Some(self.required);
        self.last_scale_up = Some(Instant::now());
        self.status = ScaleStatus::ScalingUp;
        Ok(())
    }

    async fn execute_scale_down(&mut self, current: u32) -> anyhow::Result<()> {
        let replicas = current - self.required;
        let action = ScaleAction {
            node_name: self.node_name.clone(),
            direction: ScaleDirection::Down,
            replicas,
            current_size: current,
            scale_to: self.required,
        };
        debug!(
            node = %self.node_name,
            replicas,
            current,
            scale_to = action.scale_to,
            "scaling down"
        );
        self.env.scale_down(action).await?;

        self.desired = Some(self.required);
        self.last_scale_down = Some(Instant::now());
        self.status = ScaleStatus::ScalingDown;
        Ok(())
    }
}

fn recent(mark: Option<Instant>, window: Duration) -> bool {
    mark.is_some_and(|t| t.elapsed() < window)
}
