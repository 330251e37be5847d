//! Worker configuration surface.
//!
//! One flat document (TOML on disk) covers every control loop: tick
//! intervals, window sizing, and the scale-up/scale-down policy knobs.
//! Missing fields fall back to the defaults below, so a config file only
//! states what it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Cadence of the scaling control loop, milliseconds.
    pub scale_interval_ms: u64,
    /// Cadence of lock-acquisition attempts, milliseconds. Also the lease
    /// renewal cadence: winning again is the renewal.
    pub election_interval_ms: u64,
    /// Cadence of discovery registry polls, milliseconds.
    pub discovery_interval_ms: u64,
    /// Grace period before a full-parent outage is announced, milliseconds.
    pub time_wait_on_parents_down_ms: u64,
    /// How long an unfulfilled scale stays pending before it may be
    /// re-issued, milliseconds.
    pub min_time_wait_before_retry_scale_ms: u64,
    /// Cooldown between a scale in one direction and a scale in the
    /// other, milliseconds.
    pub min_time_between_scales_ms: u64,
    pub statistics: StatisticsConfig,
    pub scale_up: ScaleUpConfig,
    pub scale_down: ScaleDownConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Capacity of each sliding window (samples kept per counter).
    pub max_window_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleUpConfig {
    /// Replica floor for the very first scale of an unstarted node.
    pub replicas_on_first_scale: u32,
    /// Hard ceiling on any node's replica count.
    pub max_replicas_per_node: u32,
    /// Most replicas a single tick may add.
    pub max_replicas_per_tick: u32,
    /// Time horizon the queue-draining formula plans for, seconds.
    pub min_time_to_clean_up_queue_secs: u64,
    /// Headroom added on top of a computed scale-up.
    pub replicas_extra: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleDownConfig {
    /// How long a node must stay idle before its replicas are released,
    /// milliseconds.
    pub min_time_idle_before_replica_down_ms: u64,
    /// Largest backlog still considered idle.
    pub min_queue_size_before_scale_down: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            scale_interval_ms: 1_000,
            election_interval_ms: 3_000,
            discovery_interval_ms: 5_000,
            time_wait_on_parents_down_ms: 30_000,
            min_time_wait_before_retry_scale_ms: 30_000,
            min_time_between_scales_ms: 60_000,
            statistics: StatisticsConfig::default(),
            scale_up: ScaleUpConfig::default(),
            scale_down: ScaleDownConfig::default(),
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            max_window_size: 10,
        }
    }
}

impl Default for ScaleUpConfig {
    fn default() -> Self {
        Self {
            replicas_on_first_scale: 1,
            max_replicas_per_node: 100,
            max_replicas_per_tick: 10,
            min_time_to_clean_up_queue_secs: 30,
            replicas_extra: 0,
        }
    }
}

impl Default for ScaleDownConfig {
    fn default() -> Self {
        Self {
            min_time_idle_before_replica_down_ms: 60_000,
            min_queue_size_before_scale_down: 0,
        }
    }
}

impl StreamConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StreamConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn scale_interval(&self) -> Duration {
        Duration::from_millis(self.scale_interval_ms)
    }

    pub fn election_interval(&self) -> Duration {
        Duration::from_millis(self.election_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = StreamConfig::default();
        assert_eq!(config.scale_interval_ms, 1_000);
        assert_eq!(config.statistics.max_window_size, 10);
        assert_eq!(config.scale_up.replicas_on_first_scale, 1);
        assert_eq!(config.scale_down.min_queue_size_before_scale_down, 0);
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let toml = r#"
            scale_interval_ms = 250

            [scale_up]
            replicas_on_first_scale = 2
            max_replicas_per_node = 8
        "#;
        let config: StreamConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.scale_interval_ms, 250);
        assert_eq!(config.scale_up.replicas_on_first_scale, 2);
        assert_eq!(config.scale_up.max_replicas_per_node, 8);
        // Untouched sections keep their defaults.
        assert_eq!(config.scale_up.max_replicas_per_tick, 10);
        assert_eq!(config.election_interval_ms, 3_000);
        assert_eq!(config.min_time_between_scales_ms, 60_000);
    }

    #[test]
    fn interval_accessors_convert_to_duration() {
        let config = StreamConfig {
            scale_interval_ms: 1_500,
            ..Default::default()
        };
        assert_eq!(config.scale_interval(), Duration::from_millis(1_500));
    }
}
