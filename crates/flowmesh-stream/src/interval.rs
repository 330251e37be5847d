//! Cooperative periodic-task runner.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often a failing loop gets a full `warn!`; repeats inside the window
/// drop to `debug!`.
const ERROR_LOG_THROTTLE: Duration = Duration::from_secs(30);

/// One periodic job. The body runs to completion before the next sleep
/// starts, so an invocation never overlaps itself; a slow tick simply
/// delays the next one.
#[async_trait]
pub trait Tick: Send {
    async fn tick(&mut self) -> anyhow::Result<()>;
}

/// Handle to one spawned control loop.
///
/// A tick error is logged (throttled) and the loop carries on — nothing a
/// tick does can take the worker down. `stop()` ends the loop at the next
/// scheduling point; external calls already issued by an in-flight tick
/// are not cancelled.
pub struct Interval {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Interval {
    /// Spawn `job` on a fixed cadence.
    pub fn spawn<J: Tick + 'static>(name: &'static str, period: Duration, mut job: J) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            info!(
                interval = name,
                period_ms = period.as_millis() as u64,
                "control loop started"
            );
            let mut last_warn: Option<Instant> = None;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        if let Err(e) = job.tick().await {
                            if last_warn.is_none_or(|t| t.elapsed() >= ERROR_LOG_THROTTLE) {
                                warn!(interval = name, error = %e, "tick failed");
                                last_warn = Some(Instant::now());
                            } else {
                                debug!(interval = name, error = %e, "tick failed");
                            }
                        }
                    }
                    _ = rx.changed() => {
                        info!(interval = name, "control loop shutting down");
                        break;
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Ask the loop to end; returns without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Ask the loop to end and wait for it to wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
