//! Issued-target debounce for in-flight scale actions.

use std::time::{Duration, Instant};

/// Tracks the most recently issued scale target per direction, so a
/// master can tell "still being realized" from "done" without waiting on
/// the scaler's own `desired` bookkeeping. The two mechanisms overlap on
/// purpose; each holds independently.
#[derive(Debug, Clone)]
pub struct PendingScale {
    min_wait: Duration,
    up_target: Option<u32>,
    up_issued_at: Option<Instant>,
    down_target: Option<u32>,
}

impl PendingScale {
    /// `min_wait` is the minimum age an issued scale-up must reach before
    /// it can be considered realized, even if the census already matches.
    pub fn new(min_wait: Duration) -> Self {
        Self {
            min_wait,
            up_target: None,
            up_issued_at: None,
            down_target: None,
        }
    }

    /// Record a freshly issued scale-up target.
    pub fn update_up(&mut self, target: u32) {
        self.up_target = Some(target);
        self.up_issued_at = Some(Instant::now());
    }

    /// Record a freshly issued scale-down target.
    pub fn update_down(&mut self, target: u32) {
        self.down_target = Some(target);
    }

    /// Re-check both directions against the live census. Pending-up clears
    /// once the census reached the target and the minimum wait has passed;
    /// pending-down clears as soon as the census drained to the target.
    pub fn check(&mut self, current_size: u32) {
        if let Some(target) = self.up_target
            && current_size >= target
            && self
                .up_issued_at
                .is_some_and(|t| t.elapsed() >= self.min_wait)
        {
            self.up_target = None;
            self.up_issued_at = None;
        }
        if let Some(target) = self.down_target
            && current_size <= target
        {
            self.down_target = None;
        }
    }

    pub fn has_pending_up(&self) -> bool {
        self.up_target.is_some()
    }

    pub fn has_pending_down(&self) -> bool {
        self.down_target.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.has_pending_up() || self.has_pending_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_up_clears_only_at_target() {
        let mut pending = PendingScale::new(Duration::ZERO);
        pending.update_up(3);

        pending.check(2);
        assert!(pending.has_pending_up());

        pending.check(3);
        assert!(!pending.has_pending_up());
    }

    #[test]
    fn pending_up_respects_the_minimum_wait() {
        let mut pending = PendingScale::new(Duration::from_millis(40));
        pending.update_up(3);

        // Census already matches, but the action is too young.
        pending.check(3);
        assert!(pending.has_pending_up());

        std::thread::sleep(Duration::from_millis(50));
        pending.check(3);
        assert!(!pending.has_pending_up());
    }

    #[test]
    fn pending_down_clears_without_a_wait() {
        let mut pending = PendingScale::new(Duration::from_secs(3600));
        pending.update_down(1);

        pending.check(4);
        assert!(pending.has_pending_down());

        pending.check(1);
        assert!(!pending.has_pending_down());
        assert!(!pending.is_pending());
    }

    #[test]
    fn directions_are_tracked_independently() {
        let mut pending = PendingScale::new(Duration::ZERO);
        pending.update_up(5);
        pending.update_down(2);
        assert!(pending.is_pending());

        pending.check(5);
        assert!(!pending.has_pending_up());
        assert!(pending.has_pending_down());
    }
}
