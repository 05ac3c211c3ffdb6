//! Idle debouncer and aggregate activity signal.
//!
//! Two timers keep the UI from flickering:
//!
//! - One idle deadline shared by all sessions, pushed back by every live
//!   write. When it expires the monitor clears `thinking` on every session
//!   not blocked on permission.
//! - A grace window on the aggregate: `has_activity` stays true for
//!   `grace_window` after the last moment any session was active, which
//!   bridges the gap between one tool ending and the next one starting.

use tokio::time::{Duration, Instant};

/// Shared idle timer plus the hysteresis of the aggregate signal.
#[derive(Debug)]
pub struct IdleDebouncer {
    idle_delay: Duration,
    grace_window: Duration,
    idle_deadline: Option<Instant>,
    last_activity: Option<Instant>,
    grace_expiry: Option<Instant>,
    has_activity: bool,
}

impl IdleDebouncer {
    pub fn new(idle_delay: Duration, grace_window: Duration) -> Self {
        Self {
            idle_delay,
            grace_window,
            idle_deadline: None,
            last_activity: None,
            grace_expiry: None,
            has_activity: false,
        }
    }

    /// Records live write activity and re-arms the idle deadline.
    pub fn record_activity(&mut self, now: Instant) {
        self.idle_deadline = Some(now + self.idle_delay);
        self.last_activity = Some(now);
    }

    /// When the shared idle timer fires, if armed.
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_deadline
    }

    /// Disarms the idle timer after it fired.
    ///
    /// Call [`evaluate`](Self::evaluate) before clearing session flags so
    /// the grace window starts at the expiry instant.
    pub fn on_idle(&mut self) {
        self.idle_deadline = None;
    }

    /// Recomputes the aggregate signal.
    ///
    /// `any_active` is the per-session predicate folded over all sessions.
    /// Returns the new value of the signal.
    pub fn evaluate(&mut self, now: Instant, any_active: bool) -> bool {
        if any_active {
            self.last_activity = Some(now);
            self.grace_expiry = None;
            self.has_activity = true;
            return true;
        }

        let expiry = self.last_activity.map(|t| t + self.grace_window);
        self.has_activity = expiry.is_some_and(|expiry| now < expiry);
        self.grace_expiry = if self.has_activity { expiry } else { None };
        self.has_activity
    }

    /// When the aggregate will drop to false unless new activity arrives.
    pub fn grace_expiry(&self) -> Option<Instant> {
        self.grace_expiry
    }

    /// Last computed value of the aggregate signal.
    pub fn has_activity(&self) -> bool {
        self.has_activity
    }

    /// Forgets all timers.
    pub fn reset(&mut self) {
        self.idle_deadline = None;
        self.last_activity = None;
        self.grace_expiry = None;
        self.has_activity = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_millis(4000);
    const GRACE: Duration = Duration::from_millis(1500);

    #[test]
    fn test_starts_inactive() {
        let mut debouncer = IdleDebouncer::new(IDLE, GRACE);
        assert!(!debouncer.evaluate(Instant::now(), false));
        assert!(debouncer.idle_deadline().is_none());
        assert!(debouncer.grace_expiry().is_none());
    }

    #[test]
    fn test_activity_rearms_idle_deadline() {
        let t0 = Instant::now();
        let mut debouncer = IdleDebouncer::new(IDLE, GRACE);

        debouncer.record_activity(t0);
        assert_eq!(debouncer.idle_deadline(), Some(t0 + IDLE));

        let later = t0 + Duration::from_millis(3000);
        debouncer.record_activity(later);
        assert_eq!(debouncer.idle_deadline(), Some(later + IDLE));

        debouncer.on_idle();
        assert!(debouncer.idle_deadline().is_none());
    }

    #[test]
    fn test_grace_window_holds_signal() {
        let t = Instant::now();
        let mut debouncer = IdleDebouncer::new(IDLE, GRACE);

        assert!(debouncer.evaluate(t, true));

        // Last active session went quiet at t
        assert!(debouncer.evaluate(t, false));
        assert_eq!(debouncer.grace_expiry(), Some(t + GRACE));

        assert!(debouncer.evaluate(t + GRACE - Duration::from_millis(1), false));
        assert!(!debouncer.evaluate(t + GRACE, false));
        assert!(debouncer.grace_expiry().is_none());
        assert!(!debouncer.has_activity());
    }

    #[test]
    fn test_activity_during_grace_cancels_expiry() {
        let t = Instant::now();
        let mut debouncer = IdleDebouncer::new(IDLE, GRACE);
        debouncer.evaluate(t, true);
        debouncer.evaluate(t + Duration::from_millis(100), false);
        assert!(debouncer.grace_expiry().is_some());

        assert!(debouncer.evaluate(t + Duration::from_millis(500), true));
        assert!(debouncer.grace_expiry().is_none());

        // Grace restarts from the latest active evaluation
        debouncer.evaluate(t + Duration::from_millis(600), false);
        assert_eq!(
            debouncer.grace_expiry(),
            Some(t + Duration::from_millis(500) + GRACE)
        );
    }

    #[test]
    fn test_idle_expiry_restarts_grace() {
        let t0 = Instant::now();
        let mut debouncer = IdleDebouncer::new(IDLE, GRACE);
        debouncer.record_activity(t0);
        debouncer.evaluate(t0, true);

        // Still thinking when the timer fires
        let fired = t0 + IDLE;
        assert!(debouncer.evaluate(fired, true));
        debouncer.on_idle();

        assert!(debouncer.evaluate(fired, false));
        assert_eq!(debouncer.grace_expiry(), Some(fired + GRACE));
    }
}
