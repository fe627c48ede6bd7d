//! Debounce state machine shared by the conditional monitors

use std::time::Duration;

use tokio::time::Instant;

/// State of a monitor timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Condition false, nothing pending
    Idle,
    /// Condition true since arming; fires at `deadline` if it holds
    Armed { deadline: Instant },
    /// Fired; returns to idle on the next observation
    Fired,
}

/// Fires once when a condition holds for a full debounce window
#[derive(Debug, Clone)]
pub struct MonitorTimer {
    debounce: Duration,
    state: TimerState,
}

impl MonitorTimer {
    /// Create an idle timer
    #[must_use]
    pub const fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: TimerState::Idle,
        }
    }

    /// Feed the current condition
    ///
    /// Returns true exactly when the timer fires.
    pub fn observe(&mut self, condition: bool, now: Instant) -> bool {
        match self.state {
            TimerState::Idle => {
                if condition {
                    self.state = TimerState::Armed {
                        deadline: now + self.debounce,
                    };
                    tracing::trace!(debounce_ms = self.debounce.as_millis(), "monitor armed");
                }
                false
            }
            TimerState::Armed { deadline } => {
                if !condition {
                    self.state = TimerState::Idle;
                    tracing::trace!("monitor disarmed");
                    false
                } else if now >= deadline {
                    self.state = TimerState::Fired;
                    true
                } else {
                    false
                }
            }
            TimerState::Fired => {
                self.state = TimerState::Idle;
                false
            }
        }
    }

    /// Clear a pending arm without firing
    pub fn dismiss(&mut self) {
        self.state = TimerState::Idle;
    }

    /// Deadline while armed
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        match self.state {
            TimerState::Armed { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> TimerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn fires_after_debounce() {
        let start = Instant::now();
        let mut timer = MonitorTimer::new(WINDOW);

        assert!(!timer.observe(true, start));
        assert_eq!(timer.deadline(), Some(start + WINDOW));
        assert!(!timer.observe(true, start + Duration::from_secs(9)));
        assert!(timer.observe(true, start + WINDOW));
        assert_eq!(timer.state(), TimerState::Fired);
    }

    #[test]
    fn fires_once_per_arming() {
        let start = Instant::now();
        let mut timer = MonitorTimer::new(WINDOW);

        timer.observe(true, start);
        assert!(timer.observe(true, start + WINDOW));
        assert!(!timer.observe(true, start + WINDOW + Duration::from_millis(100)));
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[test]
    fn condition_reversal_disarms() {
        let start = Instant::now();
        let mut timer = MonitorTimer::new(WINDOW);

        timer.observe(true, start);
        assert!(!timer.observe(false, start + Duration::from_secs(5)));
        assert_eq!(timer.state(), TimerState::Idle);

        // Re-arming starts a fresh window
        timer.observe(true, start + Duration::from_secs(6));
        assert!(!timer.observe(true, start + Duration::from_secs(11)));
        assert!(timer.observe(true, start + Duration::from_secs(16)));
    }

    #[test]
    fn dismiss_clears_without_firing() {
        let start = Instant::now();
        let mut timer = MonitorTimer::new(WINDOW);

        timer.observe(true, start);
        timer.dismiss();
        assert_eq!(timer.deadline(), None);
        assert!(!timer.observe(true, start + WINDOW));
    }
}
