//! Coaching nudge after sustained silence

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use super::{MonitorAction, MonitorTimer};
use crate::audio::VolumeSample;

/// Sends a coaching prompt when the microphone stays quiet
#[derive(Debug, Clone)]
pub struct SilenceMonitor {
    /// Volume below this counts as silence
    pub threshold: f32,
    /// How long silence must last
    pub debounce: Duration,
    /// Text injected as a user turn when the monitor fires
    pub nudge_text: String,
}

impl SilenceMonitor {
    /// Check a volume level against the threshold
    #[must_use]
    pub fn is_silent(&self, level: f32) -> bool {
        level < self.threshold
    }

    /// Run until the volume feed or the action channel closes
    pub async fn run(
        self,
        mut volume: watch::Receiver<VolumeSample>,
        actions: mpsc::Sender<MonitorAction>,
    ) {
        let mut timer = MonitorTimer::new(self.debounce);
        let mut level = volume.borrow_and_update().level;
        timer.observe(self.is_silent(level), Instant::now());

        tracing::debug!(
            threshold = self.threshold,
            debounce_secs = self.debounce.as_secs(),
            "silence monitor started"
        );

        loop {
            let deadline = timer.deadline();

            tokio::select! {
                changed = volume.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    level = volume.borrow_and_update().level;
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }

            if timer.observe(self.is_silent(level), Instant::now()) {
                tracing::info!(level, "sustained silence, sending nudge");
                if actions
                    .send(MonitorAction::Nudge(self.nudge_text.clone()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }

        tracing::debug!("silence monitor stopped");
    }
}
