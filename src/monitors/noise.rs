//! Privacy prompt when the room gets loud in privacy mode

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, sleep_until};

use super::{MonitorAction, MonitorTimer};
use crate::audio::VolumeSample;

/// Suggests hiding sensitive data when sustained loud audio suggests company
#[derive(Debug, Clone)]
pub struct NoiseMonitor {
    /// Volume above this counts as loud
    pub threshold: f32,
    pub debounce: Duration,
}

impl NoiseMonitor {
    /// Trigger condition
    #[must_use]
    pub fn is_triggered(&self, level: f32, privacy_mode: bool) -> bool {
        privacy_mode && level > self.threshold
    }

    /// Run until the volume feed or the action channel closes
    ///
    /// A notification on `dismiss` clears a pending prompt without firing; the
    /// monitor stays quiet until the condition has cleared once.
    pub async fn run(
        self,
        mut volume: watch::Receiver<VolumeSample>,
        mut privacy: watch::Receiver<bool>,
        dismiss: Arc<Notify>,
        actions: mpsc::Sender<MonitorAction>,
    ) {
        let mut timer = MonitorTimer::new(self.debounce);
        let mut level = volume.borrow_and_update().level;
        let mut private = *privacy.borrow_and_update();
        let mut suppressed = false;
        timer.observe(self.is_triggered(level, private), Instant::now());

        loop {
            let deadline = timer.deadline();

            tokio::select! {
                changed = volume.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    level = volume.borrow_and_update().level;
                }
                changed = privacy.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    private = *privacy.borrow_and_update();
                }
                () = dismiss.notified() => {
                    tracing::debug!("privacy prompt dismissed");
                    timer.dismiss();
                    suppressed = true;
                    continue;
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }

            let triggered = self.is_triggered(level, private);
            if !triggered {
                suppressed = false;
            }

            if timer.observe(triggered && !suppressed, Instant::now()) {
                tracing::info!(level, "sustained noise in privacy mode, suggesting privacy");
                if actions
                    .send(MonitorAction::PrivacySuggestion { level })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }

        tracing::debug!("noise monitor stopped");
    }
}
