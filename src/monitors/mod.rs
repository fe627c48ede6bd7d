//! Background monitors owned by a live session
//!
//! Each monitor is a task reading shared state (volume, privacy flag) and
//! reporting through a channel into the session actor. The session owns the
//! `MonitorSet`; shutting it down or dropping it aborts every task, so no
//! monitor can act after the session leaves Open.

mod ambient;
mod noise;
mod silence;
mod timer;

use std::sync::Arc;

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinSet;

pub use ambient::{AmbientScan, EnvironmentScanner, HttpScanner, ScanReport, Severity};
pub use noise::NoiseMonitor;
pub use silence::SilenceMonitor;
pub use timer::{MonitorTimer, TimerState};

use crate::audio::VolumeSample;

/// What a monitor asks the session to do
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorAction {
    /// Inject a coaching prompt
    Nudge(String),
    /// Inject an urgent message for a high-severity scan finding
    Urgent(ScanReport),
    /// Show the privacy suggestion
    PrivacySuggestion { level: f32 },
}

/// The monitor tasks of one session
pub struct MonitorSet {
    tasks: JoinSet<()>,
    dismiss: Arc<Notify>,
}

impl Default for MonitorSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            dismiss: Arc::new(Notify::new()),
        }
    }

    /// Start the silence nudge
    pub fn spawn_silence(
        &mut self,
        monitor: SilenceMonitor,
        volume: watch::Receiver<VolumeSample>,
        actions: mpsc::Sender<MonitorAction>,
    ) {
        self.tasks.spawn(monitor.run(volume, actions));
    }

    /// Start the noise privacy prompt
    pub fn spawn_noise(
        &mut self,
        monitor: NoiseMonitor,
        volume: watch::Receiver<VolumeSample>,
        privacy: watch::Receiver<bool>,
        actions: mpsc::Sender<MonitorAction>,
    ) {
        let dismiss = Arc::clone(&self.dismiss);
        self.tasks
            .spawn(monitor.run(volume, privacy, dismiss, actions));
    }

    /// Start the periodic ambient scan
    pub fn spawn_ambient(&mut self, scan: AmbientScan, actions: mpsc::Sender<MonitorAction>) {
        self.tasks.spawn(scan.run(actions));
    }

    /// Clear a pending privacy prompt without firing
    pub fn dismiss_privacy_prompt(&self) {
        self.dismiss.notify_one();
    }

    /// Number of running monitors
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if no monitor is running
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every monitor and wait for them to finish
    pub async fn shutdown(&mut self) {
        let running = self.tasks.len();
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}

        if running > 0 {
            tracing::debug!(monitors = running, "monitors stopped");
        }
    }
}
