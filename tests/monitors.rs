//! Background monitor timing tests
//!
//! Use tokio's paused clock so debounce windows elapse instantly

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use live_bridge::audio::VolumeSample;
use live_bridge::config::CapturePolicy;
use live_bridge::monitors::{
    EnvironmentScanner, MonitorAction, NoiseMonitor, ScanReport, Severity, SilenceMonitor,
};
use live_bridge::{AppEvent, Bridge, DashboardHandle, Result};
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, sleep, timeout};

mod common;
use common::{FakeOutput, FakeSource, MockConnector, SetupReply, test_config};

fn level(level: f32) -> VolumeSample {
    VolumeSample {
        level,
        at: Instant::now(),
    }
}

fn silence_monitor() -> SilenceMonitor {
    SilenceMonitor {
        threshold: 0.01,
        debounce: Duration::from_secs(10),
        nudge_text: "Still there?".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_silence_nudges_once_after_debounce() {
    let (_volume_tx, volume_rx) = watch::channel(level(0.0));
    let (tx, mut rx) = mpsc::channel(4);
    let started = Instant::now();
    tokio::spawn(silence_monitor().run(volume_rx, tx));

    let action = timeout(Duration::from_secs(11), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(action, MonitorAction::Nudge("Still there?".to_string()));
    assert!(started.elapsed() >= Duration::from_secs(10));

    // Silence continues but nothing new is observed
    assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_speech_resets_silence_window() {
    let (volume_tx, volume_rx) = watch::channel(level(0.0));
    let (tx, mut rx) = mpsc::channel(4);
    let started = Instant::now();
    tokio::spawn(silence_monitor().run(volume_rx, tx));

    sleep(Duration::from_secs(5)).await;
    volume_tx.send_replace(level(0.4));
    sleep(Duration::from_secs(1)).await;
    volume_tx.send_replace(level(0.0));

    let action = timeout(Duration::from_secs(30), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(action, MonitorAction::Nudge(_)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(16), "fired at {elapsed:?}");
    assert!(elapsed < Duration::from_secs(17), "fired at {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_noise_requires_privacy_mode() {
    let (_volume_tx, volume_rx) = watch::channel(level(0.8));
    let (privacy_tx, privacy_rx) = watch::channel(false);
    let (tx, mut rx) = mpsc::channel(4);
    let monitor = NoiseMonitor {
        threshold: 0.3,
        debounce: Duration::from_secs(2),
    };
    tokio::spawn(monitor.run(volume_rx, privacy_rx, Arc::new(Notify::new()), tx));

    assert!(timeout(Duration::from_secs(10), rx.recv()).await.is_err());

    privacy_tx.send_replace(true);
    let action = timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(action, MonitorAction::PrivacySuggestion { level } if level > 0.3));
}

#[tokio::test(start_paused = true)]
async fn test_dismissed_noise_prompt_stays_quiet_until_cleared() {
    let (volume_tx, volume_rx) = watch::channel(level(0.8));
    let (_privacy_tx, privacy_rx) = watch::channel(true);
    let dismiss = Arc::new(Notify::new());
    let (tx, mut rx) = mpsc::channel(4);
    let monitor = NoiseMonitor {
        threshold: 0.3,
        debounce: Duration::from_secs(2),
    };
    tokio::spawn(monitor.run(volume_rx, privacy_rx, Arc::clone(&dismiss), tx));

    sleep(Duration::from_secs(1)).await;
    dismiss.notify_one();
    volume_tx.send_replace(level(0.9));

    assert!(timeout(Duration::from_secs(10), rx.recv()).await.is_err());

    volume_tx.send_replace(level(0.0));
    sleep(Duration::from_millis(100)).await;
    volume_tx.send_replace(level(0.9));

    let action = timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(action, MonitorAction::PrivacySuggestion { .. }));
}

struct FixedScanner(ScanReport);

#[async_trait]
impl EnvironmentScanner for FixedScanner {
    async fn scan(&self) -> Result<ScanReport> {
        Ok(self.0.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn test_high_severity_scan_reaches_model_and_dashboard() {
    let dashboard = DashboardHandle::default();
    let mut app = dashboard.subscribe().await;
    let (connector, peer) = MockConnector::new(SetupReply::Ack);
    let mut config = test_config(CapturePolicy::Disabled);
    config.monitors.scan_period = Duration::from_secs(30);

    let bridge = Bridge::new(config, dashboard)
        .unwrap()
        .with_connector(connector)
        .with_output(FakeOutput::new())
        .with_scanner(Arc::new(FixedScanner(ScanReport {
            severity: Severity::High,
            summary: "smoke detected".to_string(),
        })));
    bridge.connect().await.unwrap();

    let event = timeout(Duration::from_secs(31), app.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        AppEvent::ScanAlert {
            summary: "smoke detected".to_string()
        }
    );

    peer.wait_until(|p| p.text_turns().iter().any(|t| t == "URGENT: smoke detected"))
        .await;

    bridge.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_low_severity_scan_is_only_logged() {
    let (connector, peer) = MockConnector::new(SetupReply::Ack);
    let bridge = Bridge::new(test_config(CapturePolicy::Disabled), DashboardHandle::default())
        .unwrap()
        .with_connector(connector)
        .with_output(FakeOutput::new())
        .with_scanner(Arc::new(FixedScanner(ScanReport {
            severity: Severity::Low,
            summary: "all quiet".to_string(),
        })));
    bridge.connect().await.unwrap();

    sleep(Duration::from_secs(300)).await;

    assert!(peer.text_turns().is_empty());
    bridge.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_silence_nudge_reaches_model_until_disconnect() {
    let (connector, peer) = MockConnector::new(SetupReply::Ack);
    let source = FakeSource::new();
    let config = test_config(CapturePolicy::Required);
    let debounce = config.monitors.silence_debounce;
    let nudge = config.monitors.nudge_text.clone();
    let frame_samples = config.audio.frame_samples;

    let bridge = Bridge::new(config, DashboardHandle::default())
        .unwrap()
        .with_connector(connector)
        .with_output(FakeOutput::new())
        .with_audio_source(source.clone());
    bridge.connect().await.unwrap();

    source.push(vec![0.0; frame_samples * 2]).await;
    sleep(debounce + Duration::from_secs(1)).await;
    peer.wait_until(|p| p.text_turns() == [nudge.clone()]).await;

    bridge.disconnect().await;
    assert_eq!(source.held(), 0);
    let sent = peer.sent().len();

    source.push(vec![0.0; frame_samples]).await;
    sleep(debounce * 5).await;

    assert_eq!(peer.sent().len(), sent);
    assert_eq!(peer.text_turns(), [nudge]);
}

#[tokio::test(start_paused = true)]
async fn test_ambient_scan_stops_with_session() {
    let (connector, peer) = MockConnector::new(SetupReply::Ack);
    let mut config = test_config(CapturePolicy::Disabled);
    config.monitors.scan_period = Duration::from_secs(30);

    let bridge = Bridge::new(config, DashboardHandle::default())
        .unwrap()
        .with_connector(connector)
        .with_output(FakeOutput::new())
        .with_scanner(Arc::new(FixedScanner(ScanReport {
            severity: Severity::High,
            summary: "smoke detected".to_string(),
        })));
    bridge.connect().await.unwrap();

    sleep(Duration::from_secs(31)).await;
    peer.wait_until(|p| p.text_turns().len() == 1).await;

    bridge.disconnect().await;
    let sent = peer.sent().len();
    sleep(Duration::from_secs(150)).await;

    assert_eq!(peer.sent().len(), sent);
    assert_eq!(peer.text_turns(), ["URGENT: smoke detected"]);
}
