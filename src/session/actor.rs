//! The per-session actor
//!
//! One task owns everything a session holds and serializes every mutation:
//! handle commands, inbound messages, captured frames, monitor actions and
//! tool results are all handled from a single `select!` loop. Teardown runs
//! in that same task, so it cannot race with any of them.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::wire::{ClientMessage, ServerEvent, ServerMessage};
use super::{Command, ConnectionState, SessionEvent, SessionSnapshot, Transport};
use crate::audio::{CaptureStream, CapturedFrame, DeviceGuard, PlaybackScheduler, VolumeSample};
use crate::config::Config;
use crate::dashboard::{AppEvent, DashboardHandle};
use crate::monitors::{
    AmbientScan, EnvironmentScanner, MonitorAction, MonitorSet, NoiseMonitor, SilenceMonitor,
};
use crate::sentiment::{Extracted, SentimentExtractor};
use crate::tools::{ToolDispatcher, ToolRequest, ToolResult};
use crate::{Error, Result};

/// Capacity of the monitor -> actor channel
const MONITOR_CAPACITY: usize = 16;

/// Why the loop stopped
struct Stop {
    state: ConnectionState,
    reason: String,
    /// Notified once teardown has finished
    done: Option<oneshot::Sender<()>>,
}

impl Stop {
    fn closed(reason: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Closed,
            reason: reason.into(),
            done: None,
        }
    }

    fn failed(error: &Error) -> Self {
        Self {
            state: ConnectionState::Failed,
            reason: error.to_string(),
            done: None,
        }
    }
}

type Flow = ControlFlow<Stop>;

/// Everything an open session owns
pub(crate) struct SessionParts {
    pub id: Uuid,
    pub config: Arc<Config>,
    pub transport: Box<dyn Transport>,
    pub scheduler: PlaybackScheduler,
    pub output: DeviceGuard,
    pub capture: Option<CaptureStream>,
    pub commands: mpsc::Receiver<Command>,
    pub dispatcher: ToolDispatcher,
    pub dashboard: DashboardHandle,
    pub privacy: watch::Receiver<bool>,
    pub scanner: Option<Arc<dyn EnvironmentScanner>>,
    pub snapshot: Arc<watch::Sender<SessionSnapshot>>,
    pub events: broadcast::Sender<SessionEvent>,
}

pub(crate) struct SessionActor {
    id: Uuid,
    transport: Box<dyn Transport>,
    transport_open: bool,
    commands: mpsc::Receiver<Command>,
    capture: Option<CaptureStream>,
    scheduler: PlaybackScheduler,
    output: DeviceGuard,
    monitors: MonitorSet,
    monitor_rx: mpsc::Receiver<MonitorAction>,
    volume: watch::Sender<VolumeSample>,
    tool_tx: Option<mpsc::UnboundedSender<ToolRequest>>,
    tool_results: mpsc::UnboundedReceiver<ToolResult>,
    tool_worker: Option<JoinHandle<()>>,
    /// Pending tool call id -> tool name
    ledger: HashMap<String, String>,
    text_tags: SentimentExtractor,
    transcript_tags: SentimentExtractor,
    dashboard: DashboardHandle,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionActor {
    /// Wire up the actor and start its helper tasks
    pub(crate) fn new(parts: SessionParts) -> Self {
        let (volume, volume_rx) = watch::channel(VolumeSample::silent());
        let (monitor_tx, monitor_rx) = mpsc::channel(MONITOR_CAPACITY);
        let (tool_tx, tool_rx) = mpsc::unbounded_channel();
        let (result_tx, tool_results) = mpsc::unbounded_channel();

        let tool_worker = tokio::spawn(run_tool_worker(parts.dispatcher, tool_rx, result_tx));

        let audio = &parts.config.audio;
        let monitor_config = &parts.config.monitors;
        let mut monitors = MonitorSet::new();

        if parts.capture.is_some() {
            monitors.spawn_silence(
                SilenceMonitor {
                    threshold: audio.silence_threshold,
                    debounce: monitor_config.silence_debounce,
                    nudge_text: monitor_config.nudge_text.clone(),
                },
                volume_rx.clone(),
                monitor_tx.clone(),
            );
            monitors.spawn_noise(
                NoiseMonitor {
                    threshold: audio.loud_threshold,
                    debounce: monitor_config.noise_debounce,
                },
                volume_rx,
                parts.privacy,
                monitor_tx.clone(),
            );
        }

        if let Some(scanner) = parts.scanner {
            monitors.spawn_ambient(
                AmbientScan {
                    scanner,
                    period: monitor_config.scan_period,
                },
                monitor_tx,
            );
        }

        tracing::debug!(session_id = %parts.id, monitors = monitors.len(), "session actor ready");

        Self {
            id: parts.id,
            transport: parts.transport,
            transport_open: true,
            commands: parts.commands,
            capture: parts.capture,
            scheduler: parts.scheduler,
            output: parts.output,
            monitors,
            monitor_rx,
            volume,
            tool_tx: Some(tool_tx),
            tool_results,
            tool_worker: Some(tool_worker),
            ledger: HashMap::new(),
            text_tags: SentimentExtractor::new(),
            transcript_tags: SentimentExtractor::new(),
            dashboard: parts.dashboard,
            snapshot: parts.snapshot,
            events: parts.events,
        }
    }

    /// Run until disconnected, closed by the peer, or failed
    pub(crate) async fn run(mut self) {
        let mut stop = loop {
            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => ControlFlow::Break(Stop::closed("all session handles dropped")),
                },
                message = self.transport.recv() => self.handle_transport(message).await,
                frame = next_frame(&mut self.capture) => self.handle_frame(frame).await,
                Some(action) = self.monitor_rx.recv() => self.handle_monitor(action).await,
                Some(result) = self.tool_results.recv() => self.deliver_result(result).await,
            };

            if let ControlFlow::Break(stop) = flow {
                break stop;
            }
        };

        self.teardown(&stop).await;

        if let Some(done) = stop.done.take() {
            let _ = done.send(());
        }
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::SendAudio(frame) => self.send(&ClientMessage::audio(&frame)).await,
            Command::SendText(text) => self.send(&ClientMessage::text(&text)).await,
            Command::ToolResult { id, response } => {
                let Some(name) = self.ledger.remove(&id) else {
                    self.violation(format!("tool result for unknown call id {id}"));
                    return ControlFlow::Continue(());
                };
                self.publish_pending();
                self.send(&ClientMessage::tool_response(ToolResult { id, name, response }))
                    .await
            }
            Command::Interrupt => {
                tracing::debug!(session_id = %self.id, "local interrupt");
                self.scheduler.flush();
                ControlFlow::Continue(())
            }
            Command::DismissPrivacyPrompt => {
                self.monitors.dismiss_privacy_prompt();
                self.dashboard.emit(AppEvent::PrivacyPromptDismissed).await;
                ControlFlow::Continue(())
            }
            Command::Outstanding(reply) => {
                let mut ids: Vec<String> = self.ledger.keys().cloned().collect();
                ids.sort();
                let _ = reply.send(ids);
                ControlFlow::Continue(())
            }
            Command::Disconnect(done) => ControlFlow::Break(Stop {
                done: Some(done),
                ..Stop::closed("disconnected")
            }),
        }
    }

    async fn handle_transport(&mut self, message: Option<Result<ServerMessage>>) -> Flow {
        match message {
            None => {
                self.transport_open = false;
                ControlFlow::Break(Stop::closed("server closed the connection"))
            }
            Some(Err(e)) if !e.is_fatal() => {
                self.violation(e.to_string());
                ControlFlow::Continue(())
            }
            Some(Err(e)) => {
                self.transport_open = false;
                ControlFlow::Break(Stop::failed(&e))
            }
            Some(Ok(message)) => {
                for event in message.into_events() {
                    if let ControlFlow::Break(stop) = self.handle_server_event(event).await {
                        return ControlFlow::Break(stop);
                    }
                }
                ControlFlow::Continue(())
            }
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) -> Flow {
        match event {
            ServerEvent::SetupComplete => {
                tracing::debug!(session_id = %self.id, "duplicate setup complete ignored");
            }
            ServerEvent::Audio { mime_type, data } => {
                if let Some(span) = self.scheduler.enqueue(&data, Some(&mime_type)) {
                    self.emit(SessionEvent::AudioChunkReceived { span });
                }
            }
            ServerEvent::Text { text, transcript } => {
                let extracted = if transcript {
                    self.transcript_tags.push(&text)
                } else {
                    self.text_tags.push(&text)
                };
                self.publish_text(extracted, transcript).await;
            }
            ServerEvent::Interrupted => {
                tracing::debug!(session_id = %self.id, "model interrupted, flushing playback");
                self.scheduler.flush();
                self.emit(SessionEvent::Interrupted);
            }
            ServerEvent::TurnComplete => {
                let text = self.text_tags.flush();
                self.publish_text(text, false).await;
                let transcript = self.transcript_tags.flush();
                self.publish_text(transcript, true).await;
                self.emit(SessionEvent::TurnComplete);
            }
            ServerEvent::ToolCall(request) => return self.accept_tool_call(request).await,
            ServerEvent::ToolCallCancellation(ids) => {
                tracing::info!(session_id = %self.id, ?ids, "server cancelled tool calls");
            }
            ServerEvent::GoAway { time_left } => {
                tracing::warn!(session_id = %self.id, ?time_left, "server is going away");
            }
            ServerEvent::Error { code, message } => {
                tracing::warn!(session_id = %self.id, ?code, %message, "server reported error");
                self.snapshot
                    .send_modify(|s| s.last_error = Some(message.clone()));
                self.emit(SessionEvent::Error {
                    message,
                    fatal: false,
                });
            }
        }

        ControlFlow::Continue(())
    }

    async fn accept_tool_call(&mut self, request: ToolRequest) -> Flow {
        if self.ledger.contains_key(&request.id) {
            self.violation(format!("duplicate tool call id {}", request.id));
            return ControlFlow::Continue(());
        }

        tracing::info!(session_id = %self.id, tool = %request.name, id = %request.id, "tool call");
        self.ledger.insert(request.id.clone(), request.name.clone());
        self.publish_pending();
        self.emit(SessionEvent::ToolCallReceived(request.clone()));

        let Some(tx) = &self.tool_tx else {
            return ControlFlow::Continue(());
        };
        let Err(mpsc::error::SendError(request)) = tx.send(request) else {
            return ControlFlow::Continue(());
        };

        // The call still needs its one answer
        tracing::warn!(session_id = %self.id, id = %request.id, "tool worker is gone, failing call");
        self.ledger.remove(&request.id);
        self.publish_pending();
        self.send(&ClientMessage::tool_response(ToolResult::failure(
            request.id,
            request.name,
            "tool worker stopped",
        )))
        .await
    }

    async fn deliver_result(&mut self, result: ToolResult) -> Flow {
        if self.ledger.remove(&result.id).is_none() {
            tracing::debug!(id = %result.id, "tool call already answered, dropping result");
            return ControlFlow::Continue(());
        }

        self.publish_pending();
        self.send(&ClientMessage::tool_response(result)).await
    }

    async fn handle_frame(&mut self, frame: Option<CapturedFrame>) -> Flow {
        let Some(CapturedFrame { frame, volume }) = frame else {
            tracing::warn!(session_id = %self.id, "microphone stream ended");
            if let Some(mut capture) = self.capture.take() {
                capture.stop().await;
            }
            self.snapshot.send_modify(|s| s.is_streaming = false);
            return ControlFlow::Continue(());
        };

        self.volume.send_replace(volume);
        self.snapshot
            .send_modify(|s| s.volume_level = volume.level);
        self.send(&ClientMessage::audio(&frame)).await
    }

    async fn handle_monitor(&mut self, action: MonitorAction) -> Flow {
        match action {
            MonitorAction::Nudge(text) => self.send(&ClientMessage::text(&text)).await,
            MonitorAction::Urgent(report) => {
                self.dashboard
                    .emit(AppEvent::ScanAlert {
                        summary: report.summary.clone(),
                    })
                    .await;
                self.send(&ClientMessage::text(&report.urgent_text())).await
            }
            MonitorAction::PrivacySuggestion { level } => {
                self.dashboard
                    .emit(AppEvent::PrivacySuggestion { level })
                    .await;
                ControlFlow::Continue(())
            }
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Flow {
        if !self.transport_open {
            return ControlFlow::Continue(());
        }

        match self.transport.send(message).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                tracing::error!(session_id = %self.id, kind = message.kind(), error = %e, "send failed");
                self.transport_open = false;
                ControlFlow::Break(Stop::failed(&e))
            }
        }
    }

    async fn publish_text(&mut self, extracted: Extracted, transcript: bool) {
        for tone in extracted.tones {
            self.dashboard.emit(AppEvent::Tone(tone)).await;
        }

        if !extracted.text.trim().is_empty() {
            self.emit(SessionEvent::TextReceived {
                text: extracted.text,
                transcript,
            });
        }
    }

    fn violation(&self, message: String) {
        tracing::warn!(session_id = %self.id, %message, "protocol violation");
        self.snapshot.send_modify(|s| s.protocol_violations += 1);
        self.emit(SessionEvent::Error {
            message,
            fatal: false,
        });
    }

    fn publish_pending(&self) {
        let pending = self.ledger.len();
        self.snapshot.send_modify(|s| s.pending_tools = pending);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Release everything the session owns, then publish the final state
    async fn teardown(&mut self, stop: &Stop) {
        tracing::info!(session_id = %self.id, reason = %stop.reason, "closing live session");
        self.snapshot.send_modify(|s| s.state = ConnectionState::Closing);

        self.monitors.shutdown().await;

        self.tool_tx.take();
        if let Some(worker) = self.tool_worker.take() {
            worker.abort();
            let _ = worker.await;
        }

        // Results the worker finished before it stopped still go out
        while let Ok(result) = self.tool_results.try_recv() {
            if self.ledger.remove(&result.id).is_some() {
                let _ = self.send(&ClientMessage::tool_response(result)).await;
            }
        }

        let mut pending: Vec<(String, String)> = self.ledger.drain().collect();
        pending.sort();
        for (id, name) in pending {
            tracing::debug!(session_id = %self.id, %id, "cancelling pending tool call");
            let _ = self
                .send(&ClientMessage::tool_response(ToolResult::cancelled(id, name)))
                .await;
        }

        self.scheduler.stop();
        self.output.release_async().await;

        if let Some(mut capture) = self.capture.take() {
            capture.stop().await;
        }

        if self.transport_open {
            self.transport_open = false;
            if let Err(e) = self.transport.close().await {
                tracing::debug!(session_id = %self.id, error = %e, "transport close failed");
            }
        }

        self.text_tags.flush();
        self.transcript_tags.flush();

        let failed = stop.state == ConnectionState::Failed;
        self.snapshot.send_modify(|s| {
            s.state = stop.state;
            s.is_connected = false;
            s.is_streaming = false;
            s.volume_level = 0.0;
            s.pending_tools = 0;
            if failed {
                s.last_error = Some(stop.reason.clone());
            }
        });

        if failed {
            self.emit(SessionEvent::Error {
                message: stop.reason.clone(),
                fatal: true,
            });
        }
        self.emit(SessionEvent::Closed {
            reason: stop.reason.clone(),
        });

        tracing::info!(session_id = %self.id, state = %stop.state, "live session closed");
    }
}

/// Wait for the next captured frame; pending forever without a microphone
async fn next_frame(capture: &mut Option<CaptureStream>) -> Option<CapturedFrame> {
    match capture {
        Some(stream) => stream.next_frame().await,
        None => std::future::pending().await,
    }
}

/// Runs tool calls one at a time, so results leave in request order
async fn run_tool_worker(
    dispatcher: ToolDispatcher,
    mut requests: mpsc::UnboundedReceiver<ToolRequest>,
    results: mpsc::UnboundedSender<ToolResult>,
) {
    while let Some(request) = requests.recv().await {
        let result = dispatcher.dispatch(&request).await;
        if results.send(result).is_err() {
            break;
        }
    }
}
