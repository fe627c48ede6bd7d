//! Live streaming sessions
//!
//! A `Bridge` owns at most one active `LiveSession`. Each session runs as a
//! single actor task that owns the transport, the microphone, the playback
//! scheduler, the monitors and the tool ledger; everything else talks to it
//! through the cloneable `LiveSession` handle. Consumers read the
//! `SessionSnapshot` from a watch channel and receive `SessionEvent`s from a
//! broadcast channel.

mod actor;
mod bridge;
pub mod transport;
pub mod wire;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use bridge::Bridge;
pub use transport::{Connector, Transport, WsConnector, WsTransport};
pub use wire::{ClientMessage, ServerEvent, ServerMessage};

use crate::audio::{AudioFrame, ScheduledSpan};
use crate::tools::ToolRequest;

/// Capacity of a session's command channel
const COMMAND_CAPACITY: usize = 256;

/// Capacity of the session event broadcast
const EVENT_CAPACITY: usize = 256;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// Connecting or open
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Closed or failed
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Read model of the current session for the rendering layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Transport open and set up
    pub is_connected: bool,
    /// Microphone frames are being sent
    pub is_streaming: bool,
    /// RMS of the latest captured frame
    pub volume_level: f32,
    /// Caller or peer protocol errors absorbed by this session
    pub protocol_violations: u64,
    /// Tool calls accepted but not yet answered
    pub pending_tools: usize,
}

/// Something that happened on the session, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Inbound audio was scheduled for playback
    AudioChunkReceived { span: ScheduledSpan },
    /// Model text with sentiment tags removed
    TextReceived { text: String, transcript: bool },
    /// The model called a tool
    ToolCallReceived(ToolRequest),
    /// The model finished its turn
    TurnComplete,
    /// The model stopped speaking because the user barged in
    Interrupted,
    /// The session ended
    Closed { reason: String },
    /// Something went wrong; `fatal` errors end the session
    Error { message: String, fatal: bool },
}

/// Requests from handles to the session actor
#[derive(Debug)]
pub(crate) enum Command {
    SendAudio(AudioFrame),
    SendText(String),
    ToolResult { id: String, response: Value },
    Interrupt,
    DismissPrivacyPrompt,
    Outstanding(oneshot::Sender<Vec<String>>),
    Disconnect(oneshot::Sender<()>),
}

/// Handle to one live session
///
/// Cheap to clone. Every send is a no-op unless the session is Open.
#[derive(Clone)]
pub struct LiveSession {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LiveSession {
    pub(crate) fn new(
        id: Uuid,
        commands: mpsc::Sender<Command>,
        snapshot: watch::Receiver<SessionSnapshot>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            commands,
            snapshot,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current state of this session
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        let snapshot = self.snapshot.borrow();
        if snapshot.session_id == Some(self.id) {
            snapshot.state
        } else {
            // A newer session has replaced this one
            ConnectionState::Closed
        }
    }

    /// Check if the session is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Send a captured audio frame
    pub async fn send_audio_frame(&self, frame: AudioFrame) {
        self.command(Command::SendAudio(frame)).await;
    }

    /// Inject a user turn of text
    pub async fn send_text(&self, text: impl Into<String>) {
        self.command(Command::SendText(text.into())).await;
    }

    /// Answer a pending tool call
    ///
    /// Unknown ids are counted as protocol violations and reported as a
    /// non-fatal `SessionEvent::Error`.
    pub async fn send_tool_result(&self, id: impl Into<String>, response: Value) {
        self.command(Command::ToolResult {
            id: id.into(),
            response,
        })
        .await;
    }

    /// Stop local playback immediately (user barge-in)
    pub async fn interrupt(&self) {
        self.command(Command::Interrupt).await;
    }

    /// Dismiss a pending or shown privacy prompt
    pub async fn dismiss_privacy_prompt(&self) {
        self.command(Command::DismissPrivacyPrompt).await;
    }

    /// Ids of tool calls not yet answered, sorted
    pub async fn outstanding_tool_calls(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Outstanding(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Tear the session down and wait until every resource is released
    ///
    /// Safe to call repeatedly and from several handles.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(tx)).await.is_ok() {
            let _ = rx.await;
        }
        self.join().await;
    }

    /// Wait for the actor task to finish
    pub(crate) async fn join(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(session_id = %self.id, error = %e, "session task ended abnormally");
        }
    }

    async fn command(&self, command: Command) {
        if !self.is_open() {
            tracing::trace!(session_id = %self.id, ?command, "session not open, dropping");
            return;
        }
        let _ = self.commands.send(command).await;
    }
}

impl fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_terminal_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Open.is_active());
        assert!(!ConnectionState::Closing.is_active());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Idle.is_terminal());
    }

    #[test]
    fn snapshot_serializes_state() {
        let snapshot = SessionSnapshot {
            state: ConnectionState::Open,
            ..SessionSnapshot::default()
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["state"], "open");
        assert_eq!(value["is_connected"], false);
    }
}
