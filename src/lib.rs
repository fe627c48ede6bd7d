//! Live Bridge - real-time multimodal session bridge for voice assistants
//!
//! This library connects the local microphone and speaker to a remote
//! bidirectional model session:
//! - Microphone capture, framing and volume metering
//! - Gapless playback of streamed model audio
//! - Session lifecycle over a WebSocket transport
//! - Tool calls answered exactly once
//! - Dashboard state (display mode, widgets, privacy) and sentiment tags
//! - Background monitors (silence nudges, noise privacy prompts, ambient scans)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌───────────────────────────┐   JSON    ┌────────────┐
//! │  Microphone  │──────────▶│                           │──────────▶│            │
//! └──────────────┘           │        SessionActor       │           │   Model    │
//! ┌──────────────┐  spans    │  transport · tools ·      │◀──────────│  service   │
//! │   Speaker    │◀──────────│  monitors · sentiment     │           │            │
//! └──────────────┘           └─────────────┬─────────────┘           └────────────┘
//!                                          │ snapshot · events
//!                            ┌─────────────▼─────────────┐
//!                            │  Bridge  │  Dashboard     │
//!                            └───────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod monitors;
pub mod sentiment;
pub mod session;
pub mod tools;

pub use config::Config;
pub use dashboard::{AppEvent, DashboardHandle, DisplayMode, Widget, WidgetSpec};
pub use error::{Error, Result};
pub use sentiment::{Sentiment, SentimentExtractor, ToneEvent};
pub use session::{Bridge, ConnectionState, LiveSession, SessionEvent, SessionSnapshot};
pub use tools::{ToolDispatcher, ToolHandler, ToolRequest, ToolResult};
