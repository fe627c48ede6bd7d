//! Dashboard state shared between the session and the UI
//!
//! Holds what remote tool calls mutate (display mode, widgets) plus the
//! privacy flag the noise monitor reads. Every change is broadcast as an
//! `AppEvent` so the rendering layer can stay a pure consumer.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, watch};

use crate::sentiment::ToneEvent;
use crate::{Error, Result};

/// Channel capacity for application events
const CHANNEL_CAPACITY: usize = 64;

/// Presentation mode of the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayMode {
    #[default]
    Standard,
    /// Distractions hidden
    FocusShield,
    HighContrast,
    LargeText,
}

impl DisplayMode {
    /// All modes, in declaration order
    pub const ALL: [Self; 4] = [
        Self::Standard,
        Self::FocusShield,
        Self::HighContrast,
        Self::LargeText,
    ];

    /// Wire name (`FOCUS_SHIELD`, ...)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::FocusShield => "FOCUS_SHIELD",
            Self::HighContrast => "HIGH_CONTRAST",
            Self::LargeText => "LARGE_TEXT",
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| Error::Handler(format!("unknown display mode: {s}")))
    }
}

/// Widget requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetSpec {
    /// Caller-chosen id; repeating it replaces the earlier widget
    #[serde(default)]
    pub id: Option<String>,
    /// Kind of widget (chart, metric, table, ...)
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    /// Opaque payload rendered by the UI
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A widget on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Application-level event for the rendering layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// Sentiment tag seen in model text
    Tone(ToneEvent),
    /// Display mode changed
    ModeChanged { mode: DisplayMode },
    /// New widget appended
    WidgetCreated { widget: Widget },
    /// Existing widget replaced
    WidgetUpdated { widget: Widget },
    /// Privacy flag toggled
    PrivacyModeChanged { enabled: bool },
    /// Sustained loud audio while privacy mode is on
    PrivacySuggestion { level: f32 },
    /// User dismissed the privacy prompt
    PrivacyPromptDismissed,
    /// Ambient scan reported something worth attention
    ScanAlert { summary: String },
}

/// Dashboard state
///
/// Owns the widget list and broadcasts every change to subscribers.
pub struct Dashboard {
    mode: DisplayMode,
    widgets: Vec<Widget>,
    privacy: watch::Sender<bool>,
    tx: broadcast::Sender<AppEvent>,
    next_id: u64,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    /// Create an empty dashboard in standard mode
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (privacy, _) = watch::channel(false);
        Self {
            mode: DisplayMode::default(),
            widgets: Vec::new(),
            privacy,
            tx,
            next_id: 0,
        }
    }

    /// Subscribe to application events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Watch the privacy flag
    #[must_use]
    pub fn watch_privacy(&self) -> watch::Receiver<bool> {
        self.privacy.subscribe()
    }

    /// Broadcast an event (ignored if nobody listens)
    pub fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    /// Current display mode
    #[must_use]
    pub const fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Set the display mode; setting the current mode again is harmless
    pub fn set_mode(&mut self, mode: DisplayMode) {
        if self.mode != mode {
            tracing::info!(from = %self.mode, to = %mode, "display mode changed");
        }
        self.mode = mode;
        self.emit(AppEvent::ModeChanged { mode });
    }

    /// Append a widget, or replace the one with the same id
    ///
    /// Returns the stored widget
    pub fn upsert_widget(&mut self, spec: WidgetSpec) -> Widget {
        let now = Utc::now();

        if let Some(id) = spec.id.as_deref()
            && let Some(existing) = self.widgets.iter_mut().find(|w| w.id == id)
        {
            existing.kind = spec.kind;
            existing.title = spec.title;
            existing.data = spec.data;
            existing.updated_at = now;

            let widget = existing.clone();
            tracing::debug!(id = %widget.id, "widget updated");
            self.emit(AppEvent::WidgetUpdated {
                widget: widget.clone(),
            });
            return widget;
        }

        let id = spec.id.unwrap_or_else(|| self.generate_id());
        let widget = Widget {
            id,
            kind: spec.kind,
            title: spec.title,
            data: spec.data,
            created_at: now,
            updated_at: now,
        };
        self.widgets.push(widget.clone());

        tracing::debug!(id = %widget.id, kind = %widget.kind, "widget created");
        self.emit(AppEvent::WidgetCreated {
            widget: widget.clone(),
        });
        widget
    }

    /// Current widgets, in creation order
    #[must_use]
    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    /// Check if privacy mode is on
    #[must_use]
    pub fn privacy_mode(&self) -> bool {
        *self.privacy.borrow()
    }

    /// Toggle privacy mode
    pub fn set_privacy_mode(&mut self, enabled: bool) {
        let changed = self.privacy.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });

        if changed {
            tracing::info!(enabled, "privacy mode changed");
            self.emit(AppEvent::PrivacyModeChanged { enabled });
        }
    }

    fn generate_id(&mut self) -> String {
        let id = format!("widget-{}", self.next_id);
        self.next_id += 1;
        id
    }
}

/// Shared, cloneable handle to the dashboard
#[derive(Clone, Default)]
pub struct DashboardHandle {
    inner: Arc<Mutex<Dashboard>>,
}

impl DashboardHandle {
    /// Wrap a dashboard
    #[must_use]
    pub fn new(dashboard: Dashboard) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dashboard)),
        }
    }

    /// Set the display mode
    pub async fn set_mode(&self, mode: DisplayMode) {
        self.inner.lock().await.set_mode(mode);
    }

    /// Current display mode
    pub async fn mode(&self) -> DisplayMode {
        self.inner.lock().await.mode()
    }

    /// Append or replace a widget
    pub async fn upsert_widget(&self, spec: WidgetSpec) -> Widget {
        self.inner.lock().await.upsert_widget(spec)
    }

    /// Copy of the current widgets
    pub async fn widgets(&self) -> Vec<Widget> {
        self.inner.lock().await.widgets().to_vec()
    }

    /// Toggle privacy mode
    pub async fn set_privacy_mode(&self, enabled: bool) {
        self.inner.lock().await.set_privacy_mode(enabled);
    }

    /// Check if privacy mode is on
    pub async fn privacy_mode(&self) -> bool {
        self.inner.lock().await.privacy_mode()
    }

    /// Watch the privacy flag
    pub async fn watch_privacy(&self) -> watch::Receiver<bool> {
        self.inner.lock().await.watch_privacy()
    }

    /// Broadcast an event
    pub async fn emit(&self, event: AppEvent) {
        self.inner.lock().await.emit(event);
    }

    /// Subscribe to application events
    pub async fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.inner.lock().await.subscribe()
    }
}
