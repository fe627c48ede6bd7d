//! Session supervisor

use std::future::Future;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use super::actor::{SessionActor, SessionParts};
use super::wire::ClientMessage;
use super::{
    COMMAND_CAPACITY, ConnectionState, Connector, EVENT_CAPACITY, LiveSession, SessionEvent,
    SessionSnapshot, Transport, WsConnector,
};
use crate::audio::{
    AudioSource, CapturePipeline, CaptureStream, CpalOutput, CpalSource, DeviceGuard,
    OutputDevice, PlaybackScheduler,
};
use crate::config::{CapturePolicy, Config, PersonaConfig};
use crate::dashboard::DashboardHandle;
use crate::monitors::{EnvironmentScanner, HttpScanner};
use crate::tools::{ToolDispatcher, dashboard_tools};
use crate::{Error, Result};

/// Owns the current live session and the devices it may use
///
/// At most one session is Connecting or Open at a time; the connect lock
/// serializes `connect`, `reconnect` and `disconnect`. A connect in flight
/// holds that lock, so `disconnect` first cancels the attempt through its
/// token and only then waits.
pub struct Bridge {
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    source: Arc<dyn AudioSource>,
    output: Arc<dyn OutputDevice>,
    dispatcher: ToolDispatcher,
    dashboard: DashboardHandle,
    scanner: Option<Arc<dyn EnvironmentScanner>>,
    current: Mutex<Option<LiveSession>>,
    /// Cancels the connect attempt in flight
    attempt: SyncMutex<Option<CancellationToken>>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Devices acquired for a session that is about to open
struct Devices {
    scheduler: PlaybackScheduler,
    output: DeviceGuard,
    capture: Option<CaptureStream>,
}

impl Bridge {
    /// Create a bridge over the system microphone, speaker and WebSocket
    ///
    /// The dashboard tools are registered and an HTTP ambient scanner is
    /// configured when a scan URL is set.
    ///
    /// # Errors
    ///
    /// Returns error if the scan URL is invalid
    pub fn new(config: Config, dashboard: DashboardHandle) -> Result<Self> {
        let scanner: Option<Arc<dyn EnvironmentScanner>> = match &config.monitors.scan_url {
            Some(raw) => {
                let url = Url::parse(raw)
                    .map_err(|e| Error::Config(format!("invalid scan URL {raw}: {e}")))?;
                Some(Arc::new(HttpScanner::new(url)?))
            }
            None => None,
        };

        let dispatcher = dashboard_tools(&dashboard, config.session.tool_timeout);
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            connector: Arc::new(WsConnector),
            source: Arc::new(CpalSource),
            output: Arc::new(CpalOutput),
            dispatcher,
            dashboard,
            scanner,
            current: Mutex::new(None),
            attempt: SyncMutex::new(None),
            snapshot: Arc::new(snapshot),
            events,
        })
    }

    /// Use a different transport
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Use a different microphone
    #[must_use]
    pub fn with_audio_source(mut self, source: Arc<dyn AudioSource>) -> Self {
        self.source = source;
        self
    }

    /// Use a different speaker
    #[must_use]
    pub fn with_output(mut self, output: Arc<dyn OutputDevice>) -> Self {
        self.output = output;
        self
    }

    /// Replace the tool registry
    #[must_use]
    pub fn with_tools(mut self, dispatcher: ToolDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replace the ambient scanner
    #[must_use]
    pub fn with_scanner(mut self, scanner: Arc<dyn EnvironmentScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared dashboard state
    #[must_use]
    pub const fn dashboard(&self) -> &DashboardHandle {
        &self.dashboard
    }

    /// Tool registry advertised to new sessions
    #[must_use]
    pub const fn tools(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watch the session snapshot
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Copy of the current snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Handle to the current session, if any
    pub async fn session(&self) -> Option<LiveSession> {
        self.current.lock().await.clone()
    }

    /// Connect with the configured persona
    ///
    /// # Errors
    ///
    /// See [`Bridge::connect_with`]
    pub async fn connect(&self) -> Result<LiveSession> {
        let persona = self.config.persona.clone();
        self.connect_with(&persona).await
    }

    /// Open a new session
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionActive` if a session is already connecting or
    /// open, `Error::Timeout` if transport open, setup and device acquisition
    /// exceed the connect timeout, `Error::Cancelled` if `disconnect` was
    /// called meanwhile, `Error::DeviceUnavailable` if a required device is
    /// missing, or the transport error that ended the attempt
    pub async fn connect_with(&self, persona: &PersonaConfig) -> Result<LiveSession> {
        if self.snapshot.borrow().state == ConnectionState::Connecting {
            return Err(Error::SessionActive(
                "another connect is in progress".to_string(),
            ));
        }

        let mut current = self.current.lock().await;
        self.connect_locked(&mut current, persona).await
    }

    /// Tear down the current session, if any, then connect
    ///
    /// # Errors
    ///
    /// See [`Bridge::connect_with`]
    pub async fn reconnect(&self) -> Result<LiveSession> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.take() {
            session.disconnect().await;
        }

        let persona = self.config.persona.clone();
        self.connect_locked(&mut current, &persona).await
    }

    /// Tear down the current session and wait until its devices are released
    ///
    /// Safe to call at any time, repeatedly. A connect in progress is
    /// cancelled and ends Closed.
    pub async fn disconnect(&self) {
        if let Some(attempt) = self.swap_attempt(None) {
            tracing::info!("cancelling connect in progress");
            attempt.cancel();
        }

        let mut current = self.current.lock().await;
        if let Some(session) = current.take() {
            session.disconnect().await;
        }
    }

    async fn connect_locked(
        &self,
        current: &mut Option<LiveSession>,
        persona: &PersonaConfig,
    ) -> Result<LiveSession> {
        if let Some(existing) = current.as_ref() {
            let state = existing.state();
            if state.is_active() {
                return Err(Error::SessionActive(format!(
                    "session {} is {state}",
                    existing.id()
                )));
            }
        }

        // A finished session may still be inside teardown
        if let Some(previous) = current.take() {
            previous.join().await;
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.swap_attempt(Some(cancel.clone()));
        self.snapshot.send_replace(SessionSnapshot {
            state: ConnectionState::Connecting,
            session_id: Some(id),
            started_at: Some(Utc::now()),
            ..SessionSnapshot::default()
        });

        tracing::info!(
            session_id = %id,
            model = %self.config.session.model,
            voice = %persona.voice,
            "connecting live session"
        );

        let outcome = self.open_session(id, persona, &cancel).await;
        self.swap_attempt(None);

        match outcome {
            Ok(session) => {
                tracing::info!(session_id = %id, "live session open");
                *current = Some(session.clone());
                Ok(session)
            }
            Err(Error::Cancelled(reason)) => {
                tracing::info!(session_id = %id, %reason, "connect cancelled");
                self.snapshot.send_modify(|s| {
                    s.state = ConnectionState::Closed;
                    s.is_connected = false;
                });
                let _ = self.events.send(SessionEvent::Closed {
                    reason: reason.clone(),
                });
                Err(Error::Cancelled(reason))
            }
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "live session failed to open");
                self.snapshot.send_modify(|s| {
                    s.state = ConnectionState::Failed;
                    s.last_error = Some(e.to_string());
                });
                let _ = self.events.send(SessionEvent::Error {
                    message: e.to_string(),
                    fatal: true,
                });
                Err(e)
            }
        }
    }

    fn swap_attempt(&self, token: Option<CancellationToken>) -> Option<CancellationToken> {
        let mut slot = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, token)
    }

    /// Transport open, setup and device acquisition share one deadline
    async fn open_session(
        &self,
        id: Uuid,
        persona: &PersonaConfig,
        cancel: &CancellationToken,
    ) -> Result<LiveSession> {
        let session_config = &self.config.session;
        let url = session_config.endpoint_url()?;
        let setup = ClientMessage::setup(
            &session_config.model,
            persona,
            self.dispatcher.declarations(),
        );

        let limit = session_config.connect_timeout;
        let deadline = Instant::now() + limit;

        let mut transport =
            match bounded(deadline, limit, cancel, self.connector.connect(&url)).await {
                Ok(transport) => transport,
                Err(e) => {
                    self.closing_if_cancelled(&e);
                    return Err(e);
                }
            };

        let prepared = bounded(deadline, limit, cancel, async {
            transport.send(&setup).await?;
            await_setup(transport.as_mut()).await?;
            self.open_devices().await
        })
        .await;

        let devices = match prepared {
            Ok(devices) => devices,
            Err(e) => {
                self.closing_if_cancelled(&e);
                if let Err(close) = transport.close().await {
                    tracing::debug!(error = %close, "transport close failed");
                }
                return Err(e);
            }
        };

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let is_streaming = devices.capture.is_some();
        let privacy = self.dashboard.watch_privacy().await;

        let actor = SessionActor::new(SessionParts {
            id,
            config: Arc::clone(&self.config),
            transport,
            scheduler: devices.scheduler,
            output: devices.output,
            capture: devices.capture,
            commands: commands_rx,
            dispatcher: self.dispatcher.clone(),
            dashboard: self.dashboard.clone(),
            privacy,
            scanner: self.scanner.clone(),
            snapshot: Arc::clone(&self.snapshot),
            events: self.events.clone(),
        });

        self.snapshot.send_modify(|s| {
            s.state = ConnectionState::Open;
            s.is_connected = true;
            s.is_streaming = is_streaming;
        });

        let task = tokio::spawn(actor.run());
        Ok(LiveSession::new(
            id,
            commands_tx,
            self.snapshot.subscribe(),
            task,
        ))
    }

    fn closing_if_cancelled(&self, error: &Error) {
        if matches!(error, Error::Cancelled(_)) {
            self.snapshot
                .send_modify(|s| s.state = ConnectionState::Closing);
        }
    }

    /// Open the speaker, then the microphone per the capture policy
    ///
    /// Both opens run on the blocking pool.
    async fn open_devices(&self) -> Result<Devices> {
        let output = Arc::clone(&self.output);
        let opened = tokio::task::spawn_blocking(move || output.open())
            .await
            .map_err(|e| Error::Audio(format!("speaker open task failed: {e}")))??;
        let (scheduler, mut output_guard) =
            opened.into_scheduler(self.config.audio.playback_sample_rate);

        let capture = match self.config.session.capture {
            CapturePolicy::Disabled => None,
            policy => {
                let pipeline =
                    CapturePipeline::new(Arc::clone(&self.source), self.config.audio.clone());
                match pipeline.start().await {
                    Ok(stream) => Some(stream),
                    Err(e) if policy == CapturePolicy::Optional => {
                        tracing::warn!(error = %e, "microphone unavailable, continuing without capture");
                        None
                    }
                    Err(e) => {
                        drop(scheduler);
                        output_guard.release_async().await;
                        return Err(e);
                    }
                }
            }
        };

        Ok(Devices {
            scheduler,
            output: output_guard,
            capture,
        })
    }
}

/// Run one connect stage against the shared deadline and the cancel token
async fn bounded<T>(
    deadline: Instant,
    limit: Duration,
    cancel: &CancellationToken,
    stage: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled("disconnected while connecting".to_string())),
        outcome = tokio::time::timeout_at(deadline, stage) => outcome.map_err(|_| {
            Error::Timeout(format!(
                "session setup did not complete within {}s",
                limit.as_secs()
            ))
        })?,
    }
}

/// Wait for `setupComplete`, skipping anything that arrives before it
async fn await_setup(transport: &mut dyn Transport) -> Result<()> {
    loop {
        match transport.recv().await {
            Some(Ok(message)) => {
                if let Some(error) = &message.error {
                    return Err(Error::Transport(format!(
                        "setup rejected: {}",
                        error.message
                    )));
                }
                if message.setup_complete.is_some() {
                    tracing::debug!("setup complete");
                    return Ok(());
                }
                tracing::debug!("ignoring message received before setup completed");
            }
            Some(Err(e)) if !e.is_fatal() => {
                tracing::warn!(error = %e, "bad message during setup");
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(Error::Transport(
                    "connection closed during setup".to_string(),
                ));
            }
        }
    }
}
