//! Realtime session controller
//!
//! Owns one coaching session at a time: fetches a credential, dials the
//! socket, wires the microphone into outbound frames and dispatches inbound
//! events to transcripts and playback. All inputs are handled on a single
//! task, so the controller itself needs no locking.

use std::future::pending;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::capture::{
    CAPTURE_QUEUE, CaptureBlock, CaptureConstraints, CaptureDevice, CaptureGraph, release_all,
};
use super::codec::{decode_base64, encode_capture_block};
use super::events::{ClientEvent, ServerEvent};
use super::playback::PlaybackScheduler;
use super::token::TokenBroker;
use super::transport::{Connector, SocketEvent, SocketLink};
use crate::config::ClientConfig;
use crate::validation::SessionParams;
use crate::{Error, Result};

/// Consecutive remote error events that end a session
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Shown while the coach's transcript is still blank
pub const RESPONDING_PLACEHOLDER: &str = "Coach responding…";

/// Shown once the socket is open
pub const LIVE_NOTICE: &str =
    "Realtime (beta) is on. Speak naturally — you'll get short spoken feedback.";

/// Lifecycle of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    AwaitingSocket,
    LiveCapturing,
    Stopping,
    /// Transient; the controller returns to `Idle` right after reporting
    Failed,
}

impl SessionState {
    /// Whether a session is in progress
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::AwaitingSocket | Self::LiveCapturing | Self::Stopping
        )
    }
}

/// Change the UI should reflect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    State {
        from: SessionState,
        to: SessionState,
    },
    Status(String),
    UserTranscript(String),
    AssistantTranscript(String),
    /// Informational text for the results area
    Notice(String),
    Failure {
        message: String,
        hint: &'static str,
    },
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: SessionState,
    pub running: bool,
    pub status: String,
    pub user_transcript: String,
    pub assistant_transcript: String,
}

/// Resources of the live session
struct Session {
    id: Uuid,
    link: SocketLink,
    socket_open: bool,
    /// The socket side went away before the socket opened
    link_ended: bool,
    capture: Option<Box<dyn CaptureGraph>>,
    blocks: Option<mpsc::Receiver<CaptureBlock>>,
    error_deadline: Option<Instant>,
    consecutive_errors: u32,
}

impl Session {
    fn new(link: SocketLink) -> Self {
        Self {
            id: Uuid::new_v4(),
            link,
            socket_open: false,
            link_ended: false,
            capture: None,
            blocks: None,
            error_deadline: None,
            consecutive_errors: 0,
        }
    }
}

/// Drives realtime coaching sessions
pub struct SessionController {
    broker: Box<dyn TokenBroker>,
    connector: Box<dyn Connector>,
    microphone: Box<dyn CaptureDevice>,
    playback: PlaybackScheduler,
    transport_debounce: Duration,

    state: SessionState,
    session: Option<Session>,
    status: String,
    user_transcript: String,
    assistant_transcript: String,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl SessionController {
    /// Create an idle controller and the stream of its updates
    #[must_use]
    pub fn new(
        broker: Box<dyn TokenBroker>,
        connector: Box<dyn Connector>,
        microphone: Box<dyn CaptureDevice>,
        playback: PlaybackScheduler,
        config: &ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let controller = Self {
            broker,
            connector,
            microphone,
            playback,
            transport_debounce: config.transport_debounce,
            state: SessionState::Idle,
            session: None,
            status: String::new(),
            user_transcript: String::new(),
            assistant_transcript: String::new(),
            updates,
        };
        (controller, updates_rx)
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Current status, transcripts and state
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            running: self.state.is_running(),
            status: self.status.clone(),
            user_transcript: self.user_transcript.clone(),
            assistant_transcript: self.assistant_display(),
        }
    }

    /// Start a session; does nothing unless idle
    ///
    /// Returns once the socket is being dialled. The socket opening and
    /// everything after it arrive through [`Self::handle_socket_event`].
    ///
    /// # Errors
    ///
    /// Returns the setup failure after reporting it and returning to idle
    pub async fn start(&mut self, params: &SessionParams) -> Result<()> {
        if self.state != SessionState::Idle {
            tracing::debug!(state = ?self.state, "start ignored, session already running");
            return Ok(());
        }

        self.transition(SessionState::Starting);
        self.assistant_transcript.clear();
        self.set_user_transcript(String::new());
        self.set_status("Starting…");

        match Self::open_session(self.broker.as_ref(), self.connector.as_ref(), params).await {
            Ok(session) => {
                tracing::info!(
                    session_id = %session.id,
                    mode = %params.mode,
                    duration = params.duration,
                    "realtime session dialling"
                );
                self.session = Some(session);
                self.transition(SessionState::AwaitingSocket);
                Ok(())
            }
            Err(e) => {
                self.fail(format!("Failed: {e}"), "Could not start Realtime", &e);
                Err(e)
            }
        }
    }

    async fn open_session(
        broker: &dyn TokenBroker,
        connector: &dyn Connector,
        params: &SessionParams,
    ) -> Result<Session> {
        let token = broker.fetch_token(params).await?;
        token.ensure_usable()?;
        let link = connector.connect(&token.ws_url, &token)?;
        Ok(Session::new(link))
    }

    /// Stop the session; does nothing when idle
    pub fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.transition(SessionState::Stopping);
        self.set_status("Stopping…");
        self.teardown();
        self.transition(SessionState::Idle);
        self.set_status("Stopped");
    }

    /// React to something that happened on the socket
    pub fn handle_socket_event(&mut self, event: SocketEvent) {
        if self.session.is_none() {
            tracing::trace!(?event, "socket event without a session");
            return;
        }
        match event {
            SocketEvent::Open => self.on_socket_open(),
            SocketEvent::Message(text) => {
                if let Some(event) = ServerEvent::parse(&text) {
                    self.dispatch(event);
                }
            }
            SocketEvent::Error(message) => self.on_socket_error(&message),
            SocketEvent::Closed { code, reason } => {
                tracing::info!(?code, %reason, "realtime socket closed");
                self.set_status("Closed");
                self.teardown();
                self.transition(SessionState::Idle);
            }
        }
    }

    fn on_socket_open(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.socket_open {
            return;
        }
        session.socket_open = true;
        session.error_deadline = None;
        let session_id = session.id;
        self.set_status("WebSocket open. Enabling mic…");
        self.emit(SessionUpdate::Notice(LIVE_NOTICE.to_string()));

        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE);
        match self.microphone.open(CaptureConstraints::VOICE, tx) {
            Ok(graph) => {
                if let Some(session) = self.session.as_mut() {
                    session.capture = Some(graph);
                    session.blocks = Some(rx);
                }
                tracing::info!(%session_id, "microphone live");
                self.transition(SessionState::LiveCapturing);
                self.set_status("Live. Listening…");
            }
            Err(e) => self.fail(format!("Failed: {e}"), "Could not start Realtime", &e),
        }
    }

    fn on_socket_error(&mut self, message: &str) {
        let debounce = self.transport_debounce;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        tracing::warn!(session_id = %session.id, error = %message, "realtime socket error");
        if !session.socket_open && session.error_deadline.is_none() {
            session.error_deadline = Some(Instant::now() + debounce);
        }
    }

    /// The socket side of the link is gone
    ///
    /// An opened socket counts as closed. One that never opened leaves the
    /// session waiting for the transport deadline, which is armed now if no
    /// error armed it already.
    pub fn on_link_ended(&mut self) {
        let debounce = self.transport_debounce;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.socket_open {
            self.handle_socket_event(SocketEvent::Closed {
                code: None,
                reason: String::new(),
            });
            return;
        }
        tracing::debug!(session_id = %session.id, "socket link ended before open");
        session.link_ended = true;
        if session.error_deadline.is_none() {
            session.error_deadline = Some(Instant::now() + debounce);
        }
    }

    /// Report a transport failure if the socket never opened within the window
    pub fn on_debounce_elapsed(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.error_deadline.take().is_none() || session.socket_open {
            return;
        }
        let err = Error::Transport("WebSocket error".to_string());
        self.fail("WebSocket error".to_string(), "Could not start Realtime", &err);
    }

    /// Deadline of a pending transport error, if one is armed
    #[must_use]
    pub fn error_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|s| s.error_deadline)
    }

    /// Apply one inbound event
    pub fn dispatch(&mut self, event: ServerEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        tracing::trace!(session_id = %session.id, kind = event.kind(), "server event");

        if let ServerEvent::Error { error } = &event {
            session.consecutive_errors += 1;
            let repeated = session.consecutive_errors >= MAX_CONSECUTIVE_ERRORS;
            let message = error
                .as_ref()
                .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
                .unwrap_or_else(|| "Unknown".to_string());
            self.set_status(&format!("Error: {message}"));
            if repeated {
                let err = Error::Upstream(message);
                self.fail(
                    format!("Error: {err}"),
                    "Realtime session ended after repeated errors",
                    &err,
                );
            }
            return;
        }
        session.consecutive_errors = 0;

        match event {
            ServerEvent::SessionCreated => self.set_status("Connected. Speak when ready."),
            ServerEvent::UserTranscriptDelta { delta } => {
                let combined = format!("{}{}", self.user_transcript, delta.unwrap_or_default());
                self.set_user_transcript(combined.trim_start().to_string());
            }
            ServerEvent::UserTranscriptCompleted { transcript } => {
                self.set_user_transcript(transcript.unwrap_or_default());
            }
            ServerEvent::AssistantTranscriptDelta { delta } => {
                self.assistant_transcript
                    .push_str(delta.as_deref().unwrap_or_default());
                let display = self.assistant_display();
                self.emit(SessionUpdate::AssistantTranscript(display));
            }
            ServerEvent::AssistantAudioDelta { .. } => self.play(&event),
            ServerEvent::TurnComplete => self.assistant_transcript.clear(),
            ServerEvent::AssistantTranscriptDone | ServerEvent::Error { .. } | ServerEvent::Other => {}
        }
    }

    fn play(&mut self, event: &ServerEvent) {
        let Some(payload) = event.audio_payload() else {
            return;
        };
        let scheduled = decode_base64(payload).and_then(|bytes| self.playback.schedule(&bytes));
        if let Err(e) = scheduled {
            tracing::warn!(error = %e, "dropping assistant audio chunk");
        }
    }

    /// Forward one microphone block if the socket is open
    pub fn on_capture_block(&mut self, block: &CaptureBlock) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.socket_open {
            return;
        }
        let Some(audio) = encode_capture_block(&block.samples, block.sample_rate) else {
            return;
        };
        match (ClientEvent::InputAudioBufferAppend { audio }).to_json() {
            Ok(frame) => {
                session.link.send(frame);
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode audio frame"),
        }
    }

    fn fail(&mut self, status: String, context: &str, err: &Error) {
        tracing::error!(error = %err, "realtime session failed");
        self.set_status(&status);
        self.emit(SessionUpdate::Failure {
            message: format!("{context}: {err}"),
            hint: err.hint(),
        });
        self.teardown();
        self.transition(SessionState::Failed);
        self.transition(SessionState::Idle);
    }

    fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.link.close();
        drop(session.blocks.take());
        if let Some(mut graph) = session.capture.take() {
            release_all(graph.as_mut());
        }
        tracing::debug!(session_id = %session.id, "session torn down");
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::debug!(?from, ?to, "session state");
        self.emit(SessionUpdate::State { from, to });
    }

    fn set_status(&mut self, status: &str) {
        status.clone_into(&mut self.status);
        self.emit(SessionUpdate::Status(status.to_string()));
    }

    fn set_user_transcript(&mut self, text: String) {
        self.user_transcript = text;
        self.emit(SessionUpdate::UserTranscript(self.user_transcript.clone()));
    }

    fn assistant_display(&self) -> String {
        let trimmed = self.assistant_transcript.trim();
        if trimmed.is_empty() && self.state.is_running() {
            RESPONDING_PLACEHOLDER.to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn emit(&self, update: SessionUpdate) {
        // nobody listening is fine
        let _ = self.updates.send(update);
    }

    /// Wait for whatever the session needs handled next
    async fn next_input(&mut self) -> Input {
        let Some(session) = self.session.as_mut() else {
            return pending().await;
        };
        let deadline = session.error_deadline;
        let link_live = !session.link_ended;
        tokio::select! {
            event = session.link.recv(), if link_live => match event {
                Some(event) => Input::Socket(event),
                None => Input::LinkEnded,
            },
            block = recv_or_pending(session.blocks.as_mut()) => match block {
                Some(block) => Input::Capture(block),
                None => Input::CaptureEnded,
            },
            () = sleep_or_pending(deadline) => Input::DebounceElapsed,
        }
    }

    /// Run the controller on its own task
    #[must_use]
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(self.run(rx));
        (SessionHandle { commands: tx }, task)
    }

    /// Handle commands and session inputs until every handle is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.stop();
                        break;
                    };
                    match command {
                        Command::Start(params) => {
                            // failures are already reported as updates
                            let _ = self.start(&params).await;
                        }
                        Command::Stop => self.stop(),
                        Command::Snapshot(reply) => {
                            let _ = reply.send(self.snapshot());
                        }
                    }
                }
                input = self.next_input() => match input {
                    Input::Socket(event) => self.handle_socket_event(event),
                    Input::LinkEnded => self.on_link_ended(),
                    Input::Capture(block) => self.on_capture_block(&block),
                    Input::CaptureEnded => {
                        tracing::warn!("microphone stream ended");
                        if let Some(session) = self.session.as_mut() {
                            session.blocks = None;
                        }
                    }
                    Input::DebounceElapsed => self.on_debounce_elapsed(),
                },
            }
        }
    }
}

enum Input {
    Socket(SocketEvent),
    LinkEnded,
    Capture(CaptureBlock),
    CaptureEnded,
    DebounceElapsed,
}

async fn recv_or_pending<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Request to a running controller
#[derive(Debug)]
pub enum Command {
    Start(SessionParams),
    Stop,
    Snapshot(oneshot::Sender<Snapshot>),
}

/// Cloneable handle to a spawned controller
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Ask the controller to start a session
    ///
    /// # Errors
    ///
    /// Returns error if the controller has shut down
    pub async fn start(&self, params: SessionParams) -> Result<()> {
        self.send(Command::Start(params)).await
    }

    /// Ask the controller to stop the session
    ///
    /// # Errors
    ///
    /// Returns error if the controller has shut down
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// Fetch the controller's current snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the controller has shut down
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await
            .map_err(|_| Error::Transport("session controller stopped".to_string()))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Transport("session controller stopped".to_string()))
    }
}
