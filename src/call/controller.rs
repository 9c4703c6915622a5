//! Live session controller.
//!
//! One tokio task owns the panel's call slot. It reacts to four sources:
//! operator commands, the Live link, microphone frames, and the transfer
//! timer. Everything else (connection setup, the WebSocket loops, the
//! microphone) runs in its own task and talks to the controller through
//! channels, so the controller itself needs no locks.
//!
//! ```text
//! CallPanel ──commands──▸ Controller ──OutboundMessage──▸ LiveConnector
//!     ◂── CallEvent ─────────┘ ▴   ◂──────── LinkEvent ─────────┘
//!                              └── microphone frames
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::playback::PlaybackScheduler;
use super::{CallEvent, CallState, EndReason};
use crate::audio::codec::{
    decode_frame, encode_frame, float_buffer_from_pcm, pcm_from_float, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE,
};
use crate::audio::{AudioDevices, Capture, CaptureStream};
use crate::live::{
    build_setup_message, LinkEvent, LiveConnector, OutboundMessage, ServerMessage, SessionSetup,
    DEFAULT_MODEL, DEFAULT_VOICE,
};
use crate::tools::{ToolEffect, ToolRegistry};
use crate::transcript::{Speaker, TranscriptAssembler};

/// First transcript line of every connected call.
pub const CONNECTED_NOTE: &str = "Call connected. Waiting for agent...";

/// Shown to the operator when the link drops mid-call.
pub const CONNECTION_ERROR: &str = "A connection error occurred.";

/// Builds a fresh tool registry for each call.
pub type RegistryFactory = Arc<dyn Fn() -> ToolRegistry + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Samples per microphone frame sent upstream.
    pub capture_frame_samples: usize,
    /// Length of the silent frame that opens the audio stream.
    pub priming_frame_samples: usize,
    /// Time between a transfer and the end of the call.
    pub forward_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: String::new(),
            capture_frame_samples: 4096,
            priming_frame_samples: 1024,
            forward_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CallError {
    #[error("cannot {action} while the call is {state}")]
    InvalidState {
        action: &'static str,
        state: CallState,
    },
    #[error("call panel has shut down")]
    PanelClosed,
}

/// Snapshot of the panel for UIs that poll instead of consuming events.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelStatus {
    pub state: CallState,
    pub call_id: Option<String>,
    /// Last surfaced error, cleared when the next call starts.
    pub error: Option<String>,
}

impl Default for PanelStatus {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            call_id: None,
            error: None,
        }
    }
}

enum Command {
    Start(oneshot::Sender<Result<String, CallError>>),
    End(oneshot::Sender<Result<(), CallError>>),
    Forward(oneshot::Sender<Result<(), CallError>>),
    Shutdown,
}

/// Handle to the call controller task.
pub struct CallPanel {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<PanelStatus>,
    task: JoinHandle<()>,
}

impl CallPanel {
    /// Start the controller task. Events for every call arrive on the
    /// returned receiver, which must be drained.
    pub fn spawn(
        config: ControllerConfig,
        connector: Arc<dyn LiveConnector>,
        devices: Arc<dyn AudioDevices>,
        registry: RegistryFactory,
    ) -> (Self, mpsc::Receiver<CallEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (connect_tx, connect_rx) = mpsc::channel(4);
        let (capture_tx, capture_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = watch::channel(PanelStatus::default());

        let controller = Controller {
            config,
            connector,
            devices,
            registry,
            events: event_tx,
            status: status_tx,
            connect_tx,
            capture_tx,
            transcript: TranscriptAssembler::new(),
            session: None,
        };
        let task = tokio::spawn(controller.run(cmd_rx, connect_rx, capture_rx));

        (
            Self {
                commands: cmd_tx,
                status: status_rx,
                task,
            },
            event_rx,
        )
    }

    /// Begin a call and return its id. Setup continues in the background;
    /// failures are reported as events.
    pub async fn start_call(&self) -> Result<String, CallError> {
        self.request(Command::Start).await
    }

    /// Hang up. Ending an idle panel is a no-op.
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(Command::End).await
    }

    /// Hand the live call to a human manager and end it after the forward delay.
    pub async fn forward_call(&self) -> Result<(), CallError> {
        self.request(Command::Forward).await
    }

    pub fn status(&self) -> PanelStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PanelStatus> {
        self.status.clone()
    }

    /// End any active call and stop the controller task.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Call controller task failed");
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, CallError>>) -> Command,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| CallError::PanelClosed)?;
        rx.await.map_err(|_| CallError::PanelClosed)?
    }
}

type ConnectOutcome = (String, anyhow::Result<mpsc::Receiver<LinkEvent>>);
type CaptureOutcome = (String, anyhow::Result<Capture>);

/// One active call.
struct Session {
    id: String,
    state: CallState,
    /// Created at call start so messages queue before the link is up.
    outbound: mpsc::Sender<OutboundMessage>,
    link: Option<mpsc::Receiver<LinkEvent>>,
    connect_task: Option<JoinHandle<()>>,
    capture_task: Option<JoinHandle<()>>,
    capture: Option<Box<dyn CaptureStream>>,
    frames: Option<mpsc::Receiver<Vec<f32>>>,
    playback: PlaybackScheduler,
    registry: ToolRegistry,
    forward_deadline: Option<Instant>,
    frames_sent: u64,
}

impl Session {
    /// Tear down audio and transport in order. Safe to repeat.
    fn release(&mut self) {
        self.playback.interrupt();
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
        if let Some(capture) = self.capture.take() {
            close_capture(&self.id, capture);
        }
        self.frames = None;
        self.playback.close();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.link = None;
        self.forward_deadline = None;
    }
}

fn close_capture(session_id: &str, mut capture: Box<dyn CaptureStream>) {
    capture.disconnect();
    capture.stop();
    if let Err(e) = capture.close() {
        tracing::debug!(%session_id, error = %e, "Capture close failed");
    }
}

enum Step {
    Command(Command),
    Shutdown,
    Connected(ConnectOutcome),
    CaptureOpened(CaptureOutcome),
    Link(Option<LinkEvent>),
    Frame(Option<Vec<f32>>),
    ForwardElapsed,
}

struct Controller {
    config: ControllerConfig,
    connector: Arc<dyn LiveConnector>,
    devices: Arc<dyn AudioDevices>,
    registry: RegistryFactory,
    events: mpsc::Sender<CallEvent>,
    status: watch::Sender<PanelStatus>,
    connect_tx: mpsc::Sender<ConnectOutcome>,
    capture_tx: mpsc::Sender<CaptureOutcome>,
    transcript: TranscriptAssembler,
    session: Option<Session>,
}

async fn recv_opt<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Controller {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut connected: mpsc::Receiver<ConnectOutcome>,
        mut captured: mpsc::Receiver<CaptureOutcome>,
    ) {
        loop {
            let (link, frames, deadline) = match self.session.as_mut() {
                Some(s) => (s.link.as_mut(), s.frames.as_mut(), s.forward_deadline),
                None => (None, None, None),
            };

            let step = tokio::select! {
                cmd = commands.recv() => cmd.map_or(Step::Shutdown, Step::Command),
                Some(outcome) = connected.recv() => Step::Connected(outcome),
                Some(outcome) = captured.recv() => Step::CaptureOpened(outcome),
                event = recv_opt(link) => Step::Link(event),
                frame = recv_opt(frames) => Step::Frame(frame),
                () = sleep_opt(deadline) => Step::ForwardElapsed,
            };

            match step {
                Step::Command(Command::Start(reply)) => {
                    let _ = reply.send(self.start_call().await);
                }
                Step::Command(Command::End(reply)) => {
                    self.end_call(EndReason::Hangup, None).await;
                    let _ = reply.send(Ok(()));
                }
                Step::Command(Command::Forward(reply)) => {
                    let _ = reply.send(self.forward_call().await);
                }
                Step::Command(Command::Shutdown) | Step::Shutdown => {
                    self.end_call(EndReason::Hangup, None).await;
                    break;
                }
                Step::Connected((id, result)) => self.on_connected(id, result).await,
                Step::CaptureOpened((id, result)) => self.on_capture_opened(id, result).await,
                Step::Link(Some(LinkEvent::Message(msg))) => self.on_server_message(msg).await,
                Step::Link(Some(LinkEvent::Closed) | None) => {
                    tracing::info!("Live link closed by server");
                    self.end_call(EndReason::RemoteClosed, None).await;
                }
                Step::Link(Some(LinkEvent::Error(e))) => {
                    tracing::error!(error = %e, "Live link failed");
                    self.emit(CallEvent::Error {
                        message: CONNECTION_ERROR.to_string(),
                    })
                    .await;
                    self.end_call(EndReason::TransportError, Some(CONNECTION_ERROR.to_string()))
                        .await;
                }
                Step::Frame(Some(frame)) => self.on_capture_frame(frame).await,
                Step::Frame(None) => {
                    tracing::debug!("Microphone stream ended");
                    if let Some(session) = self.session.as_mut() {
                        session.frames = None;
                    }
                }
                Step::ForwardElapsed => {
                    tracing::info!("Forward delay elapsed, ending call");
                    self.end_call(EndReason::Forwarded, None).await;
                }
            }
        }
        tracing::debug!("Call controller stopped");
    }

    async fn emit(&self, event: CallEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Call event receiver dropped");
        }
    }

    async fn set_state(&mut self, state: CallState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
        let call_id = self.session.as_ref().map(|s| s.id.clone());
        self.status.send_modify(|status| {
            status.state = state;
            status.call_id = call_id;
        });
        self.emit(CallEvent::StateChanged { state }).await;
    }

    async fn start_call(&mut self) -> Result<String, CallError> {
        if let Some(session) = &self.session {
            return Err(CallError::InvalidState {
                action: "start a call",
                state: session.state,
            });
        }

        let call_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %call_id, "Starting call");
        self.status.send_modify(|s| s.error = None);
        self.transcript.reset();

        let output = match self.devices.open_playback(OUTPUT_SAMPLE_RATE) {
            Ok(output) => output,
            Err(e) => {
                // No session exists yet; report a complete start/end pair anyway.
                self.status.send_modify(|s| {
                    s.state = CallState::Connecting;
                    s.call_id = Some(call_id.clone());
                });
                self.emit(CallEvent::StateChanged {
                    state: CallState::Connecting,
                })
                .await;
                self.emit(CallEvent::CallStarted {
                    call_id: call_id.clone(),
                    started_at: Utc::now(),
                })
                .await;
                self.fail_setup(&call_id, &e).await;
                return Ok(call_id);
            }
        };

        let registry = (self.registry)();
        let setup = build_setup_message(&SessionSetup {
            model: self.config.model.clone(),
            voice: self.config.voice.clone(),
            system_instruction: self.config.system_instruction.clone(),
            declarations: registry.declarations(),
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let connector = Arc::clone(&self.connector);
        let done = self.connect_tx.clone();
        let sid = call_id.clone();
        let connect_task = tokio::spawn(async move {
            let result = connector.connect(&sid, setup, outbound_rx).await;
            let _ = done.send((sid, result)).await;
        });

        self.session = Some(Session {
            id: call_id.clone(),
            state: CallState::Connecting,
            outbound: outbound_tx,
            link: None,
            connect_task: Some(connect_task),
            capture_task: None,
            capture: None,
            frames: None,
            playback: PlaybackScheduler::new(output),
            registry,
            forward_deadline: None,
            frames_sent: 0,
        });

        self.set_state(CallState::Connecting).await;
        self.emit(CallEvent::CallStarted {
            call_id: call_id.clone(),
            started_at: Utc::now(),
        })
        .await;

        Ok(call_id)
    }

    /// Setup failed before or during connection.
    async fn fail_setup(&mut self, call_id: &str, error: &anyhow::Error) {
        let message = format!("Failed to start call: {error}");
        tracing::error!(session_id = %call_id, error = %error, "Call setup failed");
        self.emit(CallEvent::Error {
            message: message.clone(),
        })
        .await;

        if self.session.is_some() {
            self.end_call(EndReason::SetupFailed, Some(message)).await;
        } else {
            self.finish(call_id.to_string(), EndReason::SetupFailed, Some(message))
                .await;
        }
    }

    async fn on_connected(&mut self, id: String, result: anyhow::Result<mpsc::Receiver<LinkEvent>>) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            tracing::debug!(session_id = %id, "Connection result for a finished call, dropping");
            return;
        };
        session.connect_task = None;

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                self.fail_setup(&id, &e).await;
                return;
            }
        };
        session.link = Some(link);

        // The agent only greets once the client starts streaming audio.
        let priming = encode_frame(&vec![0i16; self.config.priming_frame_samples]);
        if session.outbound.send(OutboundMessage::Audio(priming)).await.is_err() {
            tracing::warn!(session_id = %id, "Outbound queue closed before priming frame");
        }

        self.set_state(CallState::Live).await;
        let index = self.transcript.append_system(CONNECTED_NOTE);
        self.publish_entry(index).await;

        // Opened off the controller task; see `on_capture_opened`.
        let devices = Arc::clone(&self.devices);
        let done = self.capture_tx.clone();
        let frame_samples = self.config.capture_frame_samples;
        let sid = id.clone();
        let capture_task = tokio::spawn(async move {
            let result = devices.open_capture(INPUT_SAMPLE_RATE, frame_samples).await;
            let _ = done.send((sid, result)).await;
        });
        if let Some(session) = self.session.as_mut().filter(|s| s.id == id) {
            session.capture_task = Some(capture_task);
        }
    }

    async fn on_capture_opened(&mut self, id: String, result: anyhow::Result<Capture>) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            // The call ended while the microphone was opening.
            if let Ok(capture) = result {
                tracing::debug!(session_id = %id, "Microphone opened after call ended, closing");
                close_capture(&id, capture.stream);
            }
            return;
        };
        session.capture_task = None;

        match result {
            Ok(capture) => {
                session.frames = Some(capture.frames);
                session.capture = Some(capture.stream);
                tracing::info!(session_id = %id, "Microphone streaming");
            }
            Err(e) => self.fail_setup(&id, &e).await,
        }
    }

    async fn on_capture_frame(&mut self, frame: Vec<f32>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let data = encode_frame(&pcm_from_float(&frame));
        if session.outbound.send(OutboundMessage::Audio(data)).await.is_err() {
            tracing::debug!(session_id = %session.id, "Outbound queue closed, dropping frame");
            return;
        }
        session.frames_sent += 1;
        if session.frames_sent == 1 || session.frames_sent.is_multiple_of(50) {
            tracing::debug!(session_id = %session.id, frames = session.frames_sent, "Microphone frames queued");
        }
    }

    async fn publish_entry(&self, index: usize) {
        if let Some(entry) = self.transcript.entry(index) {
            self.emit(CallEvent::TranscriptUpdated {
                index,
                entry: entry.clone(),
            })
            .await;
        }
    }

    async fn on_server_message(&mut self, msg: ServerMessage) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let session_id = session.id.clone();

        if msg.interrupted {
            tracing::info!(session_id = %session_id, active = session.playback.active_sources(), "Agent interrupted");
            session.playback.interrupt();
        }

        if let Some(text) = msg.input_transcription.as_deref() {
            if let Some(index) = self.transcript.append_fragment(Speaker::Caller, text) {
                self.publish_entry(index).await;
            }
        }
        if let Some(text) = msg.output_transcription.as_deref() {
            if let Some(index) = self.transcript.append_fragment(Speaker::Agent, text) {
                self.publish_entry(index).await;
            }
        }
        if msg.turn_complete {
            self.transcript.close_turn();
        }

        if let Some(session) = self.session.as_mut() {
            for payload in &msg.audio {
                let scheduled = decode_frame(payload)
                    .and_then(|bytes| float_buffer_from_pcm(&bytes, OUTPUT_SAMPLE_RATE, 1))
                    .map_err(anyhow::Error::from)
                    .and_then(|buffer| session.playback.schedule(buffer));
                if let Err(e) = scheduled {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping undecodable agent audio");
                }
            }
        }

        for call in &msg.tool_calls {
            let Some(session) = self.session.as_mut() else {
                break;
            };
            tracing::info!(session_id = %session_id, tool = %call.name, call_id = %call.id, "Agent tool call");
            let dispatch = session.registry.dispatch(call);
            for effect in dispatch.effects {
                self.apply_effect(effect).await;
            }
            if let Some(session) = self.session.as_ref() {
                let response = OutboundMessage::ToolResponse(dispatch.response);
                if session.outbound.send(response).await.is_err() {
                    tracing::warn!(session_id = %session_id, "Outbound queue closed, tool response dropped");
                }
            }
        }

        if let Some(error) = msg.error {
            tracing::warn!(session_id = %session_id, error = %error, "Gemini Live reported an error");
            self.emit(CallEvent::Error { message: error }).await;
        }
    }

    async fn apply_effect(&mut self, effect: ToolEffect) {
        match effect {
            ToolEffect::Emit(event) => self.emit(event).await,
            ToolEffect::SystemNote(text) => {
                let index = self.transcript.append_system(&text);
                self.publish_entry(index).await;
            }
            ToolEffect::ForwardCall => {
                if let Err(e) = self.forward_call().await {
                    tracing::warn!(error = %e, "Transfer requested outside a live call");
                }
            }
        }
    }

    async fn forward_call(&mut self) -> Result<(), CallError> {
        let delay = self.config.forward_delay;
        let Some(session) = self.session.as_mut() else {
            return Err(CallError::InvalidState {
                action: "forward a call",
                state: CallState::Idle,
            });
        };
        if session.state != CallState::Live {
            return Err(CallError::InvalidState {
                action: "forward a call",
                state: session.state,
            });
        }
        if session.forward_deadline.is_some() {
            return Ok(());
        }

        session.forward_deadline = Some(Instant::now() + delay);
        let call_id = session.id.clone();
        tracing::info!(session_id = %call_id, delay_ms = delay.as_millis() as u64, "Call forwarded to a human manager");
        self.emit(CallEvent::CallForwarded { call_id }).await;
        Ok(())
    }

    /// End the active call, if any. Every exit path funnels through here.
    async fn end_call(&mut self, reason: EndReason, error: Option<String>) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        tracing::info!(session_id = %session.id, ?reason, frames = session.frames_sent, "Ending call");

        session.state = CallState::Ended;
        self.status.send_modify(|s| s.state = CallState::Ended);
        self.emit(CallEvent::StateChanged {
            state: CallState::Ended,
        })
        .await;
        self.emit(CallEvent::CallEnded {
            call_id: session.id.clone(),
            ended_at: Utc::now(),
            transcript: self.transcript.snapshot(),
            reason,
        })
        .await;

        // A connect still in flight may bring the link up after this point.
        if session.link.is_some() || session.connect_task.is_some() {
            if let Err(e) = session.outbound.try_send(OutboundMessage::Close) {
                tracing::debug!(session_id = %session.id, error = %e, "Close not queued");
            }
        }
        session.release();
        drop(session);

        self.go_idle(error).await;
    }

    /// Ending events for a call that never got a session.
    async fn finish(&mut self, call_id: String, reason: EndReason, error: Option<String>) {
        self.status.send_modify(|s| s.state = CallState::Ended);
        self.emit(CallEvent::StateChanged {
            state: CallState::Ended,
        })
        .await;
        self.emit(CallEvent::CallEnded {
            call_id,
            ended_at: Utc::now(),
            transcript: self.transcript.snapshot(),
            reason,
        })
        .await;
        self.go_idle(error).await;
    }

    async fn go_idle(&mut self, error: Option<String>) {
        self.status.send_modify(|s| {
            s.state = CallState::Idle;
            s.call_id = None;
            if error.is_some() {
                s.error = error;
            }
        });
        self.emit(CallEvent::StateChanged {
            state: CallState::Idle,
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.capture_frame_samples, 4096);
        assert_eq!(config.priming_frame_samples, 1024);
        assert_eq!(config.forward_delay, Duration::from_millis(1000));
        assert_eq!(config.voice, "Kore");
    }

    #[test]
    fn call_error_messages() {
        let err = CallError::InvalidState {
            action: "start a call",
            state: CallState::Live,
        };
        assert_eq!(err.to_string(), "cannot start a call while the call is live");
        assert_eq!(CallError::PanelClosed.to_string(), "call panel has shut down");
    }

    #[tokio::test]
    async fn recv_opt_without_receiver_stays_pending() {
        let pending = recv_opt::<u8>(None);
        let result = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recv_opt_reports_closed_channel() {
        let (tx, mut rx) = mpsc::channel::<u8>(1);
        drop(tx);
        assert_eq!(recv_opt(Some(&mut rx)).await, None);
    }
}
