//! Engine orchestrator, the session root
//!
//! Constructs every service explicitly, runs the single cooperative
//! event loop, and executes the actions the state machine hands back.
//! The loop never blocks: device setup and socket I/O are async or live
//! on their own threads, and all cross-component traffic is channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::audio::{MicSession, PlaybackScheduler, SpeechSegment, codec};
use crate::config::Config;
use crate::protocol::{AgentFrame, ClientFrame, Dispatcher, FunctionHandler};
use crate::session::{
    Action, Conversation, ConversationStatus, LatencyRecord, Transcript, TranscriptEntry,
};
use crate::transport::{ConnectionManager, ConnectionState, TransportEvent};
use crate::{Error, Result};

/// Updates published to subscribers
#[derive(Debug, Clone)]
pub enum EngineUpdate {
    /// Conversation status changed
    Status(ConversationStatus),
    /// Transport connection state changed
    Connection(ConnectionState),
    /// A transcript entry was appended (or spliced)
    Transcript(TranscriptEntry),
    /// Microphone permission was denied; actionable, retry after fixing
    PermissionDenied,
    /// Reconnect attempts are exhausted; actionable, reset to retry
    RateLimited,
    /// Non-fatal warning from the agent
    Warning(String),
    /// Non-fatal error from the agent
    AgentError {
        code: Option<String>,
        message: String,
    },
}

/// Commands accepted by the running engine
#[derive(Debug, Clone, Copy)]
pub enum EngineCommand {
    Connect,
    Disconnect,
    ToggleMic,
    ToggleSleep,
    Shutdown,
}

/// Caller-facing handle onto a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    updates: broadcast::Sender<EngineUpdate>,
}

impl EngineHandle {
    /// Subscribe to the update stream
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates.subscribe()
    }

    /// Open (or reopen) the agent connection
    pub fn connect(&self) {
        self.send(EngineCommand::Connect);
    }

    /// Manually close the session; no reconnects will follow
    pub fn disconnect(&self) {
        self.send(EngineCommand::Disconnect);
    }

    /// Mute or unmute the microphone
    pub fn toggle_mic(&self) {
        self.send(EngineCommand::ToggleMic);
    }

    /// Flip between sleeping and listening
    pub fn toggle_sleep(&self) {
        self.send(EngineCommand::ToggleSleep);
    }

    /// Stop the engine loop
    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown);
    }

    fn send(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(?command, "engine stopped, command dropped");
        }
    }
}

/// The voice conversation engine
pub struct VoiceEngine {
    config: Config,
    session_id: Uuid,
    mic: MicSession,
    playback: PlaybackScheduler,
    conversation: Conversation,
    transcript: Transcript,
    connection: ConnectionManager,
    dispatcher: Dispatcher,
    mic_muted: bool,
    segment_rx: mpsc::UnboundedReceiver<SpeechSegment>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    reply_rx: mpsc::UnboundedReceiver<ClientFrame>,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    updates: broadcast::Sender<EngineUpdate>,
}

impl VoiceEngine {
    /// Construct the engine and all of its services
    #[must_use]
    pub fn new(config: Config) -> Self {
        let session_id = Uuid::new_v4();
        let (segment_tx, segment_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(64);

        let session_config = ClientFrame::SessionConfig {
            input_sample_rate: config.audio.capture_sample_rate,
            output_sample_rate: config.audio.playback_sample_rate,
            sample_width_bits: 16,
            system_prompt: config.agent.system_prompt.clone(),
            first_message: config.agent.first_message.clone(),
            voice: config.agent.voice.clone(),
        };

        let mic = MicSession::new(
            config.vad.clone(),
            config.audio.capture_sample_rate,
            segment_tx,
        );
        let playback = PlaybackScheduler::new(config.audio.playback_sample_rate);
        let conversation = Conversation::new(
            config.session.sleep_after_secs,
            config.session.hard_disconnect_secs,
        );
        let connection =
            ConnectionManager::new(config.connection.clone(), session_config, transport_tx);
        let dispatcher = Dispatcher::new(reply_tx);

        Self {
            config,
            session_id,
            mic,
            playback,
            conversation,
            transcript: Transcript::new(),
            connection,
            dispatcher,
            mic_muted: false,
            segment_rx,
            transport_rx,
            reply_rx,
            command_rx,
            command_tx,
            updates,
        }
    }

    /// Session identifier
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Register a function handler (e.g. the feedback collaborator)
    pub fn register_function(&mut self, name: impl Into<String>, handler: Arc<dyn FunctionHandler>) {
        self.dispatcher.register_function(name, handler);
    }

    /// Handle for issuing commands and subscribing to updates
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.command_tx.clone(),
            updates: self.updates.clone(),
        }
    }

    /// Display-ordered transcript so far
    #[must_use]
    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.transcript.entries()
    }

    /// Run the session until shutdown, hard timeout, or a fatal error
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] / [`Error::DeviceUnavailable`]
    /// when the devices cannot be acquired; both are also published to
    /// subscribers before returning so callers can show retry UI.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(session = %self.session_id, "session starting");

        if let Err(e) = self.mic.setup().await {
            if matches!(e, Error::PermissionDenied(_)) {
                self.publish(EngineUpdate::PermissionDenied);
            }
            return Err(e);
        }
        self.playback.start()?;
        self.mic.start();
        self.connection.connect().await;

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                Some(segment) = self.segment_rx.recv() => {
                    self.forward_segment(segment).await;
                }
                Some(event) = self.transport_rx.recv() => {
                    if self.handle_transport_event(event).await {
                        break;
                    }
                }
                Some(frame) = self.reply_rx.recv() => {
                    if let Err(e) = self.connection.send_frame(&frame).await {
                        tracing::warn!(error = %e, "function reply not sent");
                    }
                }
                _ = ticker.tick() => {
                    let actions = self.conversation.tick();
                    if self.execute(actions).await {
                        break;
                    }
                }
            }
        }

        // Teardown in reverse construction order; stop() is unconditional
        self.mic.stop();
        self.playback.stop();
        self.connection.disconnect().await;
        tracing::info!(session = %self.session_id, "session stopped");
        Ok(())
    }

    /// Returns true when the engine should stop
    async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Connect => {
                if matches!(
                    self.connection.state(),
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    tracing::debug!("connect ignored, connection live");
                } else {
                    // A fresh connect clears any prior manual disconnect
                    self.connection.reset();
                    self.connection.connect().await;
                }
            }
            EngineCommand::Disconnect => {
                self.connection.disconnect().await;
            }
            EngineCommand::ToggleMic => {
                self.mic_muted = !self.mic_muted;
                self.apply_forwarding();
                tracing::info!(muted = self.mic_muted, "microphone toggled");
            }
            EngineCommand::ToggleSleep => {
                let actions = self.conversation.toggle_sleep();
                return self.execute(actions).await;
            }
            EngineCommand::Shutdown => return true,
        }
        false
    }

    /// Encode and send one speech segment
    async fn forward_segment(&mut self, segment: SpeechSegment) {
        let bytes = codec::to_wire(&segment.samples);
        tracing::debug!(seq = segment.seq, bytes = bytes.len(), "utterance outbound");
        if let Err(e) = self.connection.send_audio(bytes).await {
            tracing::warn!(seq = segment.seq, error = %e, "segment dropped");
        }
    }

    /// Returns true when the engine should stop
    async fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::State(state) => {
                self.publish(EngineUpdate::Connection(state));
            }
            TransportEvent::RateLimited => {
                self.publish(EngineUpdate::RateLimited);
            }
            TransportEvent::Audio(bytes) => {
                if self.conversation.suppress_inbound_audio() {
                    self.transcript.record_backstage("stale audio suppressed after wake");
                } else {
                    self.playback.enqueue(&bytes);
                }
            }
            TransportEvent::Frame(text) => {
                if let Some(frame) = self.dispatcher.handle_text(&text).await {
                    return self.handle_agent_frame(frame).await;
                }
            }
        }
        false
    }

    /// Returns true when the engine should stop
    async fn handle_agent_frame(&mut self, frame: AgentFrame) -> bool {
        match &frame {
            AgentFrame::SettingsApplied => {
                self.transcript.record_backstage("settings applied");
            }
            AgentFrame::UserTranscript { text } => {
                let entry = self.transcript.push_user(text.clone());
                self.publish(EngineUpdate::Transcript(entry));
            }
            AgentFrame::AgentTranscript { text } => {
                let entry = self.transcript.push_assistant(text.clone());
                self.publish(EngineUpdate::Transcript(entry));
            }
            AgentFrame::AgentStartedSpeaking {
                tts_latency_ms,
                think_latency_ms,
                total_latency_ms,
            } => {
                self.transcript.set_pending_latency(LatencyRecord {
                    tts_ms: *tts_latency_ms,
                    think_ms: *think_latency_ms,
                    total_ms: *total_latency_ms,
                });
            }
            AgentFrame::UserStartedSpeaking => {
                self.transcript.record_backstage("user interruption");
            }
            AgentFrame::AudioDone => {
                self.transcript.record_backstage("agent audio segment complete");
            }
            AgentFrame::Warning { message } => {
                tracing::warn!(message = %message, "agent warning");
                self.publish(EngineUpdate::Warning(message.clone()));
            }
            AgentFrame::Error { code, message } => {
                tracing::warn!(code = ?code, message = %message, "agent error");
                self.publish(EngineUpdate::AgentError {
                    code: code.clone(),
                    message: message.clone(),
                });
            }
            AgentFrame::FunctionCall { .. } => {
                // Consumed by the dispatcher; never reaches here
            }
        }

        let actions = self.conversation.apply(&frame);
        self.execute(actions).await
    }

    /// Carry out state-machine actions; returns true on hard timeout
    async fn execute(&mut self, actions: Vec<Action>) -> bool {
        for action in actions {
            match action {
                Action::CancelPlayback => self.playback.cancel_all(),
                Action::SetForwarding(enabled) => {
                    if enabled {
                        self.apply_forwarding();
                    } else {
                        self.mic.set_forwarding(false);
                    }
                }
                Action::StatusChanged(status) => {
                    self.publish(EngineUpdate::Status(status));
                }
                Action::HardTimeout => {
                    tracing::info!(
                        limit_secs = self.config.session.hard_disconnect_secs,
                        "inactive session torn down"
                    );
                    self.connection.disconnect().await;
                    return true;
                }
            }
        }
        false
    }

    /// Forwarding is on only when unmuted and the session is awake
    fn apply_forwarding(&self) {
        let sleeping = self.conversation.status() == ConversationStatus::Sleeping;
        self.mic.set_forwarding(!self.mic_muted && !sleeping);
    }

    fn publish(&self, update: EngineUpdate) {
        // Lagging or absent subscribers are fine; updates are best-effort
        let _ = self.updates.send(update);
    }
}
