//! Cadence - Real-time voice conversation engine for AI agents
//!
//! This library provides the core of a full-duplex voice session:
//! - Microphone capture and energy-based speech segmentation
//! - A persistent duplex WebSocket to a remote speech agent
//! - Gapless scheduling of synthesized audio, with barge-in cancellation
//! - A turn-taking state machine with inactivity-driven sleep
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Audio thread                        │
//! │   capture stream  →  resample  →  voice detector    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ speech segments (channel)
//! ┌────────────────────▼────────────────────────────────┐
//! │               Orchestration loop                     │
//! │  state machine │ transcript │ dispatcher │ commands │
//! └──────┬──────────────────────────────────────┬───────┘
//!        │ binary PCM + control frames          │ schedule
//! ┌──────▼───────────────┐          ┌───────────▼───────┐
//! │  Connection manager  │          │ Playback scheduler │
//! │  (remote agent WS)   │          │  (output stream)   │
//! └──────────────────────┘          └───────────────────┘
//! ```

pub mod audio;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::Config;
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, VoiceEngine};
pub use error::{Error, Result};
pub use protocol::{AgentFrame, ClientFrame, Dispatcher, FunctionHandler};
pub use session::{
    Action, Conversation, ConversationMessage, ConversationStatus, LatencyRecord, Transcript,
    TranscriptEntry,
};
pub use transport::{ConnectionManager, ConnectionState, ReconnectGate, ReconnectPolicy, TransportEvent};
