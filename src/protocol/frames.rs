//! Wire frames exchanged with the remote speech agent
//!
//! Control frames are JSON tagged by `type`; audio travels as separate
//! binary frames and never appears here.

use serde::{Deserialize, Serialize};

/// Inbound control frame from the agent
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// The session configuration frame was accepted
    SettingsApplied,
    /// Transcription of what the user said
    UserTranscript { text: String },
    /// Transcription of what the agent is saying
    AgentTranscript { text: String },
    /// The current synthesized audio segment is complete
    AudioDone,
    /// The agent's endpoint detected the user speaking (barge-in)
    UserStartedSpeaking,
    /// Synthesis began for the agent's reply; carries latency metrics
    AgentStartedSpeaking {
        #[serde(default)]
        tts_latency_ms: u64,
        #[serde(default)]
        think_latency_ms: u64,
        #[serde(default)]
        total_latency_ms: u64,
    },
    /// Non-fatal warning, surfaced to the caller
    Warning { message: String },
    /// Non-fatal error, surfaced to the caller
    Error {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
    /// Out-of-band function-call request
    FunctionCall {
        name: String,
        call_id: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
}

/// Outbound control frame to the agent
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Initial configuration: sample formats and agent behavior
    SessionConfig {
        input_sample_rate: u32,
        output_sample_rate: u32,
        /// Bit depth of the linear PCM audio in both directions
        sample_width_bits: u32,
        system_prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        first_message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
    },
    /// No-op frame holding the connection open
    Keepalive,
    /// Result of a completed function call
    FunctionResult {
        call_id: String,
        result: serde_json::Value,
    },
    /// A function call that could not be completed
    FunctionError { call_id: String, error: String },
}
