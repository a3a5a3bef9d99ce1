//! Conversation state: turn-taking machine, transcript, diagnostics

mod state;
mod transcript;

pub use state::{Action, Conversation, ConversationStatus};
pub use transcript::{
    BackstageEvent, ConversationMessage, LatencyRecord, Transcript, TranscriptEntry,
};
