//! Conversation transcript and diagnostics
//!
//! The transcript is an append-only message log. Latency records attach
//! to assistant turns and are spliced into the display order at turn
//! boundaries (an assistant message immediately followed by a user
//! message ends the turn). Backstage events are a bounded diagnostic
//! ring; they are never authoritative state.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Cap on retained backstage events
const BACKSTAGE_CAP: usize = 256;

/// One utterance in the conversation
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "speaker", content = "text", rename_all = "snake_case")]
pub enum ConversationMessage {
    User(String),
    Assistant(String),
}

/// Latency metrics for one assistant turn; observability only
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LatencyRecord {
    /// Time to first synthesized audio
    pub tts_ms: u64,
    /// Model thinking time
    pub think_ms: u64,
    /// End-to-end turn latency
    pub total_ms: u64,
}

/// Display-ordered transcript entry
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Message {
        at: DateTime<Utc>,
        #[serde(flatten)]
        message: ConversationMessage,
    },
    Latency(LatencyRecord),
}

/// Protocol-level diagnostic event (debug only)
#[derive(Debug, Clone)]
pub struct BackstageEvent {
    pub at: DateTime<Utc>,
    pub detail: String,
}

/// Append-only conversation log with latency interleaving
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    pending_latency: Option<LatencyRecord>,
    backstage: VecDeque<BackstageEvent>,
}

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user utterance
    ///
    /// When this closes an assistant turn, the pending latency record is
    /// spliced in at the boundary first.
    pub fn push_user(&mut self, text: impl Into<String>) -> TranscriptEntry {
        if self.last_message_is_assistant() {
            if let Some(latency) = self.pending_latency.take() {
                self.entries.push(TranscriptEntry::Latency(latency));
            }
        }
        self.push_message(ConversationMessage::User(text.into()))
    }

    /// Append an assistant utterance
    pub fn push_assistant(&mut self, text: impl Into<String>) -> TranscriptEntry {
        self.push_message(ConversationMessage::Assistant(text.into()))
    }

    /// Attach latency metrics to the assistant turn in progress
    pub fn set_pending_latency(&mut self, latency: LatencyRecord) {
        self.pending_latency = Some(latency);
    }

    /// Display-ordered entries
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Number of spoken messages (latency entries excluded)
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, TranscriptEntry::Message { .. }))
            .count()
    }

    /// Record a diagnostic event, evicting the oldest past the cap
    pub fn record_backstage(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::debug!(event = %detail, "backstage");
        if self.backstage.len() == BACKSTAGE_CAP {
            self.backstage.pop_front();
        }
        self.backstage.push_back(BackstageEvent {
            at: Utc::now(),
            detail,
        });
    }

    /// Diagnostic events, oldest first
    #[must_use]
    pub fn backstage(&self) -> impl Iterator<Item = &BackstageEvent> {
        self.backstage.iter()
    }

    fn push_message(&mut self, message: ConversationMessage) -> TranscriptEntry {
        let entry = TranscriptEntry::Message {
            at: Utc::now(),
            message,
        };
        self.entries.push(entry.clone());
        entry
    }

    fn last_message_is_assistant(&self) -> bool {
        self.entries
            .iter()
            .rev()
            .find_map(|e| match e {
                TranscriptEntry::Message { message, .. } => Some(message),
                TranscriptEntry::Latency(_) => None,
            })
            .is_some_and(|m| matches!(m, ConversationMessage::Assistant(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latency() -> LatencyRecord {
        LatencyRecord {
            tts_ms: 100,
            think_ms: 400,
            total_ms: 500,
        }
    }

    fn message_texts(transcript: &Transcript) -> Vec<String> {
        transcript
            .entries()
            .iter()
            .map(|e| match e {
                TranscriptEntry::Message { message, .. } => match message {
                    ConversationMessage::User(t) => format!("user:{t}"),
                    ConversationMessage::Assistant(t) => format!("assistant:{t}"),
                },
                TranscriptEntry::Latency(l) => format!("latency:{}", l.total_ms),
            })
            .collect()
    }

    #[test]
    fn latency_splices_at_the_turn_boundary() {
        let mut t = Transcript::new();
        t.push_assistant("Tell me about yourself.");
        t.set_pending_latency(latency());
        t.push_user("Sure, I have five years of experience.");

        assert_eq!(
            message_texts(&t),
            vec![
                "assistant:Tell me about yourself.",
                "latency:500",
                "user:Sure, I have five years of experience.",
            ]
        );
    }

    #[test]
    fn no_pending_latency_means_no_splice() {
        let mut t = Transcript::new();
        t.push_assistant("Hello.");
        t.push_user("Hi.");
        assert_eq!(message_texts(&t), vec!["assistant:Hello.", "user:Hi."]);
    }

    #[test]
    fn latency_is_consumed_once() {
        let mut t = Transcript::new();
        t.push_assistant("First question.");
        t.set_pending_latency(latency());
        t.push_user("First answer.");
        t.push_assistant("Second question.");
        t.push_user("Second answer.");

        let latency_entries = t
            .entries()
            .iter()
            .filter(|e| matches!(e, TranscriptEntry::Latency(_)))
            .count();
        assert_eq!(latency_entries, 1);
    }

    #[test]
    fn consecutive_user_messages_do_not_splice() {
        let mut t = Transcript::new();
        t.set_pending_latency(latency());
        t.push_user("One.");
        t.push_user("Two.");
        assert_eq!(message_texts(&t), vec!["user:One.", "user:Two."]);
    }

    #[test]
    fn message_count_ignores_latency_entries() {
        let mut t = Transcript::new();
        t.push_assistant("Q");
        t.set_pending_latency(latency());
        t.push_user("A");
        assert_eq!(t.message_count(), 2);
        assert_eq!(t.entries().len(), 3);
    }

    #[test]
    fn backstage_ring_is_bounded() {
        let mut t = Transcript::new();
        for i in 0..300 {
            t.record_backstage(format!("event {i}"));
        }
        assert_eq!(t.backstage().count(), BACKSTAGE_CAP);
        assert_eq!(t.backstage().next().unwrap().detail, "event 44");
    }
}
