//! Conversation turn-taking state machine
//!
//! Single writer for [`ConversationStatus`]. The machine owns no devices
//! and performs no I/O: every transition returns the [`Action`]s the
//! orchestrator must execute (cancel playback, gate the microphone,
//! publish the status). Events are applied strictly in arrival order.

use crate::protocol::AgentFrame;

/// Conversation status, visible to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Pre-session
    None,
    /// Waiting for the user to speak
    Listening,
    /// The agent is composing a reply
    Thinking,
    /// The agent is speaking
    Speaking,
    /// Inactivity put the session to sleep
    Sleeping,
}

/// Side effects the orchestrator must carry out after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stop and release all scheduled playback (barge-in)
    CancelPlayback,
    /// Enable or suppress outbound audio forwarding at the mic boundary
    SetForwarding(bool),
    /// Publish the new status to subscribers
    StatusChanged(ConversationStatus),
    /// Inactivity exceeded the hard limit; tear the session down
    HardTimeout,
}

/// The turn-taking state machine
pub struct Conversation {
    status: ConversationStatus,
    /// Seconds since the last listening/speaking activity (1 Hz tick)
    inactive_secs: u32,
    sleep_after_secs: u32,
    hard_timeout_secs: u32,
    hard_timeout_fired: bool,
    /// Set when waking through speech; suppresses stale inbound audio
    /// until the agent acknowledges the wake with a fresh utterance
    awaiting_wake_ack: bool,
}

impl Conversation {
    /// Create a machine with the given inactivity thresholds
    #[must_use]
    pub const fn new(sleep_after_secs: u32, hard_timeout_secs: u32) -> Self {
        Self {
            status: ConversationStatus::None,
            inactive_secs: 0,
            sleep_after_secs,
            hard_timeout_secs,
            hard_timeout_fired: false,
            awaiting_wake_ack: false,
        }
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> ConversationStatus {
        self.status
    }

    /// Seconds since the last listening/speaking activity
    #[must_use]
    pub const fn inactive_secs(&self) -> u32 {
        self.inactive_secs
    }

    /// Whether inbound audio frames should be dropped (stale post-wake audio)
    #[must_use]
    pub const fn suppress_inbound_audio(&self) -> bool {
        self.awaiting_wake_ack
    }

    /// Enter LISTENING; resets the sleep timer
    ///
    /// `wake` clears the waiting-for-voice-after-sleep guard.
    pub fn start_listening(&mut self, wake: bool) -> Vec<Action> {
        self.inactive_secs = 0;
        if wake {
            self.awaiting_wake_ack = false;
        }
        self.transition(ConversationStatus::Listening)
    }

    /// Enter SPEAKING; resets the sleep timer
    ///
    /// `wake` sets the guard so stale audio frames arriving before the
    /// wake is acknowledged are suppressed.
    pub fn start_speaking(&mut self, wake: bool) -> Vec<Action> {
        self.inactive_secs = 0;
        if wake {
            self.awaiting_wake_ack = true;
        }
        self.transition(ConversationStatus::Speaking)
    }

    /// Flip between SLEEPING and LISTENING
    pub fn toggle_sleep(&mut self) -> Vec<Action> {
        if self.status == ConversationStatus::Sleeping {
            self.start_listening(true)
        } else {
            self.transition(ConversationStatus::Sleeping)
        }
    }

    /// 1 Hz tick: advance the inactivity counter
    ///
    /// Crossing the sleep threshold forces SLEEPING exactly once,
    /// overriding any other state; crossing the hard limit emits
    /// [`Action::HardTimeout`] exactly once.
    pub fn tick(&mut self) -> Vec<Action> {
        if self.status == ConversationStatus::None {
            return Vec::new();
        }

        self.inactive_secs += 1;
        let mut actions = Vec::new();

        if self.status != ConversationStatus::Sleeping
            && self.inactive_secs > self.sleep_after_secs
        {
            tracing::info!(secs = self.inactive_secs, "inactivity, going to sleep");
            actions.extend(self.transition(ConversationStatus::Sleeping));
        }

        if !self.hard_timeout_fired && self.inactive_secs >= self.hard_timeout_secs {
            tracing::warn!(secs = self.inactive_secs, "inactivity hard limit reached");
            self.hard_timeout_fired = true;
            actions.push(Action::HardTimeout);
        }

        actions
    }

    /// Apply an inbound agent frame, in arrival order
    pub fn apply(&mut self, frame: &AgentFrame) -> Vec<Action> {
        match frame {
            AgentFrame::SettingsApplied => {
                // Session is live; start listening for the user
                self.start_listening(false)
            }
            AgentFrame::UserStartedSpeaking => {
                let mut actions = Vec::new();
                if self.status == ConversationStatus::Speaking {
                    // Barge-in: stale agent audio must stop immediately
                    actions.push(Action::CancelPlayback);
                }
                actions.extend(self.start_listening(false));
                actions
            }
            AgentFrame::UserTranscript { .. } => {
                if self.status == ConversationStatus::Sleeping {
                    Vec::new()
                } else {
                    self.transition(ConversationStatus::Thinking)
                }
            }
            AgentFrame::AgentStartedSpeaking { .. } => {
                // A fresh utterance acknowledges any pending wake
                self.awaiting_wake_ack = false;
                self.start_speaking(false)
            }
            AgentFrame::AudioDone => {
                if self.status == ConversationStatus::Speaking {
                    self.start_listening(false)
                } else {
                    Vec::new()
                }
            }
            AgentFrame::AgentTranscript { .. }
            | AgentFrame::Warning { .. }
            | AgentFrame::Error { .. }
            | AgentFrame::FunctionCall { .. } => Vec::new(),
        }
    }

    /// Move to `next`, emitting the status change and the forwarding gate
    fn transition(&mut self, next: ConversationStatus) -> Vec<Action> {
        if self.status == next {
            return Vec::new();
        }

        let was_sleeping = self.status == ConversationStatus::Sleeping;
        self.status = next;

        let mut actions = Vec::new();
        if next == ConversationStatus::Sleeping {
            actions.push(Action::SetForwarding(false));
        } else if was_sleeping {
            actions.push(Action::SetForwarding(true));
        }
        actions.push(Action::StatusChanged(next));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation::new(60, 300)
    }

    #[test]
    fn starts_in_none() {
        let c = conversation();
        assert_eq!(c.status(), ConversationStatus::None);
        assert!(!c.suppress_inbound_audio());
    }

    #[test]
    fn ticks_before_session_start_do_nothing() {
        let mut c = conversation();
        for _ in 0..120 {
            assert!(c.tick().is_empty());
        }
        assert_eq!(c.status(), ConversationStatus::None);
    }

    #[test]
    fn listening_resets_the_sleep_timer() {
        let mut c = conversation();
        c.start_listening(false);
        for _ in 0..30 {
            c.tick();
        }
        assert_eq!(c.inactive_secs(), 30);
        c.start_speaking(false);
        assert_eq!(c.inactive_secs(), 0);
    }

    #[test]
    fn sleep_threshold_fires_exactly_once() {
        let mut c = conversation();
        c.start_listening(false);
        c.start_speaking(false);

        let mut sleep_transitions = 0;
        for _ in 0..61 {
            for action in c.tick() {
                if action == Action::StatusChanged(ConversationStatus::Sleeping) {
                    sleep_transitions += 1;
                }
            }
        }
        assert_eq!(sleep_transitions, 1);
        assert_eq!(c.status(), ConversationStatus::Sleeping);
    }

    #[test]
    fn sleeping_gates_the_microphone() {
        let mut c = conversation();
        c.start_listening(false);
        for _ in 0..61 {
            c.tick();
        }
        // The forced sleep carried the forwarding-off signal
        assert_eq!(c.status(), ConversationStatus::Sleeping);

        let actions = c.toggle_sleep();
        assert!(actions.contains(&Action::SetForwarding(true)));
        assert_eq!(c.status(), ConversationStatus::Listening);
    }

    #[test]
    fn toggle_sleep_flips_both_ways() {
        let mut c = conversation();
        c.start_listening(false);

        let actions = c.toggle_sleep();
        assert!(actions.contains(&Action::SetForwarding(false)));
        assert_eq!(c.status(), ConversationStatus::Sleeping);

        c.toggle_sleep();
        assert_eq!(c.status(), ConversationStatus::Listening);
    }

    #[test]
    fn hard_timeout_fires_once_at_the_limit() {
        let mut c = Conversation::new(10, 30);
        c.start_listening(false);

        let mut hard_timeouts = 0;
        for _ in 0..60 {
            for action in c.tick() {
                if action == Action::HardTimeout {
                    hard_timeouts += 1;
                }
            }
        }
        assert_eq!(hard_timeouts, 1);
    }

    #[test]
    fn barge_in_cancels_playback_and_listens() {
        let mut c = conversation();
        c.start_speaking(false);

        let actions = c.apply(&AgentFrame::UserStartedSpeaking);
        assert_eq!(actions[0], Action::CancelPlayback);
        assert!(actions.contains(&Action::StatusChanged(ConversationStatus::Listening)));
        assert_eq!(c.status(), ConversationStatus::Listening);
    }

    #[test]
    fn barge_in_while_listening_does_not_cancel() {
        let mut c = conversation();
        c.start_listening(false);

        let actions = c.apply(&AgentFrame::UserStartedSpeaking);
        assert!(!actions.contains(&Action::CancelPlayback));
    }

    #[test]
    fn user_transcript_moves_to_thinking() {
        let mut c = conversation();
        c.start_listening(false);
        c.apply(&AgentFrame::UserTranscript {
            text: "hello".to_string(),
        });
        assert_eq!(c.status(), ConversationStatus::Thinking);
    }

    #[test]
    fn audio_done_returns_to_listening() {
        let mut c = conversation();
        c.start_speaking(false);
        c.apply(&AgentFrame::AudioDone);
        assert_eq!(c.status(), ConversationStatus::Listening);
    }

    #[test]
    fn wake_guard_suppresses_until_fresh_utterance() {
        let mut c = conversation();
        c.start_speaking(true);
        assert!(c.suppress_inbound_audio());

        c.apply(&AgentFrame::AgentStartedSpeaking {
            tts_latency_ms: 0,
            think_latency_ms: 0,
            total_latency_ms: 0,
        });
        assert!(!c.suppress_inbound_audio());
    }

    #[test]
    fn waking_through_listening_clears_the_guard() {
        let mut c = conversation();
        c.start_speaking(true);
        assert!(c.suppress_inbound_audio());
        c.start_listening(true);
        assert!(!c.suppress_inbound_audio());
    }
}
