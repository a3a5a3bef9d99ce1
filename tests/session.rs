//! Conversation state machine integration tests

use cadence_voice::protocol::AgentFrame;
use cadence_voice::session::{Action, Conversation, ConversationStatus};

fn agent_started_speaking() -> AgentFrame {
    AgentFrame::AgentStartedSpeaking {
        tts_latency_ms: 120,
        think_latency_ms: 300,
        total_latency_ms: 420,
    }
}

#[test]
fn sixty_one_ticks_sleep_exactly_once() {
    let mut conversation = Conversation::new(60, 300);
    conversation.start_listening(false);
    conversation.start_speaking(false);

    let mut sleep_count = 0;
    for _ in 0..61 {
        for action in conversation.tick() {
            if action == Action::StatusChanged(ConversationStatus::Sleeping) {
                sleep_count += 1;
            }
        }
    }

    assert_eq!(sleep_count, 1);
    assert_eq!(conversation.status(), ConversationStatus::Sleeping);
}

#[test]
fn activity_defers_sleep() {
    let mut conversation = Conversation::new(60, 300);
    conversation.start_listening(false);

    for _ in 0..59 {
        conversation.tick();
    }
    // Speaking resets the timer just before the threshold
    conversation.start_speaking(false);
    for _ in 0..59 {
        conversation.tick();
    }

    assert_ne!(conversation.status(), ConversationStatus::Sleeping);
}

#[test]
fn barge_in_while_speaking_cancels_and_listens() {
    let mut conversation = Conversation::new(60, 300);
    conversation.start_listening(false);
    conversation.apply(&agent_started_speaking());
    assert_eq!(conversation.status(), ConversationStatus::Speaking);

    let actions = conversation.apply(&AgentFrame::UserStartedSpeaking);

    assert_eq!(actions[0], Action::CancelPlayback);
    assert!(actions.contains(&Action::StatusChanged(ConversationStatus::Listening)));
    assert_eq!(conversation.status(), ConversationStatus::Listening);
}

#[test]
fn full_turn_cycle() {
    let mut conversation = Conversation::new(60, 300);

    // Settings acknowledged: the session starts listening
    conversation.apply(&AgentFrame::SettingsApplied);
    assert_eq!(conversation.status(), ConversationStatus::Listening);

    // The user speaks and the transcript lands: agent is thinking
    conversation.apply(&AgentFrame::UserTranscript {
        text: "walk me through your resume".to_string(),
    });
    assert_eq!(conversation.status(), ConversationStatus::Thinking);

    // Synthesis starts: agent speaking
    conversation.apply(&agent_started_speaking());
    assert_eq!(conversation.status(), ConversationStatus::Speaking);

    // Segment complete: back to listening
    conversation.apply(&AgentFrame::AudioDone);
    assert_eq!(conversation.status(), ConversationStatus::Listening);
}

#[test]
fn sleep_wake_cycle_gates_forwarding() {
    let mut conversation = Conversation::new(60, 300);
    conversation.start_listening(false);

    let to_sleep = conversation.toggle_sleep();
    assert!(to_sleep.contains(&Action::SetForwarding(false)));
    assert_eq!(conversation.status(), ConversationStatus::Sleeping);

    // Sleep does not advance to other states on agent noise
    conversation.apply(&AgentFrame::UserTranscript {
        text: "stale".to_string(),
    });
    assert_eq!(conversation.status(), ConversationStatus::Sleeping);

    let to_wake = conversation.toggle_sleep();
    assert!(to_wake.contains(&Action::SetForwarding(true)));
    assert_eq!(conversation.status(), ConversationStatus::Listening);
}

#[test]
fn forced_sleep_overrides_speaking() {
    let mut conversation = Conversation::new(10, 300);
    conversation.apply(&agent_started_speaking());
    assert_eq!(conversation.status(), ConversationStatus::Speaking);

    for _ in 0..11 {
        conversation.tick();
    }
    assert_eq!(conversation.status(), ConversationStatus::Sleeping);
}

#[test]
fn hard_timeout_fires_after_prolonged_sleep() {
    let mut conversation = Conversation::new(5, 20);
    conversation.start_listening(false);

    let mut saw_sleep = false;
    let mut saw_hard_timeout = false;
    for _ in 0..25 {
        for action in conversation.tick() {
            match action {
                Action::StatusChanged(ConversationStatus::Sleeping) => saw_sleep = true,
                Action::HardTimeout => {
                    assert!(saw_sleep, "hard timeout should follow sleep");
                    saw_hard_timeout = true;
                }
                _ => {}
            }
        }
    }
    assert!(saw_hard_timeout);
}

#[test]
fn errors_and_warnings_leave_status_untouched() {
    let mut conversation = Conversation::new(60, 300);
    conversation.start_listening(false);

    assert!(conversation
        .apply(&AgentFrame::Warning {
            message: "transcoder fallback".to_string(),
        })
        .is_empty());
    assert!(conversation
        .apply(&AgentFrame::Error {
            code: Some("tts_overload".to_string()),
            message: "retry later".to_string(),
        })
        .is_empty());
    assert_eq!(conversation.status(), ConversationStatus::Listening);
}
