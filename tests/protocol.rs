//! Protocol dispatch integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use cadence_voice::protocol::{AgentFrame, ClientFrame, Dispatcher, FunctionHandler};
use cadence_voice::{Error, Result};
use tokio::sync::mpsc;

/// Records invocations and echoes the arguments back
struct RecordingHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl FunctionHandler for RecordingHandler {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "echoed": arguments }))
    }
}

/// Simulates the feedback collaborator rejecting bad input
struct StrictFeedback;

#[async_trait]
impl FunctionHandler for StrictFeedback {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        if arguments.get("summary").and_then(|v| v.as_str()).is_none() {
            return Err(Error::Protocol("feedback requires a summary".to_string()));
        }
        Ok(serde_json::json!({ "stored": true }))
    }
}

fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<ClientFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Dispatcher::new(tx), rx)
}

#[tokio::test]
async fn garbage_frames_never_stop_the_loop() {
    let (dispatcher, _rx) = dispatcher();

    for junk in [
        "",
        "not json",
        "1234",
        r#"{"type":"unheard_of_frame"}"#,
        r#"{"missing":"type"}"#,
        "\u{0}\u{1}\u{2}",
    ] {
        assert!(dispatcher.handle_text(junk).await.is_none());
    }

    // A valid frame still parses afterwards
    let frame = dispatcher
        .handle_text(r#"{"type":"audio_done"}"#)
        .await;
    assert_eq!(frame, Some(AgentFrame::AudioDone));
}

#[tokio::test]
async fn function_call_round_trip() {
    let (mut dispatcher, mut rx) = dispatcher();
    let calls = Arc::new(AtomicUsize::new(0));
    dispatcher.register_function(
        "save_feedback",
        Arc::new(RecordingHandler {
            calls: Arc::clone(&calls),
        }),
    );

    let consumed = dispatcher
        .handle_text(
            r#"{"type":"function_call","name":"save_feedback","call_id":"fc-1","arguments":{"score":4}}"#,
        )
        .await;
    assert!(consumed.is_none(), "function calls never reach the state machine");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    match rx.recv().await.unwrap() {
        ClientFrame::FunctionResult { call_id, result } => {
            assert_eq!(call_id, "fc-1");
            assert_eq!(result["echoed"]["score"], 4);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_function_is_an_error_frame_not_a_crash() {
    let (dispatcher, mut rx) = dispatcher();

    dispatcher
        .handle_text(r#"{"type":"function_call","name":"no_such_fn","call_id":"fc-2"}"#)
        .await;

    match rx.recv().await.unwrap() {
        ClientFrame::FunctionError { call_id, error } => {
            assert_eq!(call_id, "fc-2");
            assert!(error.contains("no_such_fn"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn handler_rejection_becomes_an_error_frame() {
    let (mut dispatcher, mut rx) = dispatcher();
    dispatcher.register_function("save_feedback", Arc::new(StrictFeedback));

    dispatcher
        .handle_text(
            r#"{"type":"function_call","name":"save_feedback","call_id":"fc-3","arguments":{}}"#,
        )
        .await;

    match rx.recv().await.unwrap() {
        ClientFrame::FunctionError { call_id, error } => {
            assert_eq!(call_id, "fc-3");
            assert!(error.contains("summary"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[test]
fn transcript_frames_deserialize() {
    let user: AgentFrame =
        serde_json::from_str(r#"{"type":"user_transcript","text":"hello there"}"#).unwrap();
    assert_eq!(
        user,
        AgentFrame::UserTranscript {
            text: "hello there".to_string()
        }
    );

    let agent: AgentFrame =
        serde_json::from_str(r#"{"type":"agent_transcript","text":"hi"}"#).unwrap();
    assert_eq!(
        agent,
        AgentFrame::AgentTranscript {
            text: "hi".to_string()
        }
    );
}

#[test]
fn session_config_wire_shape() {
    let frame = ClientFrame::SessionConfig {
        input_sample_rate: 16_000,
        output_sample_rate: 24_000,
        sample_width_bits: 16,
        system_prompt: "You are a mock interviewer.".to_string(),
        first_message: Some("Shall we begin?".to_string()),
        voice: Some("aria".to_string()),
    };

    let value: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
    assert_eq!(value["type"], "session_config");
    assert_eq!(value["input_sample_rate"], 16_000);
    assert_eq!(value["output_sample_rate"], 24_000);
    assert_eq!(value["sample_width_bits"], 16);
    assert_eq!(value["first_message"], "Shall we begin?");
}
