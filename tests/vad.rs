//! Voice activity detection integration tests
//!
//! Exercises segmentation without audio hardware.

use cadence_voice::audio::{SegmentKind, VoiceDetector};
use cadence_voice::config::VadConfig;

const SAMPLE_RATE: u32 = 16_000;
/// 100 ms processing frame
const FRAME: usize = 1600;

/// Generate sine wave audio samples
fn sine_frame(frequency: f32, amplitude: f32) -> Vec<f32> {
    (0..FRAME)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
fn silence_frame() -> Vec<f32> {
    vec![0.0; FRAME]
}

fn detector() -> VoiceDetector {
    VoiceDetector::new(&VadConfig::default(), SAMPLE_RATE)
}

#[test]
fn utterance_emits_exactly_one_segment() {
    let mut vad = detector();
    let mut segments = Vec::new();

    // 500 ms of speech...
    for _ in 0..5 {
        if let Some(e) = vad.push(&sine_frame(440.0, 0.3)) {
            segments.push(e);
        }
    }
    // ...then two seconds of silence
    for _ in 0..20 {
        if let Some(e) = vad.push(&silence_frame()) {
            segments.push(e);
        }
    }

    assert_eq!(segments.len(), 1, "expected a single emission");
    assert_eq!(segments[0].kind, SegmentKind::EndOfUtterance);
    assert!(!segments[0].segment.samples.is_empty());
}

#[test]
fn counters_reset_after_emission() {
    let mut vad = detector();

    for _ in 0..5 {
        vad.push(&sine_frame(440.0, 0.3));
    }
    let mut emitted = false;
    for _ in 0..20 {
        if vad.push(&silence_frame()).is_some() {
            emitted = true;
            break;
        }
    }

    assert!(emitted);
    assert_eq!(vad.speech_samples(), 0);
    assert_eq!(vad.silence_samples(), 0);
    assert_eq!(vad.buffered_samples(), 0);
}

#[test]
fn short_blip_never_emits() {
    // Below the minimum speech duration: one loud 50 ms burst
    let config = VadConfig {
        min_speech_duration_secs: 0.1,
        ..VadConfig::default()
    };
    let mut vad = VoiceDetector::new(&config, SAMPLE_RATE);

    let blip: Vec<f32> = sine_frame(440.0, 0.3)[..800].to_vec();
    assert!(vad.push(&blip).is_none());
    for _ in 0..40 {
        assert!(
            vad.push(&silence_frame()).is_none(),
            "sub-threshold speech must not emit"
        );
    }
}

#[test]
fn quiet_audio_is_not_speech() {
    let mut vad = detector();
    // Well under the default 0.01 energy threshold
    for _ in 0..20 {
        assert!(vad.push(&sine_frame(440.0, 0.005)).is_none());
    }
    assert_eq!(vad.buffered_samples(), 0);
}

#[test]
fn long_utterance_flushes_then_finishes() {
    let config = VadConfig {
        max_buffer_duration_secs: 1.0,
        ..VadConfig::default()
    };
    let mut vad = VoiceDetector::new(&config, SAMPLE_RATE);
    let mut emissions = Vec::new();

    // Three seconds of continuous speech against a one second cap
    for _ in 0..30 {
        if let Some(e) = vad.push(&sine_frame(220.0, 0.3)) {
            emissions.push(e.kind);
        }
    }
    // Then silence to close the utterance
    for _ in 0..20 {
        if let Some(e) = vad.push(&silence_frame()) {
            emissions.push(e.kind);
        }
    }

    assert!(emissions.len() >= 3, "expected multiple flushes: {emissions:?}");
    assert!(emissions[..emissions.len() - 1]
        .iter()
        .all(|k| *k == SegmentKind::Overflow));
    assert_eq!(*emissions.last().unwrap(), SegmentKind::EndOfUtterance);
}

#[test]
fn segments_carry_increasing_sequence_numbers() {
    let mut vad = detector();
    let mut seqs = Vec::new();

    for _ in 0..3 {
        for _ in 0..5 {
            vad.push(&sine_frame(440.0, 0.3));
        }
        for _ in 0..20 {
            if let Some(e) = vad.push(&silence_frame()) {
                seqs.push(e.segment.seq);
            }
        }
    }

    assert_eq!(seqs, vec![0, 1, 2]);
}
