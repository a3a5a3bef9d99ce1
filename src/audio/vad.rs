//! Energy-based voice activity detection
//!
//! Splits the capture stream into discrete speech segments. A frame is
//! speech when its RMS energy exceeds the configured threshold; a segment
//! ends when enough silence follows enough speech. Long utterances flush
//! early so buffering stays bounded without losing detector state.

use crate::audio::codec;
use crate::config::VadConfig;

/// A completed speech segment bound for the transport
///
/// Samples are quantized at emission; the segment moves to the transport
/// and is never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    /// Monotonically increasing per-session sequence number
    pub seq: u64,
    /// Quantized mono samples at the capture rate
    pub samples: Vec<i16>,
}

/// Why a segment was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Silence after speech: the utterance is over, counters reset
    EndOfUtterance,
    /// Buffer cap reached mid-utterance: flushed, counters preserved
    Overflow,
}

/// Output of feeding one frame through the detector
#[derive(Debug)]
pub struct Emission {
    pub segment: SpeechSegment,
    pub kind: SegmentKind,
}

/// Voice activity detector
///
/// Pure sample-counter logic; runs on the audio thread and owns no
/// devices or channels.
pub struct VoiceDetector {
    energy_threshold: f32,
    silence_samples_needed: usize,
    min_speech_samples: usize,
    max_buffer_samples: usize,
    silence_samples: usize,
    speech_samples: usize,
    buffer: Vec<f32>,
    next_seq: u64,
}

impl VoiceDetector {
    /// Create a detector for the given capture sample rate
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        let to_samples = |secs: f32| (secs * sample_rate as f32) as usize;
        Self {
            energy_threshold: config.energy_threshold,
            silence_samples_needed: to_samples(config.silence_duration_secs),
            min_speech_samples: to_samples(config.min_speech_duration_secs),
            max_buffer_samples: to_samples(config.max_buffer_duration_secs),
            silence_samples: 0,
            speech_samples: 0,
            buffer: Vec::new(),
            next_seq: 0,
        }
    }

    /// Feed one capture frame; returns a segment when one completes
    pub fn push(&mut self, frame: &[f32]) -> Option<Emission> {
        if frame.is_empty() {
            return None;
        }

        let energy = rms_energy(frame);
        let is_speech = energy > self.energy_threshold;

        if is_speech {
            self.silence_samples = 0;
            self.speech_samples += frame.len();
            self.buffer.extend_from_slice(frame);
        } else if self.speech_samples > 0 {
            // Trailing silence is part of the utterance until it ends
            self.silence_samples += frame.len();
            self.buffer.extend_from_slice(frame);
        } else {
            // Leading silence: nothing buffered yet
            return None;
        }

        if self.silence_samples >= self.silence_samples_needed
            && self.speech_samples >= self.min_speech_samples
        {
            let segment = self.take_segment();
            self.silence_samples = 0;
            self.speech_samples = 0;
            tracing::debug!(seq = segment.seq, samples = segment.samples.len(), "utterance complete");
            return Some(Emission {
                segment,
                kind: SegmentKind::EndOfUtterance,
            });
        }

        if self.buffer.len() >= self.max_buffer_samples {
            let segment = self.take_segment();
            tracing::debug!(seq = segment.seq, samples = segment.samples.len(), "buffer cap flush");
            return Some(Emission {
                segment,
                kind: SegmentKind::Overflow,
            });
        }

        None
    }

    /// Discard buffered audio and counters (used when forwarding is gated)
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.silence_samples = 0;
        self.speech_samples = 0;
    }

    /// Accumulated silence in samples
    #[must_use]
    pub const fn silence_samples(&self) -> usize {
        self.silence_samples
    }

    /// Accumulated speech in samples
    #[must_use]
    pub const fn speech_samples(&self) -> usize {
        self.speech_samples
    }

    /// Buffered sample count
    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    fn take_segment(&mut self) -> SpeechSegment {
        let seq = self.next_seq;
        self.next_seq += 1;
        SpeechSegment {
            seq,
            samples: codec::quantize(&std::mem::take(&mut self.buffer)),
        }
    }
}

/// RMS energy of a frame
#[allow(clippy::cast_precision_loss)]
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> VoiceDetector {
        VoiceDetector::new(&VadConfig::default(), 16_000)
    }

    #[test]
    fn energy_of_silence_is_zero() {
        assert!(rms_energy(&vec![0.0; 160]) < 1e-6);
    }

    #[test]
    fn energy_of_tone_is_positive() {
        assert!(rms_energy(&vec![0.5; 160]) > 0.4);
    }

    #[test]
    fn leading_silence_buffers_nothing() {
        let mut vad = detector();
        assert!(vad.push(&vec![0.0; 1600]).is_none());
        assert_eq!(vad.buffered_samples(), 0);
    }

    #[test]
    fn sequence_numbers_increase() {
        let mut vad = detector();
        let speech = vec![0.3; 3200];
        let silence = vec![0.0; 16_000];

        vad.push(&speech);
        let first = vad.push(&silence).expect("first segment");
        vad.push(&speech);
        let second = vad.push(&silence).expect("second segment");

        assert_eq!(first.segment.seq, 0);
        assert_eq!(second.segment.seq, 1);
    }

    #[test]
    fn overflow_preserves_counters() {
        let config = VadConfig {
            max_buffer_duration_secs: 0.5,
            ..VadConfig::default()
        };
        let mut vad = VoiceDetector::new(&config, 16_000);

        // One second of continuous speech against a 0.5 s cap
        let mut emission = None;
        for _ in 0..10 {
            if let Some(e) = vad.push(&vec![0.3; 1600]) {
                emission = Some(e);
                break;
            }
        }

        let emission = emission.expect("overflow flush");
        assert_eq!(emission.kind, SegmentKind::Overflow);
        // Speech counter survives the flush; the utterance is still open
        assert!(vad.speech_samples() > 0);
        assert_eq!(vad.buffered_samples(), 0);
    }

    #[test]
    fn reset_clears_state() {
        let mut vad = detector();
        vad.push(&vec![0.3; 1600]);
        assert!(vad.buffered_samples() > 0);
        vad.reset();
        assert_eq!(vad.buffered_samples(), 0);
        assert_eq!(vad.speech_samples(), 0);
        assert_eq!(vad.silence_samples(), 0);
    }
}
