//! Audio capture, detection, scheduling, and PCM conversion
//!
//! The capture and playback devices each live on a dedicated thread; the
//! orchestration loop reaches them only through channels and the shared
//! schedule lock.

pub mod codec;

mod capture;
mod playback;
mod vad;

pub use capture::{MicSession, MicState, record_blocking};
pub use playback::{PlaybackScheduler, SourceHandle};
pub use vad::{Emission, SegmentKind, SpeechSegment, VoiceDetector};
