//! Playback scheduler for synthesized audio
//!
//! Inbound PCM frames become scheduled sources on a single sample clock.
//! Each source starts no earlier than the current clock and no earlier
//! than the end of the last scheduled source, so playback is gapless and
//! never overlapping. `cancel_all` drops every queued and playing source
//! at once (the barge-in path).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::audio::codec;
use crate::{Error, Result};

/// Handle to one scheduled source
pub type SourceHandle = u64;

/// One queued or playing audio segment
#[derive(Debug)]
struct ScheduledSource {
    #[allow(dead_code)]
    handle: SourceHandle,
    /// Absolute start position on the sample clock
    start: u64,
    samples: Vec<f32>,
}

impl ScheduledSource {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Shared schedule state, advanced by the output callback
#[derive(Debug, Default)]
struct Schedule {
    /// Samples rendered since the stream started
    clock: u64,
    sources: VecDeque<ScheduledSource>,
    next_handle: SourceHandle,
}

impl Schedule {
    /// Queue samples at `max(clock, last_end)` and return the handle
    fn push(&mut self, samples: Vec<f32>) -> (SourceHandle, u64) {
        let last_end = self.sources.back().map(ScheduledSource::end);
        let start = next_start(self.clock, last_end);
        let handle = self.next_handle;
        self.next_handle += 1;
        self.sources.push_back(ScheduledSource {
            handle,
            start,
            samples,
        });
        (handle, start)
    }

    /// Render into an interleaved output buffer, advancing the clock
    fn fill(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels) {
            let sample = self.next_sample();
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }
    }

    fn next_sample(&mut self) -> f32 {
        let pos = self.clock;
        self.clock += 1;

        while let Some(front) = self.sources.front() {
            if pos >= front.end() {
                self.sources.pop_front();
                continue;
            }
            if pos < front.start {
                // Gap before the next scheduled source
                return 0.0;
            }
            #[allow(clippy::cast_possible_truncation)]
            let offset = (pos - front.start) as usize;
            return front.samples[offset];
        }
        0.0
    }

    fn cancel_all(&mut self) -> usize {
        let dropped = self.sources.len();
        self.sources.clear();
        dropped
    }
}

/// Playback scheduler
///
/// The output stream lives on its own thread; the orchestration loop
/// only ever locks the schedule to queue or cancel.
pub struct PlaybackScheduler {
    sample_rate: u32,
    schedule: Arc<Mutex<Schedule>>,
    running: Arc<AtomicBool>,
    playback_thread: Option<JoinHandle<()>>,
}

impl PlaybackScheduler {
    /// Create a scheduler for the inbound sample rate
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            schedule: Arc::new(Mutex::new(Schedule::default())),
            running: Arc::new(AtomicBool::new(false)),
            playback_thread: None,
        }
    }

    /// Open the output device and start the render thread
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no output device supports
    /// the playback rate in mono or stereo.
    pub fn start(&mut self) -> Result<()> {
        if self.playback_thread.is_some() {
            return Ok(());
        }

        // Probe up front so failure surfaces to the caller, not the thread
        let channels = probe_output_channels(self.sample_rate)?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let schedule = Arc::clone(&self.schedule);
        let sample_rate = self.sample_rate;

        let handle = std::thread::Builder::new()
            .name("cadence-playback".to_string())
            .spawn(move || {
                playback_thread_main(sample_rate, channels, &schedule, &running);
            })
            .map_err(|e| Error::Audio(format!("playback thread spawn: {e}")))?;

        self.playback_thread = Some(handle);
        tracing::debug!(sample_rate = self.sample_rate, channels, "playback started");
        Ok(())
    }

    /// Decode a wire frame and schedule it for gapless playback
    ///
    /// Malformed frames (empty or odd length) are logged and dropped
    /// without touching the schedule.
    pub fn enqueue(&self, frame: &[u8]) -> Option<SourceHandle> {
        let Some(quantized) = codec::from_wire(frame) else {
            tracing::warn!(bytes = frame.len(), "dropping undecodable audio frame");
            return None;
        };
        let samples = codec::dequantize(&quantized);

        let mut schedule = self.schedule.lock().ok()?;
        let (handle, start) = schedule.push(samples);
        tracing::trace!(handle, start, "audio frame scheduled");
        Some(handle)
    }

    /// Stop and release every queued and playing source
    ///
    /// Safe to call repeatedly and from any state.
    pub fn cancel_all(&self) {
        if let Ok(mut schedule) = self.schedule.lock() {
            let dropped = schedule.cancel_all();
            if dropped > 0 {
                tracing::debug!(dropped, "playback cancelled");
            }
        }
    }

    /// Number of sources still queued or playing
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.schedule.lock().map_or(0, |s| s.sources.len())
    }

    /// Release the output device
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.playback_thread.take() {
            if handle.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start time law: no earlier than now, no earlier than the last end
const fn next_start(clock: u64, last_end: Option<u64>) -> u64 {
    match last_end {
        Some(end) if end > clock => end,
        _ => clock,
    }
}

/// Find a mono (or stereo fallback) output config at the given rate
fn probe_output_channels(sample_rate: u32) -> Result<u16> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

    let supports = |wanted: u16| {
        device.supported_output_configs().ok().and_then(|mut configs| {
            configs.find(|c| {
                c.channels() == wanted
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
    };

    if supports(1).is_some() {
        Ok(1)
    } else if supports(2).is_some() {
        Ok(2)
    } else {
        Err(Error::DeviceUnavailable(format!(
            "no output config at {sample_rate} Hz"
        )))
    }
}

/// Render thread body: owns the cpal output stream
fn playback_thread_main(
    sample_rate: u32,
    channels: u16,
    schedule: &Arc<Mutex<Schedule>>,
    running: &AtomicBool,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        tracing::error!("output device disappeared before stream start");
        return;
    };

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let cb_schedule = Arc::clone(schedule);
    let cb_channels = usize::from(channels);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if let Ok(mut schedule) = cb_schedule.lock() {
                schedule.fill(data, cb_channels);
            } else {
                data.fill(0.0);
            }
        },
        |err| {
            tracing::error!(error = %err, "playback stream error");
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to build output stream");
            return;
        }
    };
    if let Err(e) = stream.play() {
        tracing::error!(error = %e, "failed to start output stream");
        return;
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    tracing::debug!("playback thread stopped");
}
