//! Microphone session manager
//!
//! Owns the capture device lifecycle and the dedicated audio thread. The
//! cpal stream and the voice detector live on that thread; samples reach
//! it by copy from the device callback and completed segments leave it
//! over a channel. The orchestration loop never touches the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tokio::sync::mpsc;

use crate::audio::vad::{SpeechSegment, VoiceDetector};
use crate::config::VadConfig;
use crate::{Error, Result};

/// Lifecycle state of the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicState {
    /// No device held
    Uninitialized,
    /// Device acquisition in progress
    SettingUp,
    /// Device acquired but not streaming
    Ready,
    /// Actively streaming into the detector
    Open,
}

/// Fixed resampler chunk (frames at the device rate)
const RESAMPLE_CHUNK: usize = 1024;

/// Capture plan decided during setup
#[derive(Debug, Clone)]
struct CapturePlan {
    device_rate: u32,
    channels: u16,
}

/// Microphone session manager
///
/// `setup()` acquires the device, `start()` begins streaming, `stop()`
/// releases the hardware. `stop()` also runs on drop so the device lock
/// is never leaked past the session.
pub struct MicSession {
    vad_config: VadConfig,
    wire_rate: u32,
    state: MicState,
    permission_denied: bool,
    plan: Option<CapturePlan>,
    forwarding: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    audio_thread: Option<JoinHandle<()>>,
    segment_tx: mpsc::UnboundedSender<SpeechSegment>,
}

impl MicSession {
    /// Create a session that emits segments on `segment_tx`
    #[must_use]
    pub fn new(
        vad_config: VadConfig,
        wire_rate: u32,
        segment_tx: mpsc::UnboundedSender<SpeechSegment>,
    ) -> Self {
        Self {
            vad_config,
            wire_rate,
            state: MicState::Uninitialized,
            permission_denied: false,
            plan: None,
            forwarding: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(false)),
            audio_thread: None,
            segment_tx,
        }
    }

    /// Acquire the default input device
    ///
    /// Prefers a mono config at the wire rate; otherwise captures at the
    /// device default and resamples on the audio thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] or [`Error::DeviceUnavailable`];
    /// the state returns to `Uninitialized` on failure.
    #[allow(clippy::unused_async)]
    pub async fn setup(&mut self) -> Result<()> {
        if self.state != MicState::Uninitialized {
            tracing::debug!(state = ?self.state, "setup skipped");
            return Ok(());
        }
        self.state = MicState::SettingUp;
        self.permission_denied = false;

        match probe_input_device(self.wire_rate) {
            Ok(plan) => {
                tracing::debug!(
                    device_rate = plan.device_rate,
                    channels = plan.channels,
                    wire_rate = self.wire_rate,
                    "capture device ready"
                );
                self.plan = Some(plan);
                self.state = MicState::Ready;
                Ok(())
            }
            Err(e) => {
                self.note_setup_failure(&e);
                Err(e)
            }
        }
    }

    /// Record a failed device acquisition: back to `Uninitialized`, with
    /// the permission flag raised for the caller's retry UI
    fn note_setup_failure(&mut self, error: &Error) {
        self.state = MicState::Uninitialized;
        if matches!(error, Error::PermissionDenied(_)) {
            self.permission_denied = true;
        }
    }

    /// Start streaming into the voice detector
    ///
    /// A silent (logged) no-op outside `Ready`.
    pub fn start(&mut self) {
        if self.state != MicState::Ready {
            tracing::warn!(state = ?self.state, "start ignored outside Ready");
            return;
        }
        let Some(plan) = self.plan.clone() else {
            tracing::warn!("start ignored: no capture plan");
            return;
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let forwarding = Arc::clone(&self.forwarding);
        let segment_tx = self.segment_tx.clone();
        let detector = VoiceDetector::new(&self.vad_config, self.wire_rate);
        let wire_rate = self.wire_rate;

        let handle = std::thread::Builder::new()
            .name("cadence-audio".to_string())
            .spawn(move || {
                audio_thread_main(&plan, wire_rate, detector, &running, &forwarding, &segment_tx);
            });

        match handle {
            Ok(h) => {
                self.audio_thread = Some(h);
                self.state = MicState::Open;
                tracing::info!("microphone open");
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "audio thread spawn failed");
            }
        }
    }

    /// Stop streaming and release the device
    ///
    /// Idempotent and safe in any state.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.audio_thread.take() {
            if handle.join().is_err() {
                tracing::error!("audio thread panicked");
            }
        }
        if self.state != MicState::Uninitialized {
            tracing::info!("microphone released");
        }
        self.plan = None;
        self.state = MicState::Uninitialized;
    }

    /// Gate outbound segment emission (sleep / mute)
    ///
    /// The state machine signals through this; it never touches the device.
    pub fn set_forwarding(&self, enabled: bool) {
        self.forwarding.store(enabled, Ordering::SeqCst);
    }

    /// Whether segments are currently forwarded
    #[must_use]
    pub fn is_forwarding(&self) -> bool {
        self.forwarding.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> MicState {
        self.state
    }

    /// UI-facing flag: the last setup failed on permissions
    #[must_use]
    pub const fn permission_denied(&self) -> bool {
        self.permission_denied
    }
}

impl Drop for MicSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Probe the default input device and decide the capture plan
fn probe_input_device(wire_rate: u32) -> Result<CapturePlan> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| classify_device_error(&e.to_string()))?
        .collect();

    // Prefer mono at the wire rate so no resampling is needed
    let exact = configs.iter().find(|c| {
        c.channels() == 1
            && c.min_sample_rate() <= SampleRate(wire_rate)
            && c.max_sample_rate() >= SampleRate(wire_rate)
    });

    if exact.is_some() {
        return Ok(CapturePlan {
            device_rate: wire_rate,
            channels: 1,
        });
    }

    // Fall back to the device default config and resample
    let default = device
        .default_input_config()
        .map_err(|e| classify_device_error(&e.to_string()))?;

    Ok(CapturePlan {
        device_rate: default.sample_rate().0,
        channels: default.channels(),
    })
}

/// Map a cpal error message onto the engine error taxonomy
fn classify_device_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        Error::PermissionDenied(message.to_string())
    } else {
        Error::DeviceUnavailable(message.to_string())
    }
}

/// Audio thread body: owns the cpal stream, resampler, and detector
#[allow(clippy::cast_precision_loss)]
fn audio_thread_main(
    plan: &CapturePlan,
    wire_rate: u32,
    mut detector: VoiceDetector,
    running: &AtomicBool,
    forwarding: &AtomicBool,
    segment_tx: &mpsc::UnboundedSender<SpeechSegment>,
) {
    let (frame_tx, frame_rx) = std_mpsc::channel::<Vec<f32>>();

    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        tracing::error!("input device disappeared before stream start");
        return;
    };

    let config = StreamConfig {
        channels: plan.channels,
        sample_rate: SampleRate(plan.device_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = usize::from(plan.channels);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Downmix to mono by copy; samples never cross by reference
            let mono: Vec<f32> = if channels == 1 {
                data.to_vec()
            } else {
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                    .collect()
            };
            let _ = frame_tx.send(mono);
        },
        |err| {
            tracing::error!(error = %err, "capture stream error");
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to build capture stream");
            return;
        }
    };
    if let Err(e) = stream.play() {
        tracing::error!(error = %e, "failed to start capture stream");
        return;
    }

    let mut resampler = if plan.device_rate == wire_rate {
        None
    } else {
        match ChunkResampler::new(plan.device_rate, wire_rate) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::error!(error = %e, "resampler init failed");
                return;
            }
        }
    };

    while running.load(Ordering::SeqCst) {
        let frame = match frame_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(f) => f,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        };

        if !forwarding.load(Ordering::SeqCst) {
            // Gated: discard audio and keep the detector cold
            detector.reset();
            if let Some(r) = resampler.as_mut() {
                r.clear();
            }
            continue;
        }

        let frame = match resampler.as_mut() {
            Some(r) => r.push(&frame),
            None => frame,
        };
        if frame.is_empty() {
            continue;
        }

        if let Some(emission) = detector.push(&frame) {
            if segment_tx.send(emission.segment).is_err() {
                // Orchestrator gone; nothing left to stream to
                break;
            }
        }
    }

    drop(stream);
    tracing::debug!("audio thread stopped");
}

/// Accumulating wrapper over a fixed-chunk rubato resampler
struct ChunkResampler {
    inner: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl ChunkResampler {
    fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let inner =
            FastFixedIn::new(ratio, 1.0, PolynomialDegree::Linear, RESAMPLE_CHUNK, 1)
                .map_err(|e| Error::Audio(format!("resampler: {e}")))?;
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Feed device-rate samples; returns whatever full chunks produce
    fn push(&mut self, input: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(input);
        let mut out = Vec::new();
        while self.pending.len() >= RESAMPLE_CHUNK {
            let chunk: Vec<f32> = self.pending.drain(..RESAMPLE_CHUNK).collect();
            match self.inner.process(&[chunk], None) {
                Ok(mut frames) => {
                    if let Some(channel) = frames.pop() {
                        out.extend(channel);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "resample failed, dropping chunk");
                }
            }
        }
        out
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Record from the default input device for diagnostics
///
/// Blocking; used by the `test-mic` subcommand, never by the engine loop.
///
/// # Errors
///
/// Returns an error if the device cannot be opened.
#[allow(clippy::cast_precision_loss)]
pub fn record_blocking(seconds: u64, wire_rate: u32) -> Result<Vec<f32>> {
    let plan = probe_input_device(wire_rate)?;
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device".to_string()))?;

    let config = StreamConfig {
        channels: plan.channels,
        sample_rate: SampleRate(plan.device_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = usize::from(plan.channels);

    let buffer = Arc::new(std::sync::Mutex::new(Vec::new()));
    let cb_buffer = Arc::clone(&buffer);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = cb_buffer.lock() {
                    if channels == 1 {
                        buf.extend_from_slice(data);
                    } else {
                        buf.extend(
                            data.chunks(channels)
                                .map(|f| f.iter().sum::<f32>() / f.len() as f32),
                        );
                    }
                }
            },
            |err| tracing::error!(error = %err, "capture error"),
            None,
        )
        .map_err(|e| classify_device_error(&e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    std::thread::sleep(Duration::from_secs(seconds));
    drop(stream);

    let samples = buffer.lock().map(|b| b.clone()).unwrap_or_default();
    if plan.device_rate == wire_rate {
        return Ok(samples);
    }
    let mut resampler = ChunkResampler::new(plan.device_rate, wire_rate)?;
    Ok(resampler.push(&samples))
}
