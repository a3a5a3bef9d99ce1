use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_voice::audio::{self, PlaybackScheduler, codec};
use cadence_voice::{Config, EngineUpdate, VoiceEngine};

/// Cadence - Real-time voice conversation engine for AI agents
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a voice session against the configured agent
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the recording to this WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output with a short tone
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cadence_voice=info",
        1 => "info,cadence_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_session(config).await,
        Command::TestMic { duration, output } => test_mic(&config, duration, output),
        Command::TestSpeaker => test_speaker(&config),
    }
}

/// Run a full voice session until interrupted
async fn run_session(config: Config) -> anyhow::Result<()> {
    let engine = VoiceEngine::new(config);
    let handle = engine.handle();
    let mut updates = handle.subscribe();

    // Ctrl-C stops the session
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            shutdown_handle.shutdown();
        }
    });

    // Narrate updates so a terminal session is observable
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            match update {
                EngineUpdate::Status(status) => tracing::info!(?status, "conversation"),
                EngineUpdate::Connection(state) => tracing::info!(?state, "connection"),
                EngineUpdate::Transcript(entry) => tracing::info!(?entry, "transcript"),
                EngineUpdate::PermissionDenied => {
                    tracing::error!("microphone permission denied - grant access and retry");
                }
                EngineUpdate::RateLimited => {
                    tracing::error!("reconnect attempts exhausted - check the agent and retry");
                }
                EngineUpdate::Warning(message) => tracing::warn!(%message, "agent warning"),
                EngineUpdate::AgentError { code, message } => {
                    tracing::warn!(?code, %message, "agent error");
                }
            }
        }
    });

    engine.run().await?;
    Ok(())
}

/// Record from the default microphone and report levels
fn test_mic(config: &Config, duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let rate = config.audio.capture_sample_rate;
    println!("Recording {duration}s from the default microphone...");

    let samples = audio::record_blocking(duration, rate)?;

    #[allow(clippy::cast_precision_loss)]
    let rms = if samples.is_empty() {
        0.0
    } else {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    };
    let peak = samples.iter().fold(0.0f32, |a, s| a.max(s.abs()));
    println!("Captured {} samples (rms {rms:.4}, peak {peak:.4})", samples.len());

    if let Some(path) = output {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in codec::quantize(&samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        println!("Wrote {}", path.display());
    }

    Ok(())
}

/// Play a short tone through the playback scheduler
fn test_speaker(config: &Config) -> anyhow::Result<()> {
    let rate = config.audio.playback_sample_rate;
    println!("Playing a 440 Hz tone...");

    let mut scheduler = PlaybackScheduler::new(rate);
    scheduler.start()?;

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..rate)
        .map(|i| {
            let t = i as f32 / rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    scheduler.enqueue(&codec::to_wire(&codec::quantize(&tone)));

    std::thread::sleep(Duration::from_millis(1500));
    scheduler.stop();
    println!("Done");
    Ok(())
}
