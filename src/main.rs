use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use live_bridge::audio::{
    CapturePipeline, CpalOutput, CpalSource, OutputDevice, PlaybackChunk, codec,
};
use live_bridge::config::CapturePolicy;
use live_bridge::{AppEvent, Bridge, Config, DashboardHandle, SessionEvent};

/// Live Bridge - real-time voice session with a multimodal model
#[derive(Parser)]
#[command(name = "live-bridge", version, about)]
struct Cli {
    /// System instructions for the model (overrides config)
    #[arg(short, long, env = "LIVE_BRIDGE_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Prebuilt voice name (overrides config)
    #[arg(long, env = "LIVE_BRIDGE_VOICE")]
    voice: Option<String>,

    /// Run without the microphone (text-only input)
    #[arg(long)]
    no_mic: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input and save the recording as WAV
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Where to write the recording
        #[arg(short, long, default_value = "mic-test.wav")]
        output: std::path::PathBuf,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,live_bridge=info",
        1 => "info,live_bridge=debug",
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
    let mut config = Config::load()?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(&config, duration, &output).await,
            Command::TestSpeaker => test_speaker(&config).await,
        };
    }

    if let Some(instructions) = cli.instructions {
        config.persona.instructions = instructions;
    }
    if let Some(voice) = cli.voice {
        config.persona.voice = voice;
    }
    if cli.no_mic {
        config.session.capture = CapturePolicy::Disabled;
    }

    tracing::debug!(?config, "loaded configuration");

    let dashboard = DashboardHandle::default();
    let bridge = Bridge::new(config, dashboard.clone())?;

    let mut events = bridge.subscribe();
    let mut app_events = dashboard.subscribe().await;

    let session = bridge.connect().await?;
    tracing::info!(session_id = %session.id(), "live bridge ready - start talking");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, closing session");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Closed { reason }) => {
                    tracing::info!(%reason, "session closed");
                    break;
                }
                Ok(event) => log_session_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            event = app_events.recv() => {
                if let Ok(event) = event {
                    log_app_event(&event);
                }
            }
        }
    }

    bridge.disconnect().await;

    let snapshot = bridge.snapshot();
    if let Some(error) = snapshot.last_error {
        anyhow::bail!("session ended with error: {error}");
    }
    Ok(())
}

fn log_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::TextReceived { text, transcript } => {
            tracing::info!(transcript, "model: {text}");
        }
        SessionEvent::ToolCallReceived(request) => {
            tracing::info!(id = %request.id, name = %request.name, "tool call");
        }
        SessionEvent::Interrupted => tracing::info!("model interrupted"),
        SessionEvent::Error { message, fatal } => {
            tracing::warn!(fatal, "session error: {message}");
        }
        SessionEvent::AudioChunkReceived { span } => {
            tracing::trace!(start = ?span.start, end = ?span.end, "audio scheduled");
        }
        SessionEvent::TurnComplete | SessionEvent::Closed { .. } => {
            tracing::debug!(?event, "session event");
        }
    }
}

fn log_app_event(event: &AppEvent) {
    match event {
        AppEvent::Tone(tone) => tracing::info!(sentiment = %tone.sentiment, "tone"),
        AppEvent::ModeChanged { mode } => tracing::info!(%mode, "display mode changed"),
        AppEvent::PrivacySuggestion { level } => {
            tracing::info!(level, "loud environment - consider privacy mode");
        }
        AppEvent::ScanAlert { summary } => tracing::warn!("ambient scan: {summary}"),
        other => tracing::debug!(event = ?other, "dashboard event"),
    }
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64, output: &std::path::Path) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let pipeline = CapturePipeline::new(Arc::new(CpalSource), config.audio.clone());
    let mut stream = pipeline.start().await?;

    let sample_rate = config.audio.capture_sample_rate;
    println!("Capture rate: {sample_rate} Hz");
    println!("---");

    let mut recorded: Vec<f32> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut second_peak = 0.0_f32;
    let mut next_report = tokio::time::Instant::now() + Duration::from_secs(1);
    let mut elapsed = 0_u64;

    loop {
        let captured = tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            captured = stream.next_frame() => captured,
        };
        let Some(captured) = captured else { break };

        second_peak = second_peak.max(captured.volume.level);
        recorded.extend(
            captured
                .frame
                .samples
                .iter()
                .map(|&s| f32::from(s) / f32::from(i16::MAX)),
        );

        if tokio::time::Instant::now() >= next_report {
            elapsed += 1;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (second_peak * 100.0).min(50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
            println!("[{elapsed:2}s] RMS: {second_peak:.4} | [{meter}]");
            second_peak = 0.0;
            next_report += Duration::from_secs(1);
        }
    }

    stream.stop().await;

    let wav = codec::samples_to_wav(&recorded, sample_rate)?;
    std::fs::write(output, wav)?;

    println!("\n---");
    println!("Wrote {} samples to {}", recorded.len(), output.display());
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let opened = tokio::task::spawn_blocking(|| CpalOutput.open()).await??;
    let (mut scheduler, mut guard) = opened.into_scheduler(config.audio.playback_sample_rate);

    let sample_rate = config.audio.playback_sample_rate;
    let frequency = 440.0_f32;

    // Four 500ms chunks back to back exercise gapless scheduling
    for chunk_index in 0..4_u32 {
        let per_chunk = sample_rate / 2;
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..per_chunk)
            .map(|i| {
                let t = (chunk_index * per_chunk + i) as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
            })
            .collect();
        let span = scheduler.enqueue_chunk(&PlaybackChunk::new(samples, sample_rate));
        println!("Chunk {chunk_index}: {:?} -> {:?}", span.start, span.end);
    }

    while scheduler.is_playing() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    scheduler.stop();
    guard.release_async().await;

    println!("\n---");
    println!("If you heard one continuous tone, playback is working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
