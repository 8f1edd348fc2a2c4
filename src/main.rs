use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use beacon_live::session::{SessionView, TranscriptEntry};
use beacon_live::voice::{
    DeviceOutput, InputDevice, MicrophoneCapture, OutputClock, PLAYBACK_SAMPLE_RATE,
    PlaybackScheduler, calculate_rms, samples_to_wav,
};
use beacon_live::{
    Config, CpalBackend, GeminiConnector, SessionEngine, SessionSetup, SystemActions,
    TranscriptStore,
};

/// Beacon Live - hands-free voice sessions with a multimodal model
#[derive(Parser)]
#[command(name = "beacon-live", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Start a session immediately instead of waiting for `start`
    #[arg(long)]
    auto_start: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the recording as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// Inspect the saved conversation
    Transcript {
        #[command(subcommand)]
        action: TranscriptAction,
    },
}

#[derive(Subcommand)]
enum TranscriptAction {
    /// Print the saved conversation
    Show,
    /// Delete the saved conversation
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,beacon_live=info",
        1 => "info,beacon_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output).await,
            Command::TestSpeaker => test_speaker().await,
            Command::Transcript { action } => transcript(&action),
        };
    }

    let mut config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let api_key = config
        .remote
        .api_key
        .take()
        .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY is not set"))?;

    let connector = GeminiConnector::new(config.remote.endpoint.clone(), api_key);
    let (engine, handle) = SessionEngine::new(
        config.session,
        SessionSetup::from(&config.remote),
        Arc::new(CpalBackend),
        Arc::new(connector),
        Arc::new(SystemActions),
        TranscriptStore::open(&config.transcript_path),
    );
    let engine_task = engine.spawn();

    let mut view = handle.subscribe();
    let printer = tokio::spawn(async move {
        let mut last = view.borrow_and_update().clone();
        print_transcript(&last.transcript);
        println!("{}", last.status.label());
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            print_changes(&last, &current);
            last = current;
        }
    });

    println!("Commands: start, stop, camera, clear, quit");
    if cli.auto_start {
        handle.start()?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "start" => handle.start()?,
                    "stop" => handle.stop()?,
                    "camera" => handle.toggle_camera()?,
                    "clear" => handle.clear_transcript()?,
                    "quit" | "exit" => break,
                    other => println!("unknown command: {other}"),
                }
            }
        }
    }

    handle.shutdown()?;
    engine_task.await?;
    printer.abort();
    Ok(())
}

fn print_changes(last: &SessionView, current: &SessionView) {
    if current.status != last.status {
        println!("{}", current.status.label());
    }
    if current.emotion != last.emotion {
        println!("  mood: {}", current.emotion);
    }
    if current.camera_on != last.camera_on {
        println!("  camera {}", if current.camera_on { "on" } else { "off" });
    }
    if current.transcript.len() > last.transcript.len()
        && current.transcript.starts_with(&last.transcript)
    {
        print_transcript(&current.transcript[last.transcript.len()..]);
    } else if current.transcript.is_empty() && !last.transcript.is_empty() {
        println!("  (transcript cleared)");
    }
}

fn print_transcript(entries: &[TranscriptEntry]) {
    for entry in entries {
        println!("{:>5}: {}", entry.speaker, entry.text);
    }
}

/// Show or clear the saved conversation
fn transcript(action: &TranscriptAction) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = TranscriptStore::open(&config.transcript_path);

    match action {
        TranscriptAction::Show => {
            let entries = store.load();
            if entries.is_empty() {
                println!("No saved conversation at {}", config.transcript_path.display());
            }
            for entry in entries {
                println!(
                    "[{}] {:>5}: {}",
                    entry.at.format("%Y-%m-%d %H:%M"),
                    entry.speaker,
                    entry.text
                );
            }
        }
        TranscriptAction::Clear => {
            store.clear()?;
            println!("Cleared {}", config.transcript_path.display());
        }
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut capture = tokio::task::spawn_blocking(move || MicrophoneCapture::open(1024, tx)).await??;
    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            samples.extend(frame);
        }
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
        recording.extend(samples);
    }

    capture.release()?;

    if let Some(path) = output {
        let wav = samples_to_wav(&recording, sample_rate)?;
        std::fs::write(&path, wav)?;
        println!("Saved {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a tone split into back-to-back chunks
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds without gaps\n");

    let clock: Arc<dyn OutputClock> = Arc::new(tokio::task::spawn_blocking(DeviceOutput::open).await??);
    let mut scheduler = PlaybackScheduler::new(Arc::clone(&clock));

    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let rate = PLAYBACK_SAMPLE_RATE as f32;
    let chunk_len = PLAYBACK_SAMPLE_RATE as usize / 4;

    #[allow(clippy::cast_precision_loss)]
    for chunk in 0..8 {
        let samples: Vec<f32> = (0..chunk_len)
            .map(|i| {
                let t = (chunk * chunk_len + i) as f32 / rate;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
            })
            .collect();
        scheduler.schedule_samples(samples, PLAYBACK_SAMPLE_RATE)?;
    }

    println!("Playing {:.2}s of audio...", scheduler.remaining().as_secs_f32());
    tokio::time::sleep(scheduler.remaining() + Duration::from_millis(200)).await;
    clock.close()?;

    println!("\n---");
    println!("If you heard a steady tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
