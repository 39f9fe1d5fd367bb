use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lyra_client::audio::{CaptureStream, CpalCapture, FrameReader, Playback, SilenceTracker};
use lyra_client::net::{ConnectionManager, WsTransport};
use lyra_client::{Config, SessionController, wake};

/// Lyra - wake-word voice client for streaming assistant backends
#[derive(Parser)]
#[command(name = "lyra", version, about)]
struct Cli {
    /// Override the backend endpoint URL
    #[arg(long, env = "LYRA_ENDPOINT")]
    endpoint: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input against the silence threshold
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,lyra_client=info",
        1 => "info,lyra_client=debug",
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
    let mut config = Config::from_env();
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration),
            Command::TestSpeaker => test_speaker(&config),
        };
    }

    if config.endpoint_is_placeholder() {
        tracing::warn!(
            endpoint = %config.endpoint,
            "LYRA_ENDPOINT is not set; set it to the backend WebSocket URL, \
             e.g. ws://192.168.1.50:3000"
        );
    }

    tracing::info!(
        endpoint = %config.endpoint,
        wake_word = %config.wake_word,
        sample_rate = config.audio.sample_rate,
        "starting voice client"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let capture = Arc::new(CpalCapture);
    let (connection, events, connection_task) =
        ConnectionManager::spawn(Arc::new(WsTransport), &config, shutdown.clone());
    let trigger = wake::build_trigger_source(&config, capture.clone());

    let controller = SessionController::new(
        config,
        Arc::clone(&connection),
        events,
        trigger,
        capture,
        shutdown.clone(),
    );
    controller.run().await?;

    // Bounded join of the connection task; warn and proceed if it hangs
    if tokio::time::timeout(Duration::from_secs(5), connection_task)
        .await
        .is_err()
    {
        tracing::warn!("connection task did not stop within 5s");
    }

    tracing::info!("shutdown complete");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!(error = %e, "cannot install SIGTERM handler");
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, shutting down"),
        _ = term.recv() => tracing::info!("terminate received, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupt received, shutting down");
    }
}

/// Read frames for a few seconds and print their levels against the
/// configured silence threshold
fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CaptureStream::open(&config.audio)?;
    let silence = SilenceTracker::new(config.silence_threshold, config.silence_duration);

    println!(
        "Sample rate: {} Hz | Silence threshold: {}",
        config.audio.sample_rate, config.silence_threshold
    );
    println!("---");

    let deadline = Instant::now() + Duration::from_secs(duration);
    let mut second_started = Instant::now();
    let mut peak_rms: f64 = 0.0;
    let mut elapsed_secs = 0u64;

    while Instant::now() < deadline {
        let frame = capture.read_frame()?;
        let class = silence.classify(&frame);
        peak_rms = peak_rms.max(class.rms);

        if second_started.elapsed() >= Duration::from_secs(1) {
            elapsed_secs += 1;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = ((peak_rms / 50.0).min(50.0)) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
            let label = if peak_rms < config.silence_threshold {
                "silent"
            } else {
                "voice "
            };
            println!("[{elapsed_secs:2}s] peak RMS: {peak_rms:7.1} | {label} | [{meter}]");
            peak_rms = 0.0;
            second_started = Instant::now();
        }
    }

    capture.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("If normal speech stays below the threshold, lower LYRA_SILENCE_THRESHOLD.");

    Ok(())
}

/// Play a 440 Hz test tone
fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = Playback::open(&config.audio)?;

    let sample_rate = config.audio.sample_rate;
    let frequency = 440.0_f32;
    let num_samples = (sample_rate * 2) as usize;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let value = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3;
            (value * f32::from(i16::MAX)) as i16
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play(&samples)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}
