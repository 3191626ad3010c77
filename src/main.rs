use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lumen_core::{
    AudioControl, Config, Daemon, EndpointNegotiator, FrameSource, NegotiatorConfig, Pactl,
    PiperSynthesizer, Priority, SAMPLE_RATE, SpeechQueue, Synthesizer,
};

/// Lumen - voice controller for the wearable assistant
#[derive(Parser)]
#[command(name = "lumen", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice controller (default when no subcommand is given)
    Start,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speech output
    TestSpeaker,
    /// Negotiate the bluetooth voice endpoint and exit
    Negotiate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,lumen_core=info",
        1 => "info,lumen_core=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        match cmd {
            Command::Start => {}
            Command::TestMic { duration } => return test_mic(duration),
            Command::TestSpeaker => return test_speaker().await,
            Command::Negotiate => return negotiate().await,
        }
    }

    tracing::info!("starting lumen");

    let config = Config::load();
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config)?;
    daemon.run().await?;

    Ok(())
}

/// Test microphone input
fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into the headset microphone!\n");

    let mut capture = FrameSource::new(None)?;
    capture.start()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        let mut samples: Vec<f32> = Vec::with_capacity(SAMPLE_RATE as usize);
        let second = std::time::Instant::now();
        while second.elapsed() < Duration::from_secs(1) {
            if let Some(frame) = capture.read_frame(Duration::from_millis(200))? {
                samples.extend_from_slice(&frame);
            }
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, the headset mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Run: lumen negotiate (to switch the card to a voice profile)");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: pactl list cards (to inspect bluetooth profiles)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speech output through the full synthesis and playback path
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speech output...");
    println!("You should hear a short spoken phrase\n");

    let config = Config::load();
    let synthesizer: Arc<dyn Synthesizer> = Arc::new(PiperSynthesizer::new(&config.speech)?);
    let control: Arc<dyn AudioControl> = Arc::new(Pactl::new());
    let queue = SpeechQueue::new(synthesizer, control, config.speech.player.clone());

    let token = CancellationToken::new();
    queue.start(token.clone());
    queue.enqueue("This is a test of the Lumen speech output.", Priority::Normal);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !queue.is_idle() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    token.cancel();
    queue.shutdown().await;

    println!("\n---");
    println!("If you heard the phrase, speech output is working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Negotiate the bluetooth voice endpoint and report the capture source
async fn negotiate() -> anyhow::Result<()> {
    let config = Config::load();
    let control: Arc<dyn AudioControl> = Arc::new(Pactl::new());
    let negotiator = EndpointNegotiator::new(
        control,
        NegotiatorConfig {
            voice_profile: config.audio.voice_profile.clone(),
            fallback_profile: config.audio.fallback_profile.clone(),
            unstable_codecs: config.audio.unstable_codecs.clone(),
            ..NegotiatorConfig::default()
        },
    );

    println!("Negotiating bluetooth voice endpoint...");
    let source = negotiator.ensure_input_ready().await?;
    println!("Capture source ready: {source}");

    Ok(())
}
