use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use voxturn::cli::SimCli;
use voxturn::config::Config;
use voxturn::{
    MockCaptureProvider, MockExchangeClient, MockSynthesizer, StatusSnapshot, TurnController,
    TurnId, TurnStatus,
};

/// Amplitude of the simulated speaker, well above the default threshold.
const SPEECH_LEVEL: u8 = 120;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SimCli::parse();
    init_logging(&cli);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(silence) = cli.silence_ms {
        config.detector.silence_delay_ms = silence;
    }
    config.validate().context("invalid configuration")?;

    let chunks = cli.reply_chunks();
    let chunk_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();

    let capture = MockCaptureProvider::new()
        .with_level(Duration::from_millis(cli.speech_ms), SPEECH_LEVEL);
    let exchange = Arc::new(MockExchangeClient::new(&chunk_refs));
    let synth = MockSynthesizer::new().with_duration(Duration::from_millis(cli.sentence_ms));
    let (_prefs_tx, prefs_rx) = watch::channel(config.voice.clone());

    let (controller, handle) = TurnController::new(
        config.turn_config(),
        Box::new(capture),
        exchange,
        Arc::new(synth.clone()),
        prefs_rx,
    );
    let task = controller.spawn();

    let mut status = handle.subscribe();
    handle.start()?;

    loop {
        status
            .changed()
            .await
            .context("turn controller stopped unexpectedly")?;
        let snapshot = status.borrow_and_update().clone();
        print_snapshot(&snapshot, cli.json)?;
        if snapshot.turn == TurnId(1) && snapshot.status == TurnStatus::Idle {
            break;
        }
    }

    drop(handle);
    task.await.context("turn controller panicked")?;

    if !cli.json {
        println!("spoke {} sentence(s):", synth.finished().len());
        for sentence in synth.finished() {
            println!("  {}", sentence);
        }
    }
    Ok(())
}

fn init_logging(cli: &SimCli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        // Load from custom path
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        // Try default path, fall back to defaults
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

fn print_snapshot(snapshot: &StatusSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", snapshot.to_json()?);
    } else {
        let mic = if snapshot.recording { " [mic]" } else { "" };
        println!(
            "{} {:<10} {}{}",
            snapshot.turn,
            snapshot.status.to_string(),
            snapshot.message.text(),
            mic
        );
    }
    Ok(())
}
