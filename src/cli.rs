//! Command-line interface for voxturn-sim
//!
//! Provides argument parsing using clap derive macros.

use clap::Parser;
use std::path::PathBuf;

/// Run one scripted voice turn against mock devices
#[derive(Parser, Debug)]
#[command(
    name = "voxturn-sim",
    version,
    about = "Run one scripted voice turn against mock devices"
)]
pub struct SimCli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Reply text the mock model streams back
    #[arg(
        long,
        value_name = "TEXT",
        default_value = "Sure. The weather looks clear today! Anything else?"
    )]
    pub reply: String,

    /// Characters per streamed reply chunk
    #[arg(
        long,
        value_name = "CHARS",
        default_value = "12",
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub chunk_chars: u16,

    /// How long the simulated speaker talks (e.g. 1500ms, 2s)
    #[arg(long, value_name = "DURATION", default_value = "2s", value_parser = parse_millis)]
    pub speech_ms: u64,

    /// Silence that ends the utterance, overriding the configured delay
    #[arg(long, value_name = "DURATION", value_parser = parse_millis)]
    pub silence_ms: Option<u64>,

    /// How long each sentence takes to "play"
    #[arg(long, value_name = "DURATION", default_value = "400ms", value_parser = parse_millis)]
    pub sentence_ms: u64,

    /// Print status snapshots as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Verbose output (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl SimCli {
    /// Reply text cut into chunks of `chunk_chars` characters.
    pub fn reply_chunks(&self) -> Vec<String> {
        let chars: Vec<char> = self.reply.chars().collect();
        chars
            .chunks(usize::from(self.chunk_chars))
            .map(|chunk| chunk.iter().collect())
            .collect()
    }

    /// Default log filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "voxturn=info",
            2 => "voxturn=debug",
            _ => "voxturn=trace",
        }
    }
}

/// Parse a duration string into milliseconds.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`250ms`, `2s`, `1m30s`).
fn parse_millis(s: &str) -> Result<u64, String> {
    let s = s.trim();
    // Bare number → milliseconds
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(s)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .map_err(|e| e.to_string())
}
