//! Main CLI parser and top-level argument handling.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Read text aloud through a streaming speech synthesizer.
#[derive(Parser)]
#[command(name = "starvoice")]
#[command(about = "Stream text to speech with gapless playback")]
#[command(version)]
pub struct Cli {
    /// JSON file with `engine` and `synthesizer` sections
    #[arg(long, global = true, env = "STARVOICE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Speech endpoint URL (overrides config and STARVOICE_TTS_ENDPOINT)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Voice identifier sent to the backend
    #[arg(long, global = true)]
    pub voice: Option<String>,

    /// Backend model name
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
