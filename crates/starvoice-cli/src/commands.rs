//! Subcommands.

use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Show how text would be split into synthesis segments
    Chunk {
        /// Text file to read, or "-" for stdin
        input: String,

        /// Maximum characters per segment
        #[arg(long)]
        max_chars: Option<usize>,

        /// Print one JSON object per segment
        #[arg(long)]
        json: bool,
    },

    /// Synthesize text and play it (or render it with --out)
    Speak {
        /// Text file to read, or "-" for stdin
        input: String,

        /// Render to this WAV file instead of the sound card
        #[arg(long)]
        out: Option<PathBuf>,

        /// Session id reported in engine state
        #[arg(long, default_value = "cli")]
        id: String,
    },
}
