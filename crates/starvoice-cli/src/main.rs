//! CLI entry point - the composition root.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use starvoice_cli::{Cli, Commands, handlers, load_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Chunk {
            input,
            max_chars,
            json,
        } => handlers::chunk::execute(&config, &input, max_chars, json)?,
        Commands::Speak { input, out, id } => {
            handlers::speak::execute(&config, &input, out, id).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` selects debug for our crates.
fn init_logging(verbose: bool) {
    let default = if verbose {
        "starvoice_tts=debug,starvoice_cli=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}
