//! Configuration loading for the CLI.
//!
//! Precedence, lowest first: built-in defaults, `STARVOICE_TTS_*`
//! environment variables, the `--config` JSON file, command-line flags.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use starvoice_tts::{EngineConfig, HttpSynthesizerConfig};

use crate::parser::Cli;

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub synthesizer: HttpSynthesizerConfig,
}

/// On-disk layout; either section may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    engine: Option<EngineConfig>,
    synthesizer: Option<HttpSynthesizerConfig>,
}

pub fn load_config(cli: &Cli) -> anyhow::Result<CliConfig> {
    let mut config = CliConfig {
        engine: EngineConfig::default(),
        synthesizer: HttpSynthesizerConfig::from_env(),
    };

    if let Some(path) = &cli.config {
        let file = read_config_file(path)?;
        if let Some(engine) = file.engine {
            config.engine = engine;
        }
        if let Some(synthesizer) = file.synthesizer {
            config.synthesizer = HttpSynthesizerConfig {
                // A key from the environment survives a file without one.
                api_key: synthesizer.api_key.or(config.synthesizer.api_key),
                ..synthesizer
            };
        }
    }

    apply_flags(&mut config, cli);
    config.engine.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

fn apply_flags(config: &mut CliConfig, cli: &Cli) {
    if let Some(endpoint) = &cli.endpoint {
        config.synthesizer.endpoint.clone_from(endpoint);
    }
    if let Some(voice) = &cli.voice {
        config.synthesizer.voice.clone_from(voice);
    }
    if let Some(model) = &cli.model {
        config.synthesizer.model.clone_from(model);
    }
}
