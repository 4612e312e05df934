//! `starvoice speak`: synthesize text and play or render it.

use std::path::PathBuf;
use std::sync::Arc;

use starvoice_tts::{
    EngineState, HttpSynthesizer, OutputDevice, PlayOutcome, RenderDevice, SpeechEngine,
};

use crate::bootstrap::CliConfig;

pub async fn execute(
    config: &CliConfig,
    input: &str,
    out: Option<PathBuf>,
    id: String,
) -> anyhow::Result<()> {
    let text = super::read_input(input)?;
    let device = output_device(out.clone())?;
    let synthesizer = Arc::new(HttpSynthesizer::new(config.synthesizer.clone())?);
    let engine = SpeechEngine::new(config.engine.clone(), synthesizer, device)?;

    // Ctrl-C stops playback; the wait below then sees Idle and returns.
    let stopper = engine.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping playback");
            stopper.stop();
        }
    });

    let mut state = engine.subscribe();
    let outcome = engine.play(&text, id).await;
    let result = match outcome {
        Ok(PlayOutcome::Empty) => {
            eprintln!("Nothing to speak.");
            Ok(())
        }
        Ok(PlayOutcome::Scheduled {
            segments,
            skipped,
            duration,
        }) => {
            eprintln!(
                "Scheduled {segments} segment(s), {:.1}s of audio{}",
                duration.as_secs_f64(),
                if skipped > 0 {
                    format!(", {skipped} skipped")
                } else {
                    String::new()
                }
            );
            state
                .wait_for(|s| matches!(s, EngineState::Idle | EngineState::Error { .. }))
                .await?;
            if let Some(path) = out {
                println!("{}", path.display());
            }
            Ok(())
        }
        Ok(PlayOutcome::Superseded | PlayOutcome::Stopped) => Ok(()),
        Err(e) => Err(e.into()),
    };

    signal.abort();
    result
}

fn output_device(out: Option<PathBuf>) -> anyhow::Result<Arc<dyn OutputDevice>> {
    if let Some(path) = out {
        return Ok(Arc::new(RenderDevice::to_file(path)));
    }
    local_device()
}

#[cfg(feature = "local-audio")]
fn local_device() -> anyhow::Result<Arc<dyn OutputDevice>> {
    Ok(Arc::new(starvoice_tts::device::local::LocalOutputDevice))
}

#[cfg(not(feature = "local-audio"))]
fn local_device() -> anyhow::Result<Arc<dyn OutputDevice>> {
    anyhow::bail!("built without the `local-audio` feature; pass --out FILE.wav to render instead")
}
