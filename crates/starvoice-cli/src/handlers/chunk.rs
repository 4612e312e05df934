//! `starvoice chunk`: preview segmentation without synthesizing anything.

use starvoice_tts::{Chunker, Segment};

use crate::bootstrap::CliConfig;

pub fn execute(
    config: &CliConfig,
    input: &str,
    max_chars: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let text = super::read_input(input)?;
    let chunker = Chunker::new(max_chars.unwrap_or(config.engine.max_chunk_chars));
    let segments = chunker.chunk(text.as_str());

    if segments.is_empty() {
        eprintln!("Nothing to speak.");
        return Ok(());
    }

    for segment in &segments {
        println!("{}", render(segment, json)?);
    }
    if !json {
        println!();
        println!(
            "{} segment(s), max {} chars",
            segments.len(),
            chunker.max_chars()
        );
    }
    Ok(())
}

fn render(segment: &Segment, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(segment)?);
    }
    Ok(format!(
        "[{:>3}] ({:>3} chars) {}",
        segment.index,
        segment.char_len(),
        segment.text
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_and_json() {
        let segment = Segment {
            index: 2,
            text: "Hello world.".into(),
        };
        assert_eq!(render(&segment, false).unwrap(), "[  2] ( 12 chars) Hello world.");
        assert_eq!(
            render(&segment, true).unwrap(),
            r#"{"index":2,"text":"Hello world."}"#
        );
    }
}
