//! Command handlers.
//!
//! Each handler exposes `execute(...) -> anyhow::Result<()>` (async where it
//! drives the engine): read input, call into `starvoice-tts`, format the
//! result for the terminal.

pub mod chunk;
pub mod speak;

use std::io::Read;

use anyhow::Context;

/// Read a whole input argument: a file path, or `-` for stdin.
pub fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read text from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_read_input_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Hello there.").unwrap();
        let text = read_input(file.path().to_str().unwrap()).unwrap();
        assert_eq!(text, "Hello there.");
    }

    #[test]
    fn test_read_input_missing_file() {
        assert!(read_input("/nonexistent/input.txt").is_err());
    }
}
