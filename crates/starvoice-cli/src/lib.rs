#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

//! Command-line front end for `starvoice-tts`.
//!
//! `main.rs` is the composition root: it parses arguments, loads
//! configuration through [`bootstrap`], and dispatches to [`handlers`].

#[cfg(test)]
use tempfile as _;

// Used only by the binary target.
use dotenvy as _;
use tracing_subscriber as _;

pub mod bootstrap;
pub mod commands;
pub mod handlers;
pub mod parser;

pub use bootstrap::{CliConfig, load_config};
pub use commands::Commands;
pub use parser::Cli;
