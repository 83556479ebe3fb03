//! Logging setup for the command-line tool.
//!
//! Output goes to stdout, stderr or a file, chosen by the `--log` switch:
//! `0`/`off`, `1`/`stdout`, `2`/`stderr` or a file name (appended to).
//! `RUST_LOG` overrides the level picked by `--verbose`.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Where log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Off,
    Stdout,
    Stderr,
    File(String),
}

impl LogOutput {
    pub fn parse(value: &str) -> Self {
        match value {
            "0" | "off" => LogOutput::Off,
            "1" | "stdout" => LogOutput::Stdout,
            "2" | "stderr" => LogOutput::Stderr,
            filename => LogOutput::File(filename.to_string()),
        }
    }
}

fn filter(verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber.
pub fn init(output: &str, verbose: bool) -> Result<()> {
    match LogOutput::parse(output) {
        LogOutput::Off => {}
        LogOutput::Stdout => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogOutput::Stderr => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogOutput::File(filename) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&filename)
                .with_context(|| format!("failed to open log file {filename}"))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
