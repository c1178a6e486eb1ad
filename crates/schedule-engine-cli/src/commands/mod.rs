pub mod config;
pub mod generate;
pub mod plan;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::de::DeserializeOwned;

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable lines
    Summary,
    /// Pretty-printed JSON
    Json,
}

/// Read and deserialize a JSON file, naming `what` in errors.
pub fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {what} {}", path.display()))
}
