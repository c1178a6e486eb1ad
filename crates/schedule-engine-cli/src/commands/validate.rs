use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, ValueEnum};
use schedule_engine::validate::{validate_schedule, validate_settings};
use serde_json::Value;

use super::{load_json, Format};
use crate::settings::Settings;

/// Which shape a document is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    /// Options, defaults and events
    Schedule,
    /// Project or user settings
    Settings,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// JSON file to check
    file: PathBuf,

    #[arg(long, value_enum, default_value_t = Kind::Schedule)]
    kind: Kind,

    #[arg(long, value_enum, default_value_t = Format::Summary)]
    format: Format,
}

pub fn run(args: ValidateArgs, _settings: &Settings) -> Result<ExitCode> {
    let document: Value = load_json(&args.file, "file")?;
    let issues = match args.kind {
        Kind::Schedule => validate_schedule(&document),
        Kind::Settings => validate_settings(&document),
    };

    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&issues)?),
        Format::Summary if issues.is_empty() => println!("{}: ok", args.file.display()),
        Format::Summary => {
            for issue in &issues {
                println!("{issue}");
            }
        }
    }

    Ok(if issues.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
