use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use schedule_engine::batch::ScheduleDocument;
use schedule_engine::layers::{resolve, resolve_all, AttributeSchema, ResolvedValue};
use serde_json::Map;

use super::{load_json, Format};
use crate::settings::Settings;

#[derive(Args)]
pub struct ConfigArgs {
    /// Key to explain, dotted for nested values (all keys when omitted)
    key: Option<String>,

    /// Also consult this schedule file's options and defaults
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Format::Summary)]
    format: Format,
}

pub fn run(args: ConfigArgs, settings: &Settings) -> Result<ExitCode> {
    let mut stack = settings.stack(Map::new());
    if let Some(path) = &args.file {
        let document: ScheduleDocument = load_json(path, "schedule file")?;
        stack = stack.with_layer(document.file_layer());
    }

    match &args.key {
        Some(key) => {
            let resolved = resolve(key, &stack, &AttributeSchema { required: &[] })?;
            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&resolved)?),
                Format::Summary => {
                    println!("{}", describe(&resolved));
                    println!("  consulted: {}", resolved.consulted.join(" > "));
                }
            }
        }
        None => {
            let all = resolve_all(&stack);
            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&all)?),
                Format::Summary => {
                    for resolved in all.values() {
                        println!("{}", describe(resolved));
                    }
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn describe(resolved: &ResolvedValue) -> String {
    match resolved.value.as_value() {
        Some(value) => format!("{} = {value}  ({})", resolved.key, resolved.source_layer),
        None => format!("{} is not set", resolved.key),
    }
}
