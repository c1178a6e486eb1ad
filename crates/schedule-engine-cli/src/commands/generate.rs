use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDate};
use clap::Args;
use schedule_engine::normalize::parse_duration_str;
use schedule_engine::pattern;
use schedule_engine::recurrence::{generate, Bound};
use schedule_engine::template::build_template;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::settings::Settings;

/// Number of dates generated when neither `--count` nor `--end` is given.
const DEFAULT_COUNT: usize = 12;

#[derive(Args)]
pub struct GenerateArgs {
    /// Recurrence pattern, e.g. "first Thursday" or "first Thursday after first Tuesday"
    pattern: String,

    /// First date to consider: YYYY-MM-DD, today or tomorrow [default: today]
    #[arg(long, value_name = "DATE", value_parser = parse_start)]
    start: Option<NaiveDate>,

    /// Number of events to generate [default: 12 unless --end is given]
    #[arg(short = 'n', long, conflicts_with = "end")]
    count: Option<usize>,

    /// Generate events strictly before this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    end: Option<NaiveDate>,

    /// Group URL name written to the template defaults
    #[arg(long, value_name = "URLNAME")]
    group: Option<String>,

    /// Named series whose settings block seeds the template defaults
    #[arg(long, value_name = "NAME")]
    series: Option<String>,

    /// Event duration, e.g. 90, 2h or 1h30m
    #[arg(long)]
    duration: Option<String>,

    /// Start time for every event (HH:MM or HH:MM:SS)
    #[arg(long, value_name = "TIME")]
    time: Option<String>,

    /// Print only the dates, one per line
    #[arg(long)]
    dates_only: bool,

    /// Write to this file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

pub fn run(args: GenerateArgs, settings: &Settings) -> Result<ExitCode> {
    let rule = pattern::parse(&args.pattern)?;
    let count = match (args.count, args.end) {
        (None, None) => Some(DEFAULT_COUNT),
        (count, _) => count,
    };
    let bound = Bound::from_options(count, args.end)?;
    let start = args.start.unwrap_or_else(today);

    let dates: Vec<NaiveDate> = generate(&rule, start, bound).collect();
    info!(%rule, %start, dates = dates.len(), "generated dates");

    let text = if args.dates_only {
        dates
            .iter()
            .map(|date| format!("{date}\n"))
            .collect::<String>()
    } else {
        let mut defaults = settings.defaults_block();
        if let Some(name) = &args.series {
            match settings.series(name) {
                Some(block) => {
                    for (key, value) in block {
                        defaults.insert(key.clone(), value.clone());
                    }
                }
                None => warn!(series = %name, "no settings for series"),
            }
            defaults.insert("series".to_string(), json!(name));
        }
        if let Some(group) = args.group {
            defaults.insert("groupUrlname".to_string(), Value::String(group));
        }
        if let Some(duration) = &args.duration {
            let minutes = match duration.trim().parse::<u32>() {
                Ok(minutes) if minutes > 0 => minutes,
                _ => parse_duration_str(duration)?,
            };
            defaults.insert("duration".to_string(), json!(minutes));
        }
        if let Some(time) = args.time {
            defaults.insert("defaultTime".to_string(), Value::String(time));
        }

        let template = build_template(&dates, defaults);
        let mut json = serde_json::to_string_pretty(&template)?;
        json.push('\n');
        json
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "wrote schedule template");
        }
        None => std::io::stdout().write_all(text.as_bytes())?,
    }
    Ok(ExitCode::SUCCESS)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// `YYYY-MM-DD`, `today` or `tomorrow`.
fn parse_start(text: &str) -> Result<NaiveDate, String> {
    match text.trim().to_lowercase().as_str() {
        "today" => Ok(today()),
        "tomorrow" => today()
            .checked_add_days(Days::new(1))
            .ok_or_else(|| "tomorrow is out of range".to_string()),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
            .map_err(|_| format!("invalid date '{text}': use YYYY-MM-DD, today or tomorrow")),
    }
}
