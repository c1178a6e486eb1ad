use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;
use schedule_engine::batch::{run_to_completion, BatchReport, ScheduleDocument, ScheduleRun};
use schedule_engine::conflict::{
    ConflictDecision, ConflictPrompt, PromptResponse, ScheduledEventIndex,
};
use schedule_engine::validate::validate_schedule;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{load_json, Format};
use crate::settings::Settings;

/// Exit status when the batch stopped before its last event.
const EXIT_HALTED: u8 = 2;

#[derive(Args)]
pub struct PlanArgs {
    /// Schedule file with options, defaults and events
    file: PathBuf,

    /// JSON array of events that already exist
    #[arg(long, value_name = "PATH")]
    existing: Option<PathBuf>,

    /// What to do when an event collides with an existing one
    #[arg(long, value_name = "POLICY", value_parser = ["error", "skip", "update", "prompt"])]
    on_conflict: Option<String>,

    /// Whether events are tagged with their series name
    #[arg(long, value_name = "MODE", value_parser = ["link", "independent"])]
    series_mode: Option<String>,

    #[arg(long, value_enum, default_value_t = Format::Summary)]
    format: Format,
}

pub fn run(args: PlanArgs, settings: &Settings) -> Result<ExitCode> {
    let raw: Value = load_json(&args.file, "schedule file")?;
    let mut issues: Vec<String> = validate_schedule(&raw)
        .into_iter()
        .map(|issue| format!("{}: {issue}", args.file.display()))
        .collect();
    issues.extend(settings.issues());
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("{issue}");
        }
        bail!("{} validation issue(s), nothing planned", issues.len());
    }
    let document: ScheduleDocument = serde_json::from_value(raw)
        .with_context(|| format!("failed to parse schedule file {}", args.file.display()))?;
    let snapshot = match &args.existing {
        Some(path) => load_json::<ScheduledEventIndex>(path, "existing events")?,
        None => ScheduledEventIndex::new(),
    };

    let mut cli = Map::new();
    if let Some(policy) = args.on_conflict {
        cli.insert("onConflict".to_string(), Value::String(policy));
    }
    if let Some(mode) = args.series_mode {
        cli.insert("seriesMode".to_string(), Value::String(mode));
    }
    let stack = settings.stack(cli);

    let run = ScheduleRun::for_document(&document, &stack, &snapshot)?;
    info!(events = run.len(), existing = snapshot.len(), policy = ?run.policy(), "planning schedule");

    let mut input = io::stdin().lock();
    let report = run_to_completion(run, |position, prompt| ask(position, prompt, &mut input));

    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report_json(&report))?),
        Format::Summary => print!("{}", summary(&report)),
    }

    Ok(if report.halt.is_some() {
        ExitCode::from(EXIT_HALTED)
    } else if !report.failures.is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Ask on stderr until a valid answer arrives. End of input aborts.
fn ask<R: BufRead>(position: usize, prompt: &ConflictPrompt, input: &mut R) -> PromptResponse {
    let existing = &prompt.conflict.existing;
    eprintln!(
        "event {position} \"{}\" at {} is a {} of existing event {} \"{}\" at {}",
        prompt.event.title,
        prompt.event.start.format("%Y-%m-%d %H:%M %Z"),
        prompt.conflict.kind,
        existing.id,
        existing.title,
        existing.start.format("%Y-%m-%d %H:%M UTC"),
    );
    loop {
        eprint!("[c]reate anyway, [s]kip, [u]pdate, [a]bort? ");
        if let Err(e) = io::stderr().flush() {
            warn!(position, error = %e, "failed to flush prompt");
        }
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => {
                warn!(position, "no answer on stdin, aborting");
                return PromptResponse::Abort;
            }
            Ok(_) => match line.parse() {
                Ok(response) => return response,
                Err(e) => eprintln!("{e}"),
            },
            Err(e) => {
                warn!(position, error = %e, "failed to read answer, aborting");
                return PromptResponse::Abort;
            }
        }
    }
}

fn report_json(report: &BatchReport) -> Value {
    let failures: Vec<Value> = report
        .failures
        .iter()
        .map(|failure| {
            json!({
                "position": failure.position,
                "title": failure.title,
                "error": failure.error.to_string(),
            })
        })
        .collect();
    json!({
        "planned": report.planned,
        "failures": failures,
        "halt": report.halt,
    })
}

fn summary(report: &BatchReport) -> String {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for planned in &report.planned {
        let event = &planned.event;
        let mut line = format!(
            "{:>3}. {}  {}  -> {}",
            planned.position,
            event.start.format("%Y-%m-%d %H:%M %Z"),
            event.title,
            planned.decision,
        );
        if let Some(conflict) = &planned.conflict {
            line.push_str(&format!(
                "\n     {} with {} \"{}\"",
                conflict.kind, conflict.existing.id, conflict.existing.title
            ));
        }
        lines.push((planned.position, line));
    }
    for failure in &report.failures {
        lines.push((
            failure.position,
            format!(
                "{:>3}. {}  -> error: {}",
                failure.position,
                failure.title.as_deref().unwrap_or("(untitled)"),
                failure.error
            ),
        ));
    }
    lines.sort_by_key(|(position, _)| *position);

    let mut out: String = lines.into_iter().map(|(_, line)| line + "\n").collect();
    let count = |f: fn(&ConflictDecision) -> bool| {
        report.planned.iter().filter(|p| f(&p.decision)).count()
    };
    out.push_str(&format!(
        "{} to create, {} to update, {} skipped, {} failed\n",
        count(|d| d.creates()),
        count(|d| matches!(d, ConflictDecision::Update { .. })),
        count(|d| matches!(d, ConflictDecision::Skip)),
        report.failures.len(),
    ));
    if let Some(halt) = &report.halt {
        out.push_str(&format!(
            "halted at event {} after {} decided: {}\n",
            halt.position, halt.decided_before, halt.reason
        ));
    }
    out
}
