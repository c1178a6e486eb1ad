use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod logger;
mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(
    name = "meetup-scheduler",
    version,
    about = "Plan recurring meetup events from patterns and schedule files"
)]
struct Cli {
    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project settings file
    #[arg(long, global = true, value_name = "PATH", default_value = settings::PROJECT_FILE)]
    project_config: PathBuf,

    /// User settings file [default: <config dir>/meetup-scheduler/config.json]
    #[arg(long, global = true, value_name = "PATH")]
    user_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a schedule template from a recurrence pattern
    Generate(commands::generate::GenerateArgs),
    /// Explain where configuration values come from
    Config(commands::config::ConfigArgs),
    /// Normalize a schedule file and decide what happens to each event
    Plan(commands::plan::PlanArgs),
    /// Check a schedule or settings file for structural problems
    Validate(commands::validate::ValidateArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init_cli_logger(cli.verbose);

    let result = Settings::load(&cli.project_config, cli.user_config.as_deref()).and_then(
        |settings| match cli.command {
            Commands::Generate(args) => commands::generate::run(args, &settings),
            Commands::Config(args) => commands::config::run(args, &settings),
            Commands::Plan(args) => commands::plan::run(args, &settings),
            Commands::Validate(args) => commands::validate::run(args, &settings),
        },
    );

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
