pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "leadline",
    about = "Leadline operator CLI",
    long_about = "Apply migrations, inspect effective configuration, check readiness \
                  and review dead-lettered outbox items.",
    after_help = "Examples:\n  leadline doctor --json\n  leadline config\n  \
                  leadline dead-letters --limit 20"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, integration credentials and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List dead-lettered outbox items as JSON, newest first")]
    DeadLetters {
        #[arg(long, default_value_t = 50, help = "Maximum number of items to list")]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::DeadLetters { limit } => commands::dead_letters::run(limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
