pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "reimburse",
    about = "Reimburse operator CLI",
    long_about = "Apply migrations, inspect configuration, and re-drive settlement of approved expenses.",
    after_help = "Examples:\n  reimburse migrate\n  reimburse config\n  reimburse reconcile --limit 50"
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
    #[command(
        about = "Settle approved expenses that never completed, processing each job in place"
    )]
    Reconcile {
        #[arg(long, default_value_t = commands::reconcile::DEFAULT_LIMIT, help = "Maximum expenses to re-drive")]
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
        Command::Reconcile { limit } => commands::reconcile::run(limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
