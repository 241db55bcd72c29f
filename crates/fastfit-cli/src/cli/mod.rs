mod commands;
mod helpers;

use clap::Parser;
use fastfit_core::domain::FastFitError;

pub fn run_from_env() -> i32 {
    match parse_and_dispatch(std::env::args().collect()) {
        Ok(code) => code,
        Err(error) => {
            let fit_error = error.as_fast_fit_error();
            eprintln!("{}", fit_error.diagnostic_line());
            eprintln!("{}", fit_error.fatal_exit_line());
            fit_error.exit_code()
        }
    }
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(name = "fastfit", version, about = "Fast linear fitting of XRF spectral volumes")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Fit every pixel spectrum of a stack with the linearised peak model
    Fit(commands::FitArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Fit(args) => commands::run_fit_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(FastFitError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<FastFitError> for CliError {
    fn from(error: FastFitError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    fn as_fast_fit_error(&self) -> FastFitError {
        match self {
            Self::Usage(message) => {
                FastFitError::configuration("CLI.USAGE", message.trim_end().to_string())
            }
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => FastFitError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
