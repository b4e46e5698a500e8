use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod run;
pub mod symbols;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an in-process server and send it messages.
    Run(RunArgs),
    /// List the built-in static symbols.
    Symbols(SymbolsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Symbols(args) => symbols::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Server parameters as JSON (pools, payload limit).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Threads in the `workers` pool when no config file is given.
    #[arg(long, default_value = "2")]
    pub workers: usize,
    /// Pool to run on. Default: the default pool.
    #[arg(long)]
    pub pool: Option<String>,
    /// Function to invoke.
    #[arg(long, short = 's', default_value = "inc")]
    pub symbol: String,
    /// Integer payload.
    #[arg(long, allow_hyphen_values = true, conflicts_with = "data")]
    pub value: Option<i32>,
    /// Text payload.
    #[arg(long, conflicts_with = "value")]
    pub data: Option<String>,
    /// Number of messages to send.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: usize,
    /// Send the messages as one ordered job.
    #[arg(long)]
    pub job: bool,
    /// Send CMD messages (no reply on success).
    #[arg(long)]
    pub cmd: bool,
    /// Maximum time to wait for all replies (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Server queue name.
    #[arg(long, default_value = "rcm")]
    pub name: String,
}

#[derive(Args, Debug, Default)]
pub struct SymbolsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
