pub mod args;
pub mod commands;

pub use args::{CheckArgs, OutputFormat, RunArgs};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "procflow.toml";

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
PROCESS COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "procflow")]
#[command(version = crate::VERSION)]
#[command(about = "Structured-process execution engine with fault handling and compensation")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: check a definition for dangling references, then run it with an input document."
)]
pub struct Args {
    /// Engine and logging configuration file (default: ./procflow.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Explicit `--config`, else `procflow.toml` in the working directory if present.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
            candidate.exists().then_some(candidate)
        })
    }

    /// Directory that relative paths in the config file are anchored at.
    pub fn config_base_dir(&self) -> PathBuf {
        self.config_path()
            .as_deref()
            .and_then(Path::parent)
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Deploy a definition and run one instance",
        long_about = "Run deploys the definition into a fresh engine, starts an instance with the given input and prints the final instance state. Exits non-zero when the instance faults.",
        after_help = "Example:\n    procflow run order.yaml --input '{\"amount\": 150}' --format json"
    )]
    Run(RunArgs),
    #[command(
        about = "List references that do not resolve",
        long_about = "Check parses the definition and reports every child, handler or root reference that names a missing activity. Deployment never performs this check.",
        after_help = "Example:\n    procflow check order.yaml"
    )]
    Check(CheckArgs),
    #[command(
        about = "Print the effective engine configuration",
        after_help = "Example:\n    procflow show-config --config procflow.toml"
    )]
    ShowConfig,
}

pub async fn run(args: Args) -> crate::Result<()> {
    let config_path = args.config_path();
    match args.command {
        Command::Run(run_args) => commands::run(run_args, config_path.as_deref()).await,
        Command::Check(check_args) => commands::check(check_args),
        Command::ShowConfig => commands::show_config(config_path.as_deref()),
    }
}
