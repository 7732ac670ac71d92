use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct RunArgs {
    /// Process definition to deploy and start (YAML, or JSON by extension)
    #[arg(value_name = "DEFINITION")]
    pub definition: PathBuf,

    /// Initial variables as a JSON object, merged over the declared defaults
    #[arg(long, value_name = "JSON")]
    pub input: Option<String>,

    /// Identity recorded as the instance initiator
    #[arg(long, default_value = "cli", value_name = "WHO")]
    pub initiated_by: String,

    /// Output format for the final instance
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Process definition to lint
    #[arg(value_name = "DEFINITION")]
    pub definition: PathBuf,
}

#[derive(Clone, Copy, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
