use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_ECOSYSTEM_FILE: &str = "ecosystem.json";

#[derive(Debug, Parser)]
#[command(name = "ecosystem-launcher", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate the ecosystem file and print a summary per app.
    Validate(FileArgs),
    /// Print the normalized descriptors as JSON.
    Show(FileArgs),
    /// Start the apps and supervise them until SIGINT/SIGTERM. SIGHUP reloads the file.
    Start(StartArgs),
}

#[derive(Debug, Args)]
pub struct FileArgs {
    /// Path to the ecosystem file.
    #[arg(default_value = DEFAULT_ECOSYSTEM_FILE)]
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Path to the ecosystem file.
    #[arg(default_value = DEFAULT_ECOSYSTEM_FILE)]
    pub file: PathBuf,

    /// Only start the named app. May be repeated.
    #[arg(long = "only", value_name = "NAME")]
    pub only: Vec<String>,
}
