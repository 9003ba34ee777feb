mod cli;
mod commands;
mod models;
mod services;
mod state;
mod utils;

use clap::Parser;
use cli::{Cli, Command};
use state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ecosystem_launcher=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate(args) => commands::validate(&args.file),
        Command::Show(args) => commands::show(&args.file),
        Command::Start(args) => {
            tracing::info!(file = %args.file.display(), "starting ecosystem");
            let state = AppState::new(args.file, args.only);
            commands::start(&state).await
        }
    }
}
