//! Execution core CLI application.

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => cli::commands::run::run(args.clone(), &cli).await,
        Commands::CloseAll(args) => cli::commands::close_all::run(args.clone(), &cli).await,
        Commands::ValidateConfig => cli::commands::validate::run(&cli).await,
    }
}
