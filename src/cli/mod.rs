//! CLI definitions.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hktrade")]
#[command(author, version, about = "Automated trade execution core for HKEX equities")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Log level (overrides the configuration file)
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Enable JSON log format
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Effective log level: CLI flag wins over the config file.
    pub fn effective_log_level(&self, config_level: &str) -> String {
        match self.log_level {
            Some(LogLevel::Trace) => "trace".to_string(),
            Some(LogLevel::Debug) => "debug".to_string(),
            Some(LogLevel::Info) => "info".to_string(),
            Some(LogLevel::Warn) => "warn".to_string(),
            Some(LogLevel::Error) => "error".to_string(),
            None => config_level.to_string(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the execution core
    Run(RunArgs),
    /// Emergency-flatten every position at the venue
    CloseAll(CloseAllArgs),
    /// Validate configuration
    ValidateConfig,
}

#[derive(clap::Args, Clone)]
pub struct RunArgs {
    /// Exit after connecting and reconciling once (smoke check)
    #[arg(long)]
    pub check_only: bool,
}

#[derive(clap::Args, Clone)]
pub struct CloseAllArgs {
    /// Reason recorded on every closing order
    #[arg(long, default_value = "operator close-all")]
    pub reason: String,
}
