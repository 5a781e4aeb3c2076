//! Tether CLI - keep a remote code index in sync with your workspace

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Keep a remote code index in sync with your workspace")]
#[command(after_help = "\
QUICK START:
  tether config init          # Write a project config template
  tether scan                 # Index every eligible file once
  tether watch                # Keep indexing as files change
  tether status               # Query backend diagnostics")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Index every eligible file in the workspace
  Scan {
    /// Workspace root (default: current directory)
    #[arg(short, long)]
    path: Option<PathBuf>,
  },
  /// Watch the workspace and index files as they change
  Watch {
    /// Workspace root (default: current directory)
    #[arg(short, long)]
    path: Option<PathBuf>,
  },
  /// Show backend diagnostics
  Status,
  /// Send a free-form question to the backend
  Ask {
    /// The question
    prompt: String,
  },
  /// Configuration helpers
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[derive(Subcommand)]
enum ConfigCommand {
  /// Write a commented config template to the project
  Init,
  /// Print the resolved configuration
  Show,
}

#[tokio::main]
async fn main() -> Result<()> {
  logging::init();
  let cli = Cli::parse();

  match cli.command {
    Commands::Scan { path } => commands::cmd_scan(path).await,
    Commands::Watch { path } => commands::cmd_watch(path).await,
    Commands::Status => commands::cmd_status().await,
    Commands::Ask { prompt } => commands::cmd_ask(prompt).await,
    Commands::Config { command } => match command {
      ConfigCommand::Init => commands::cmd_config_init(),
      ConfigCommand::Show => commands::cmd_config_show(),
    },
  }
}
