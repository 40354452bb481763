//! momcount CLI - Distributed word counting over a message channel

use anyhow::Result;
use clap::{Parser, Subcommand};
use momcount_core::Config;
use std::path::PathBuf;

mod commands;
mod format;
mod logging;

use commands::{RunArgs, cmd_config_init, cmd_config_show, cmd_interactive, cmd_run};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "momcount")]
#[command(about = "Count target words across a text file with competing workers")]
#[command(after_help = "\
QUICK START:
  momcount config init                        # Write ./momcount.toml
  momcount run -f data.txt -w Java,Python     # Count once and print totals
  momcount interactive                        # Start, restart and stop from a console

CONFIG LOCATIONS:
  Project: ./momcount.toml
  User:    ~/.config/momcount/config.toml")]
struct Cli {
  /// Use this config file instead of the project/user lookup
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `momcount config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show current effective configuration
  #[command(long_about = "Show the current effective configuration.\n\n\
    Displays which config file is being used and its contents as TOML.")]
  Show,

  /// Initialize project config file (./momcount.toml)
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run the pipeline once and print the final counts
  #[command(after_help = "\
EXAMPLES:
  momcount run -f data.txt -w Java,Python,MOM
  momcount run -f data.txt -w Go --workers 8 --partitions 3
  momcount run --json --quiet")]
  Run(RunArgs),
  /// Interactive console (start, stop, status, stats)
  Interactive,
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let config = match &cli.config {
    Some(path) => Config::load_from(path)?,
    None => Config::load_for_dir(&std::env::current_dir()?),
  };

  let _guard = init_logging(&config.logging);

  match cli.command {
    Commands::Run(args) => cmd_run(config, args).await,
    Commands::Interactive => cmd_interactive(config).await,

    // Config subcommands
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(&config, cli.config.as_deref()).await,
      ConfigCommand::Init { force } => cmd_config_init(force).await,
    },
  }
}
