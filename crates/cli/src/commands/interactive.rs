//! Interactive console: start, restart and stop runs from stdin

use anyhow::Result;
use momcount_core::{Config, RunOverrides};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use super::build_coordinator;
use crate::format::{LogTarget, format_status};

const HELP: &str = "\
Commands:
  start [FILE] [WORDS...]   Start a run (restarts if one is active)
  stop                      Stop all components
  status                    Show coordinator state and progress
  stats                     Show the latest statistics
  help                      Show this help
  quit                      Stop and exit";

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
  Start(RunOverrides),
  Stop,
  Status,
  Stats,
  Help,
  Quit,
  Empty,
  Unknown(String),
}

/// Parse one console line. Words after the file may be separated by spaces
/// or commas; they are joined into the comma-separated form the config uses.
fn parse_command(line: &str) -> ConsoleCommand {
  let mut tokens = line.split_whitespace();
  let Some(head) = tokens.next() else {
    return ConsoleCommand::Empty;
  };

  match head.to_lowercase().as_str() {
    "start" | "restart" => {
      let file = tokens.next().map(str::to_string);
      let rest: Vec<&str> = tokens.collect();
      let words = (!rest.is_empty()).then(|| rest.join(","));
      ConsoleCommand::Start(RunOverrides {
        file,
        words,
        ..Default::default()
      })
    }
    "stop" => ConsoleCommand::Stop,
    "status" => ConsoleCommand::Status,
    "stats" => ConsoleCommand::Stats,
    "help" | "?" => ConsoleCommand::Help,
    "quit" | "exit" => ConsoleCommand::Quit,
    other => ConsoleCommand::Unknown(other.to_string()),
  }
}

/// Run the interactive console until `quit` or end of input
pub async fn cmd_interactive(config: Config) -> Result<()> {
  let (coordinator, presenter) = build_coordinator(&config, LogTarget::Stdout)?;

  println!("momcount interactive console. Type 'help' for commands.");

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  while let Some(line) = lines.next_line().await? {
    match parse_command(&line) {
      ConsoleCommand::Start(overrides) => {
        let request = match config.run_request(&overrides) {
          Ok(request) => request,
          Err(e) => {
            println!("Cannot start: {}", e);
            continue;
          }
        };
        match coordinator.start(request).await {
          Ok(run_id) => info!(run_id = %run_id, "Run started from console"),
          Err(e) => println!("Start failed: {}", e),
        }
      }
      ConsoleCommand::Stop => {
        coordinator.stop().await;
        println!("Stopped.");
      }
      ConsoleCommand::Status => {
        let run_id = coordinator.run_id();
        let metrics = coordinator.metrics().map(|m| m.snapshot());
        print!(
          "{}",
          format_status(
            coordinator.state(),
            run_id.as_deref(),
            &coordinator.live_components(),
            metrics.as_ref(),
          )
        );
        println!("Errors:     {}", presenter.error_count());
      }
      ConsoleCommand::Stats => {
        let stats = presenter.stats();
        if stats.is_empty() {
          println!("No statistics yet.");
        } else {
          println!("{}", stats);
        }
      }
      ConsoleCommand::Help => println!("{}", HELP),
      ConsoleCommand::Quit => break,
      ConsoleCommand::Empty => {}
      ConsoleCommand::Unknown(cmd) => {
        debug!(command = %cmd, "Unknown console command");
        println!("Unknown command: {} (type 'help')", cmd);
      }
    }
  }

  coordinator.stop().await;
  drop(coordinator);
  presenter.finish().await;
  Ok(())
}
