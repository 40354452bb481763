//! One-shot pipeline run

use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use momcount_core::{Config, RunOverrides};
use tracing::{info, warn};

use super::build_coordinator;
use crate::format::LogTarget;

#[derive(Debug, Args)]
pub struct RunArgs {
  /// Text file to scan (default: [run] file)
  #[arg(short, long)]
  pub file: Option<String>,
  /// Comma-separated words to count (default: [run] words)
  #[arg(short, long)]
  pub words: Option<String>,
  /// Number of competing workers (default: [pipeline] workers)
  #[arg(long)]
  pub workers: Option<usize>,
  /// Number of producers, each reading a disjoint share of the file
  #[arg(long)]
  pub partitions: Option<usize>,
  /// Broker endpoint (default: [channel] endpoint)
  #[arg(long)]
  pub endpoint: Option<String>,
  /// Give up waiting for the run to finish after this many seconds
  #[arg(long, default_value = "60")]
  pub timeout: u64,
  /// Do not print progress lines
  #[arg(short, long)]
  pub quiet: bool,
  /// Print the final aggregate as JSON
  #[arg(long)]
  pub json: bool,
}

impl RunArgs {
  fn overrides(&self) -> RunOverrides {
    RunOverrides {
      file: self.file.clone(),
      words: self.words.clone(),
      workers: self.workers,
      partitions: self.partitions,
    }
  }
}

/// Run the pipeline once over a file and print the final counts
pub async fn cmd_run(mut config: Config, args: RunArgs) -> Result<()> {
  if let Some(endpoint) = &args.endpoint {
    config.channel.endpoint = endpoint.clone();
  }
  let request = config.run_request(&args.overrides())?;

  let target = if args.quiet || args.json {
    LogTarget::Hidden
  } else {
    LogTarget::Stderr
  };
  let (coordinator, presenter) = build_coordinator(&config, target)?;

  let run_id = match coordinator.start(request).await {
    Ok(run_id) => run_id,
    Err(e) => {
      drop(coordinator);
      presenter.finish().await;
      return Err(e.into());
    }
  };
  info!(run_id = %run_id, "Run started");

  let drained = coordinator.wait_until_drained(Duration::from_secs(args.timeout)).await;
  if !drained {
    warn!(timeout_secs = args.timeout, "Run did not finish in time");
  }

  let snapshot = coordinator.snapshot().unwrap_or_default();
  let metrics = coordinator.metrics().map(|m| m.snapshot()).unwrap_or_default();
  coordinator.stop().await;

  // Dropping the coordinator releases the last sink sender
  drop(coordinator);
  let errors = presenter.finish().await;

  if args.json {
    let report = serde_json::json!({
      "run_id": run_id,
      "finished_at": chrono::Utc::now().to_rfc3339(),
      "drained": drained,
      "counts": snapshot.counts,
      "total": snapshot.total,
      "metrics": metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    println!("{}", snapshot);
  }

  if !drained {
    bail!("Run did not finish within {} seconds", args.timeout);
  }
  if errors > 0 {
    bail!("Run finished with {} error(s)", errors);
  }
  Ok(())
}
