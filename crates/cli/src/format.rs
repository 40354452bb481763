//! Terminal rendering of sink output and pipeline status.
//!
//! The coordinator writes to a `ChannelSink`; a single presenter task owns
//! the terminal and is the only place that prints sink output.

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use momcount::{
  CoordinatorState, Role, SinkEvent,
  actor::MetricsSnapshot,
  sink::{ERROR_PREFIX, RESET_MARKER},
};
use tokio::{
  sync::{mpsc, watch},
  task::JoinHandle,
};

// ============================================================================
// Presenter
// ============================================================================

/// Where log lines from the sink are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
  Stdout,
  Stderr,
  Hidden,
}

/// Handle to the presenter task
pub struct Presenter {
  stats: watch::Receiver<String>,
  errors: Arc<AtomicUsize>,
  task: JoinHandle<()>,
}

impl Presenter {
  /// Start rendering `events`. The task ends when every sink sender is gone.
  pub fn spawn(mut events: mpsc::UnboundedReceiver<SinkEvent>, target: LogTarget) -> Self {
    let (stats_tx, stats) = watch::channel(String::new());
    let errors = Arc::new(AtomicUsize::new(0));
    let error_count = Arc::clone(&errors);

    let task = tokio::spawn(async move {
      while let Some(event) = events.recv().await {
        match event {
          SinkEvent::Log(line) => {
            if line.starts_with(ERROR_PREFIX) {
              error_count.fetch_add(1, Ordering::Relaxed);
            }
            print_line(target, &line);
          }
          SinkEvent::Stats(text) => {
            stats_tx.send_replace(text);
          }
          SinkEvent::Reset => {
            stats_tx.send_replace(String::new());
            error_count.store(0, Ordering::Relaxed);
            print_line(target, RESET_MARKER);
          }
        }
      }
    });

    Self { stats, errors, task }
  }

  /// Latest statistics text (empty until the aggregator publishes)
  pub fn stats(&self) -> String {
    self.stats.borrow().clone()
  }

  /// Error lines seen since the last reset
  pub fn error_count(&self) -> usize {
    self.errors.load(Ordering::Relaxed)
  }

  /// Wait for the remaining events to be printed; returns the final error count.
  pub async fn finish(self) -> usize {
    let _ = self.task.await;
    self.errors.load(Ordering::Relaxed)
  }
}

fn print_line(target: LogTarget, line: &str) {
  match target {
    LogTarget::Stdout => println!("{}", line),
    LogTarget::Stderr => eprintln!("{}", line),
    LogTarget::Hidden => {}
  }
}

// ============================================================================
// Status
// ============================================================================

fn plural(count: usize, noun: &str) -> String {
  if count == 1 {
    format!("{} {}", count, noun)
  } else {
    format!("{} {}s", count, noun)
  }
}

fn state_label(state: CoordinatorState) -> &'static str {
  match state {
    CoordinatorState::Idle => "idle",
    CoordinatorState::Starting => "starting",
    CoordinatorState::Running => "running",
    CoordinatorState::Stopping => "stopping",
  }
}

/// Human-readable coordinator status
pub fn format_status(
  state: CoordinatorState,
  run_id: Option<&str>,
  live: &[(Role, String)],
  metrics: Option<&MetricsSnapshot>,
) -> String {
  let count = |role: Role| live.iter().filter(|(r, _)| *r == role).count();
  let mut out = String::new();

  out.push_str(&format!("State:      {}\n", state_label(state)));
  out.push_str(&format!("Run:        {}\n", run_id.unwrap_or("-")));
  out.push_str(&format!(
    "Components: {}, {}, {}\n",
    plural(count(Role::Aggregator), "aggregator"),
    plural(count(Role::Worker), "worker"),
    plural(count(Role::Producer), "producer"),
  ));

  if let Some(m) = metrics {
    out.push_str(&format!(
      "Producers:  {}/{} finished\n",
      m.producers_finished, m.producers_expected
    ));
    out.push_str(&format!(
      "Lines:      {} published, {} processed\n",
      m.lines_published, m.lines_processed
    ));
    out.push_str(&format!(
      "Events:     {} published, {} merged\n",
      m.events_published, m.events_merged
    ));
    if m.messages_dropped > 0 || m.malformed_messages > 0 {
      out.push_str(&format!(
        "Problems:   {} dropped, {} malformed\n",
        m.messages_dropped, m.malformed_messages
      ));
    }
  }

  out
}
