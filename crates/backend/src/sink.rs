//! Output sinks - where progress lines and live statistics are shown.
//!
//! A sink has two areas: an append-only log and a statistics panel that is
//! replaced wholesale on every update. Any task may write to a sink.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

/// Marker appended after a reset, before a new run starts
pub const RESET_MARKER: &str = "=== READY FOR A NEW SEARCH ===";

/// Prefix of every error line written to a sink
pub const ERROR_PREFIX: &str = "[Error]";

/// Presentation surface for the pipeline
pub trait OutputSink: Send + Sync {
  /// Append a line to the log area. Lines appear in call order.
  fn append_log(&self, text: &str);

  /// Replace the statistics area. The most recent call wins.
  fn set_stats(&self, text: &str);

  /// Clear both areas and write [`RESET_MARKER`] to the log.
  fn reset(&self);
}

// ============================================================================
// Memory Sink
// ============================================================================

/// Sink that records everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
  logs: Mutex<Vec<String>>,
  stats: Mutex<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  /// All log lines since the last reset
  pub fn logs(&self) -> Vec<String> {
    lock(&self.logs).clone()
  }

  /// Current statistics text
  pub fn stats(&self) -> String {
    lock(&self.stats).clone()
  }

  /// Log lines that report an error
  pub fn errors(&self) -> Vec<String> {
    lock(&self.logs)
      .iter()
      .filter(|line| line.starts_with(ERROR_PREFIX))
      .cloned()
      .collect()
  }
}

impl OutputSink for MemorySink {
  fn append_log(&self, text: &str) {
    lock(&self.logs).push(text.to_string());
  }

  fn set_stats(&self, text: &str) {
    *lock(&self.stats) = text.to_string();
  }

  fn reset(&self) {
    let mut logs = lock(&self.logs);
    logs.clear();
    logs.push(RESET_MARKER.to_string());
    lock(&self.stats).clear();
  }
}

// ============================================================================
// Channel Sink
// ============================================================================

/// One sink operation, as delivered to a presentation task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
  Log(String),
  Stats(String),
  Reset,
}

/// Sink that forwards every operation to a single presentation task.
///
/// Concurrent writers are serialised by the channel, so the receiving task
/// can own a non-thread-safe surface (a terminal, a widget).
#[derive(Debug, Clone)]
pub struct ChannelSink {
  tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  fn send(&self, event: SinkEvent) {
    // Presentation task gone means nobody is looking; nothing to do
    let _ = self.tx.send(event);
  }
}

impl OutputSink for ChannelSink {
  fn append_log(&self, text: &str) {
    self.send(SinkEvent::Log(text.to_string()));
  }

  fn set_stats(&self, text: &str) {
    self.send(SinkEvent::Stats(text.to_string()));
  }

  fn reset(&self) {
    self.send(SinkEvent::Reset);
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_memory_sink_log_order_and_stats_replacement() {
    let sink = MemorySink::new();
    sink.append_log("first");
    sink.append_log("[Error] second");
    sink.set_stats("a");
    sink.set_stats("b");

    assert_eq!(sink.logs(), vec!["first", "[Error] second"]);
    assert_eq!(sink.errors(), vec!["[Error] second"]);
    assert_eq!(sink.stats(), "b");
  }

  #[test]
  fn test_memory_sink_reset() {
    let sink = MemorySink::new();
    sink.append_log("old");
    sink.set_stats("old stats");
    sink.reset();

    assert_eq!(sink.logs(), vec![RESET_MARKER]);
    assert_eq!(sink.stats(), "");
  }

  #[test]
  fn test_memory_sink_concurrent_writers() {
    let sink = Arc::new(MemorySink::new());
    let threads: Vec<_> = (0..8)
      .map(|t| {
        let sink = Arc::clone(&sink);
        std::thread::spawn(move || {
          for i in 0..100 {
            sink.append_log(&format!("{}-{}", t, i));
          }
        })
      })
      .collect();
    for thread in threads {
      thread.join().unwrap();
    }
    assert_eq!(sink.logs().len(), 800);
  }

  #[tokio::test]
  async fn test_channel_sink_forwards_in_order() {
    let (sink, mut rx) = ChannelSink::new();
    sink.reset();
    sink.append_log("hello");
    sink.set_stats("TOTAL : 0");

    assert_eq!(rx.recv().await, Some(SinkEvent::Reset));
    assert_eq!(rx.recv().await, Some(SinkEvent::Log("hello".to_string())));
    assert_eq!(rx.recv().await, Some(SinkEvent::Stats("TOTAL : 0".to_string())));
  }
}
