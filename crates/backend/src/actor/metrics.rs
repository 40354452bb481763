//! Counters shared by the components of one run.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Atomic pipeline counters.
///
/// All updates use `SeqCst` so that [`PipelineMetrics::is_drained`] can rely
/// on a worker's event count being visible before its line count.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
  producers_expected: AtomicUsize,
  producers_finished: AtomicUsize,
  lines_published: AtomicU64,
  lines_processed: AtomicU64,
  events_published: AtomicU64,
  events_merged: AtomicU64,
  messages_dropped: AtomicU64,
  malformed_messages: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
  pub producers_expected: usize,
  pub producers_finished: usize,
  pub lines_published: u64,
  pub lines_processed: u64,
  pub events_published: u64,
  pub events_merged: u64,
  pub messages_dropped: u64,
  pub malformed_messages: u64,
}

impl PipelineMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn expect_producers(&self, count: usize) {
    self.producers_expected.store(count, Ordering::SeqCst);
  }

  pub fn producer_finished(&self) {
    self.producers_finished.fetch_add(1, Ordering::SeqCst);
  }

  pub fn line_published(&self) {
    self.lines_published.fetch_add(1, Ordering::SeqCst);
  }

  pub fn line_processed(&self) {
    self.lines_processed.fetch_add(1, Ordering::SeqCst);
  }

  pub fn event_published(&self) {
    self.events_published.fetch_add(1, Ordering::SeqCst);
  }

  pub fn event_merged(&self) {
    self.events_merged.fetch_add(1, Ordering::SeqCst);
  }

  pub fn message_dropped(&self) {
    self.messages_dropped.fetch_add(1, Ordering::SeqCst);
  }

  pub fn malformed_message(&self) {
    self.malformed_messages.fetch_add(1, Ordering::SeqCst);
  }

  /// True once every producer has finished and everything it published has
  /// been processed by a worker and merged by the aggregator.
  pub fn is_drained(&self) -> bool {
    // Load order matters: producers, then lines, then events.
    let finished = self.producers_finished.load(Ordering::SeqCst);
    let expected = self.producers_expected.load(Ordering::SeqCst);
    if finished < expected {
      return false;
    }
    let published = self.lines_published.load(Ordering::SeqCst);
    let processed = self.lines_processed.load(Ordering::SeqCst);
    if processed < published {
      return false;
    }
    let events = self.events_published.load(Ordering::SeqCst);
    let merged = self.events_merged.load(Ordering::SeqCst);
    merged == events
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      producers_expected: self.producers_expected.load(Ordering::SeqCst),
      producers_finished: self.producers_finished.load(Ordering::SeqCst),
      lines_published: self.lines_published.load(Ordering::SeqCst),
      lines_processed: self.lines_processed.load(Ordering::SeqCst),
      events_published: self.events_published.load(Ordering::SeqCst),
      events_merged: self.events_merged.load(Ordering::SeqCst),
      messages_dropped: self.messages_dropped.load(Ordering::SeqCst),
      malformed_messages: self.malformed_messages.load(Ordering::SeqCst),
    }
  }
}
