//! Aggregator - merges occurrence events into live per-term totals.
//!
//! ```text
//! [topic] ──▶ Aggregator ──merge──▶ AggregateState ──snapshot──▶ sink.set_stats
//! ```

use std::{
  fmt,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
  },
};

use dashmap::DashMap;
use momcount_core::OccurrenceEvent;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::component::{ComponentError, ComponentExit, PipelineContext};
use crate::{
  channel::{ConsumerHandle, Message, MessageCodec, RUN_PROPERTY},
  sink::ERROR_PREFIX,
};

const STATS_HEADER: &str = "=== LIVE STATISTICS ===";
const STATS_SEPARATOR: &str = "------------------------------";
const TOTAL_LABEL: &str = "TOTAL";

// ============================================================================
// Aggregate State
// ============================================================================

/// Running count per term.
///
/// Each term has its own atomic counter, so concurrent merges never lose an
/// increment. Terms that were not seeded are inserted on their first merge.
#[derive(Debug, Default)]
pub struct AggregateState {
  counts: DashMap<String, AtomicU64>,
  /// Terms in display order: seeds first, then first-seen order
  order: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AggregateState {
  pub fn new() -> Self {
    Self::default()
  }

  /// State with every word of `words` present at zero.
  pub fn seeded(words: &[String]) -> Self {
    let state = Self::new();
    for word in words {
      state.counter_for(word);
    }
    state
  }

  fn counter_for(&self, term: &str) -> dashmap::mapref::one::Ref<'_, String, AtomicU64> {
    if let Some(counter) = self.counts.get(term) {
      return counter;
    }
    self
      .counts
      .entry(term.to_string())
      .or_insert_with(|| {
        lock(&self.order).push(term.to_string());
        AtomicU64::new(0)
      })
      .downgrade()
  }

  /// Add `count` to `term`, inserting it if unseen.
  pub fn merge(&self, term: &str, count: u64) {
    self.counter_for(term).fetch_add(count, Ordering::SeqCst);
  }

  pub fn count(&self, term: &str) -> Option<u64> {
    self.counts.get(term).map(|c| c.load(Ordering::SeqCst))
  }

  pub fn snapshot(&self) -> AggregateSnapshot {
    // Clone the order first; never hold it while touching the map.
    let order = lock(&self.order).clone();
    let counts: Vec<TermCount> = order
      .into_iter()
      .map(|term| {
        let count = self.count(&term).unwrap_or(0);
        TermCount { term, count }
      })
      .collect();
    let total = counts.iter().map(|c| c.count).sum();
    AggregateSnapshot { counts, total }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermCount {
  pub term: String,
  pub count: u64,
}

/// Consistent view of the aggregate: `total` is the sum of `counts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSnapshot {
  pub counts: Vec<TermCount>,
  pub total: u64,
}

impl AggregateSnapshot {
  pub fn count(&self, term: &str) -> Option<u64> {
    self.counts.iter().find(|c| c.term == term).map(|c| c.count)
  }
}

impl fmt::Display for AggregateSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{}", STATS_HEADER)?;
    writeln!(f)?;
    for entry in &self.counts {
      writeln!(f, "{:<15} : {}", entry.term, entry.count)?;
    }
    writeln!(f)?;
    writeln!(f, "{}", STATS_SEPARATOR)?;
    write!(f, "{:<15} : {}", TOTAL_LABEL, self.total)
  }
}

// ============================================================================
// Aggregator Component
// ============================================================================

/// The result-topic subscriber.
pub struct Aggregator {
  state: Arc<AggregateState>,
  ctx: PipelineContext,
}

impl Aggregator {
  pub fn new(state: Arc<AggregateState>, ctx: PipelineContext) -> Self {
    Self { state, ctx }
  }

  fn client_id(&self) -> String {
    format!("aggregator-{}", self.ctx.run_id)
  }

  fn publish_stats(&self) {
    self.ctx.sink.set_stats(&self.state.snapshot().to_string());
  }

  /// Subscribe to the result topic, signal `ready`, then merge events until
  /// cancelled.
  pub async fn run(
    self,
    cancel: CancellationToken,
    ready: Option<oneshot::Sender<()>>,
  ) -> Result<ComponentExit, ComponentError> {
    let client_id = self.client_id();

    if let Err(e) = self.ctx.channel.connect(&client_id).await {
      error!(error = %e, "Aggregator could not connect");
      self
        .ctx
        .sink
        .append_log(&format!("{} Subscriber could not connect: {}", ERROR_PREFIX, e));
      return Err(e.into());
    }

    let mut subscription = match self.ctx.channel.subscribe_to_topic(&self.ctx.result_topic).await {
      Ok(subscription) => subscription,
      Err(e) => {
        error!(error = %e, "Aggregator could not subscribe");
        self
          .ctx
          .sink
          .append_log(&format!("{} Subscriber could not subscribe: {}", ERROR_PREFIX, e));
        self.ctx.channel.disconnect(&client_id).await;
        return Err(e.into());
      }
    };

    self
      .ctx
      .sink
      .append_log("[Subscriber] Result monitor active and waiting for data...");
    self.publish_stats();
    if let Some(ready) = ready {
      let _ = ready.send(());
    }

    let exit = self.consume(&mut subscription, &cancel).await;

    self.ctx.channel.close(subscription).await;
    self.ctx.channel.disconnect(&client_id).await;
    Ok(exit)
  }

  async fn consume(&self, subscription: &mut ConsumerHandle, cancel: &CancellationToken) -> ComponentExit {
    let mut merged = 0u64;

    loop {
      let message = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          info!(merged, "Aggregator cancelled");
          self.ctx.sink.append_log("[Subscriber] Monitoring stopped.");
          return ComponentExit::Interrupted;
        }
        message = subscription.recv() => message,
      };

      let Some(message) = message else {
        debug!(merged, "Result topic closed");
        return ComponentExit::Completed;
      };

      if self.handle(message) {
        merged += 1;
      }
    }
  }

  fn handle(&self, message: Message) -> bool {
    if !self.ctx.is_current(message.property_str(RUN_PROPERTY)) {
      debug!(message_id = message.id, "Discarding event from an earlier run");
      return false;
    }

    let event = match OccurrenceEvent::from_message(&message) {
      Ok(event) => event,
      Err(e) => {
        warn!(message_id = message.id, error = %e, "Skipping malformed event");
        self.ctx.metrics.malformed_message();
        self.ctx.sink.append_log(&format!(
          "[Subscriber] Skipping malformed message {}: {}",
          message.id, e
        ));
        return false;
      }
    };

    self.state.merge(&event.term, event.count);
    trace!(term = %event.term, worker_id = event.source_worker_id, "Merged occurrence");
    self.ctx.sink.append_log(&format!(
      "[Subscriber] Worker {} reported: {} (+{})",
      event.source_worker_id, event.term, event.count
    ));
    self.publish_stats();
    self.ctx.metrics.event_merged();
    true
  }
}
