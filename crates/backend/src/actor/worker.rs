//! Occurrence worker - turns lines into one event per matched word.

use momcount_core::{OccurrenceEvent, WorkItem};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::component::{ComponentError, ComponentExit, PipelineContext};
use crate::{
  channel::{ConsumerHandle, LINE_PROPERTY, Message, MessageCodec, RUN_PROPERTY},
  matcher::WordMatcher,
  sink::ERROR_PREFIX,
};

/// One competing consumer of the line queue.
///
/// Any number of workers run this same loop; which worker gets which line
/// is up to the channel.
pub struct OccurrenceWorker {
  id: usize,
  matcher: WordMatcher,
  ctx: PipelineContext,
}

impl OccurrenceWorker {
  pub fn new(id: usize, matcher: WordMatcher, ctx: PipelineContext) -> Self {
    Self { id, matcher, ctx }
  }

  fn client_id(&self) -> String {
    format!("worker-{}-{}", self.id, self.ctx.run_id)
  }

  fn log(&self, text: &str) {
    self.ctx.sink.append_log(&format!("[Worker {}] {}", self.id, text));
  }

  /// Subscribe, signal `ready`, then process lines until cancelled.
  ///
  /// A worker that cannot connect or subscribe ends with the transport
  /// error; `ready` is then dropped without being fired.
  pub async fn run(
    self,
    cancel: CancellationToken,
    ready: Option<oneshot::Sender<()>>,
  ) -> Result<ComponentExit, ComponentError> {
    let worker_id = self.id;
    let client_id = self.client_id();

    if let Err(e) = self.ctx.channel.connect(&client_id).await {
      error!(worker_id, error = %e, "Worker could not connect");
      self.ctx.sink.append_log(&format!(
        "{} Worker {} could not connect: {}",
        ERROR_PREFIX, worker_id, e
      ));
      return Err(e.into());
    }

    let mut consumer = match self.ctx.channel.subscribe_to_queue(&self.ctx.line_queue).await {
      Ok(consumer) => consumer,
      Err(e) => {
        error!(worker_id, error = %e, "Worker could not subscribe");
        self.ctx.sink.append_log(&format!(
          "{} Worker {} could not subscribe: {}",
          ERROR_PREFIX, worker_id, e
        ));
        self.ctx.channel.disconnect(&client_id).await;
        return Err(e.into());
      }
    };

    self.log("Service started. Waiting for messages...");
    if let Some(ready) = ready {
      let _ = ready.send(());
    }

    let exit = self.consume(&mut consumer, &cancel).await;

    self.ctx.channel.close(consumer).await;
    self.ctx.channel.disconnect(&client_id).await;
    Ok(exit)
  }

  async fn consume(&self, consumer: &mut ConsumerHandle, cancel: &CancellationToken) -> ComponentExit {
    let worker_id = self.id;
    let mut processed = 0u64;

    loop {
      let message = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          info!(worker_id, processed, "Worker cancelled");
          self.log("Stopping at user request...");
          return ComponentExit::Interrupted;
        }
        message = consumer.recv() => message,
      };

      let Some(message) = message else {
        debug!(worker_id, processed, "Line queue closed");
        return ComponentExit::Completed;
      };

      if self.handle(message).await {
        processed += 1;
      }
    }
  }

  /// Process one queue message. Returns whether it was a line of this run.
  async fn handle(&self, message: Message) -> bool {
    let worker_id = self.id;

    if !self.ctx.is_current(message.property_str(RUN_PROPERTY)) {
      debug!(
        worker_id,
        message_id = message.id,
        run_id = message.property_str(RUN_PROPERTY),
        "Discarding line from an earlier run"
      );
      return false;
    }

    let item = match WorkItem::from_message(&message) {
      Ok(item) => item,
      Err(e) => {
        warn!(worker_id, message_id = message.id, error = %e, "Skipping malformed message");
        self.ctx.metrics.malformed_message();
        self.log(&format!("Skipping malformed message {}: {}", message.id, e));
        return false;
      }
    };

    let hits: Vec<&str> = self.matcher.occurrences(&item.text).collect();
    trace!(worker_id, line = item.line_number, hits = hits.len(), "Scanned line");

    for term in hits {
      let event = OccurrenceEvent::single(term, worker_id)
        .to_message()
        .with_property(RUN_PROPERTY, self.ctx.run_id.as_str())
        .with_property(LINE_PROPERTY, item.line_number);

      match self.ctx.channel.publish_to_topic(&self.ctx.result_topic, event).await {
        Ok(()) => self.ctx.metrics.event_published(),
        Err(e) => {
          warn!(worker_id, line = item.line_number, term, error = %e, "Dropping occurrence event");
          self.ctx.metrics.message_dropped();
          self.ctx.sink.append_log(&format!(
            "{} Worker {} dropped an occurrence of '{}' (line {}): {}",
            ERROR_PREFIX, worker_id, term, item.line_number, e
          ));
        }
      }
    }

    self.ctx.metrics.line_processed();
    true
  }
}
