//! Line producer - publishes one partition of a file onto the work queue.

use std::{io::ErrorKind, path::PathBuf};

use momcount_core::{PartitionSpec, WorkItem};
use tokio::{
  fs::File,
  io::{AsyncBufReadExt, BufReader},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::component::{ComponentError, ComponentExit, PipelineContext};
use crate::{
  channel::{MessageCodec, RUN_PROPERTY},
  sink::ERROR_PREFIX,
};

/// Reads a file sequentially and publishes the lines its partition selects.
///
/// Several producers with complementary partitions can read the same file
/// at the same time; the partition rule alone keeps them disjoint.
pub struct LineProducer {
  ctx: PipelineContext,
  file: PathBuf,
  partition: PartitionSpec,
}

impl LineProducer {
  pub fn new(file: impl Into<PathBuf>, partition: PartitionSpec, ctx: PipelineContext) -> Self {
    Self {
      ctx,
      file: file.into(),
      partition,
    }
  }

  fn client_id(&self) -> String {
    format!("producer-{}-{}", self.partition.index, self.ctx.run_id)
  }

  /// Publish every selected line, checking `cancel` before each one.
  ///
  /// Always counts as a finished producer in the run's metrics, whatever
  /// the outcome.
  pub async fn run(self, cancel: CancellationToken) -> Result<ComponentExit, ComponentError> {
    self.ctx.sink.append_log(&format!(
      "[Producer] Reading {} ({})...",
      self.file.display(),
      self.partition
    ));
    let result = self.produce(&cancel).await;
    self.ctx.metrics.producer_finished();
    result
  }

  async fn produce(&self, cancel: &CancellationToken) -> Result<ComponentExit, ComponentError> {
    let file = match File::open(&self.file).await {
      Ok(file) => file,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        error!(path = %self.file.display(), "Input file not found");
        self.ctx.sink.append_log(&format!(
          "{} Input file not found: {}",
          ERROR_PREFIX,
          self.file.display()
        ));
        return Err(ComponentError::FileNotFound(self.file.clone()));
      }
      Err(e) => {
        error!(path = %self.file.display(), error = %e, "Failed to open input file");
        self.ctx.sink.append_log(&format!(
          "{} Could not open {}: {}",
          ERROR_PREFIX,
          self.file.display(),
          e
        ));
        return Err(e.into());
      }
    };

    let client_id = self.client_id();
    if let Err(e) = self.ctx.channel.connect(&client_id).await {
      error!(partition = %self.partition, error = %e, "Producer could not connect");
      self.ctx.sink.append_log(&format!(
        "{} Producer ({}) could not connect: {}",
        ERROR_PREFIX, self.partition, e
      ));
      return Err(e.into());
    }

    let result = self.publish_lines(file, cancel).await;
    self.ctx.channel.disconnect(&client_id).await;
    result
  }

  async fn publish_lines(&self, file: File, cancel: &CancellationToken) -> Result<ComponentExit, ComponentError> {
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_number = 0u64;
    let mut published = 0u64;

    loop {
      if cancel.is_cancelled() {
        info!(partition = %self.partition, line = line_number, published, "Producer interrupted");
        self
          .ctx
          .sink
          .append_log(&format!("[Producer] Reading of {} interrupted.", self.partition));
        return Ok(ComponentExit::Interrupted);
      }

      buf.clear();
      match reader.read_until(b'\n', &mut buf).await {
        Ok(0) => break,
        Ok(_) => {}
        Err(e) => {
          error!(partition = %self.partition, line = line_number + 1, error = %e, "Failed to read line");
          self.ctx.sink.append_log(&format!(
            "{} Producer ({}) failed at line {}: {}",
            ERROR_PREFIX,
            self.partition,
            line_number + 1,
            e
          ));
          return Err(e.into());
        }
      }
      line_number += 1;

      if !self.partition.selects(line_number) {
        continue;
      }

      let message = WorkItem::new(line_number, decode_line(&buf))
        .to_message()
        .with_property(RUN_PROPERTY, self.ctx.run_id.as_str());
      match self.ctx.channel.publish_to_queue(&self.ctx.line_queue, message).await {
        Ok(()) => {
          published += 1;
          self.ctx.metrics.line_published();
          trace!(partition = %self.partition, line = line_number, "Published line");
        }
        Err(e) => {
          warn!(partition = %self.partition, line = line_number, error = %e, "Dropping line");
          self.ctx.metrics.message_dropped();
          self.ctx.sink.append_log(&format!(
            "{} Producer ({}) dropped line {}: {}",
            ERROR_PREFIX, self.partition, line_number, e
          ));
        }
      }
    }

    debug!(partition = %self.partition, lines = line_number, published, "Producer finished");
    self.ctx.sink.append_log(&format!(
      "[Producer] Finished reading {}: {} lines published.",
      self.partition, published
    ));
    Ok(ComponentExit::Completed)
  }
}

/// Decode one raw line without its terminator. Invalid UTF-8 becomes U+FFFD
/// so a stray byte never ends the partition early.
fn decode_line(raw: &[u8]) -> String {
  let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
  let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
  String::from_utf8_lossy(raw).into_owned()
}
