//! Test helpers for end-to-end pipeline tests.
//!
//! Provides `PipelineTestContext`, which owns a temporary input directory, a
//! private in-memory broker, a recording sink, and a coordinator wired to
//! all three.

use std::{path::PathBuf, sync::Arc, time::Duration};

use momcount_core::{PartitionSpec, RunRequest};
use tempfile::TempDir;

use crate::{
  actor::{AggregateSnapshot, Coordinator, CoordinatorSettings},
  channel::InMemoryBroker,
  sink::MemorySink,
};

/// Upper bound for any single wait in these tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PipelineTestContext {
  /// Directory holding input files
  pub input_dir: TempDir,
  pub broker: Arc<InMemoryBroker>,
  pub sink: Arc<MemorySink>,
  pub coordinator: Coordinator,
}

impl PipelineTestContext {
  pub fn new() -> Self {
    Self::with_settings(test_settings())
  }

  pub fn with_settings(settings: CoordinatorSettings) -> Self {
    let input_dir = TempDir::new().expect("create input temp dir");
    // A standalone broker per test keeps destinations isolated
    let broker = Arc::new(InMemoryBroker::new(format!("memory://test-{}", uuid::Uuid::new_v4())));
    let sink = Arc::new(MemorySink::new());
    let coordinator = Coordinator::new(broker.clone(), sink.clone(), settings);

    Self {
      input_dir,
      broker,
      sink,
      coordinator,
    }
  }

  /// Write `lines` to an input file and return its path.
  pub async fn write_input(&self, name: &str, lines: &[&str]) -> PathBuf {
    let path = self.input_dir.path().join(name);
    let mut content = lines.join("\n");
    if !lines.is_empty() {
      content.push('\n');
    }
    tokio::fs::write(&path, content).await.expect("write input file");
    path
  }

  /// Path inside the input directory that does not exist.
  pub fn missing_input(&self) -> PathBuf {
    self.input_dir.path().join("does-not-exist.txt")
  }

  /// Odd/even producers over `file`.
  pub fn request(&self, file: PathBuf, words: &[&str], workers: usize) -> RunRequest {
    RunRequest {
      file,
      words: words.iter().map(|w| w.to_string()).collect(),
      workers,
      partitions: vec![PartitionSpec::odd(), PartitionSpec::even()],
    }
  }

  /// Start a run, wait until it drains, and return the final aggregate.
  pub async fn run_to_completion(&self, request: RunRequest) -> AggregateSnapshot {
    self.coordinator.start(request).await.expect("run should start");
    assert!(
      self.coordinator.wait_until_drained(TEST_TIMEOUT).await,
      "run should drain within {:?}",
      TEST_TIMEOUT
    );
    self.coordinator.snapshot().expect("run has an aggregate")
  }
}

pub fn test_settings() -> CoordinatorSettings {
  CoordinatorSettings {
    line_queue: "test.lines".to_string(),
    result_topic: "test.occurrences".to_string(),
    readiness_timeout: Duration::from_secs(2),
    shutdown_grace: Duration::from_millis(500),
  }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> bool,
{
  let start = std::time::Instant::now();
  let poll_interval = Duration::from_millis(10);

  while start.elapsed() < timeout {
    if check() {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  check()
}
