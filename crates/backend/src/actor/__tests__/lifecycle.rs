//! Lifecycle E2E tests for start, stop and restart.
//!
//! Checks that restarts never leave more than one instance of each role
//! live, and that a new run never counts leftovers of the previous one.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      CoordinatorState, Role,
      __tests__::helpers::{PipelineTestContext, TEST_TIMEOUT, wait_for},
    },
    sink::RESET_MARKER,
  };

  const QUEUE: &str = "test.lines";
  const TOPIC: &str = "test.occurrences";

  // ==========================================================================
  // Start / Stop
  // ==========================================================================

  #[tokio::test]
  async fn test_start_from_idle_runs_one_of_each_role() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("a.txt", &["Java"]).await;
    assert_eq!(ctx.coordinator.state(), CoordinatorState::Idle);

    ctx.coordinator.start(ctx.request(file, &["Java"], 3)).await.unwrap();

    assert_eq!(ctx.coordinator.state(), CoordinatorState::Running);
    assert_eq!(ctx.coordinator.live_count(Role::Aggregator), 1);
    assert_eq!(ctx.coordinator.live_count(Role::Worker), 3);
    assert_eq!(ctx.broker.subscriber_count(TOPIC), 1);
    assert_eq!(ctx.broker.queue_consumers(QUEUE), 3);
    assert_eq!(ctx.sink.logs().first().map(String::as_str), Some(RESET_MARKER));

    ctx.coordinator.stop().await;
  }

  #[tokio::test]
  async fn test_stop_releases_everything() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("a.txt", &["Java", "Python"]).await;
    ctx.run_to_completion(ctx.request(file, &["Java"], 4)).await;

    ctx.coordinator.stop().await;

    assert_eq!(ctx.coordinator.state(), CoordinatorState::Idle);
    assert!(ctx.coordinator.live_components().is_empty());
    assert_eq!(ctx.broker.live_connections(), 0);
    assert_eq!(ctx.broker.subscriber_count(TOPIC), 0);
    assert_eq!(ctx.broker.queue_consumers(QUEUE), 0);
    assert!(ctx.sink.logs().iter().any(|l| l == "[Subscriber] Monitoring stopped."));

    // Results of the stopped run stay readable
    assert_eq!(ctx.coordinator.snapshot().unwrap().count("Java"), Some(1));
  }

  // ==========================================================================
  // Restart
  // ==========================================================================

  /// Restarting a running pipeline replaces every component instead of
  /// adding to them.
  #[tokio::test]
  async fn test_restart_while_running_replaces_components() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("a.txt", &["Java"]).await;

    ctx.run_to_completion(ctx.request(file.clone(), &["Java"], 4)).await;
    let first_run = ctx.coordinator.run_id().unwrap();

    ctx.run_to_completion(ctx.request(file, &["Java"], 4)).await;
    let second_run = ctx.coordinator.run_id().unwrap();

    assert_ne!(first_run, second_run);
    assert_eq!(ctx.coordinator.live_count(Role::Aggregator), 1);
    assert_eq!(ctx.coordinator.live_count(Role::Worker), 4);
    assert_eq!(ctx.broker.subscriber_count(TOPIC), 1);
    assert_eq!(ctx.broker.queue_consumers(QUEUE), 4);
    // Producers disconnect once finished: aggregator + workers remain
    assert_eq!(ctx.broker.live_connections(), 5);

    ctx.coordinator.stop().await;
  }

  #[tokio::test]
  async fn test_repeated_restarts_are_idempotent() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("a.txt", &["Java"]).await;

    for _ in 0..5 {
      ctx.coordinator.start(ctx.request(file.clone(), &["Java"], 2)).await.unwrap();
    }

    assert_eq!(ctx.coordinator.live_count(Role::Aggregator), 1);
    assert_eq!(ctx.coordinator.live_count(Role::Worker), 2);
    assert_eq!(ctx.broker.subscriber_count(TOPIC), 1);
    assert_eq!(ctx.broker.queue_consumers(QUEUE), 2);

    ctx.coordinator.stop().await;
  }

  /// Concurrent restarts serialise: afterwards exactly one set is live.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_restarts_serialise() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("a.txt", &["Java"]).await;

    let (a, b, c) = tokio::join!(
      ctx.coordinator.start(ctx.request(file.clone(), &["Java"], 3)),
      ctx.coordinator.start(ctx.request(file.clone(), &["Java"], 3)),
      ctx.coordinator.start(ctx.request(file, &["Java"], 3)),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    assert_eq!(ctx.coordinator.live_count(Role::Aggregator), 1);
    assert_eq!(ctx.coordinator.live_count(Role::Worker), 3);
    assert_eq!(ctx.broker.subscriber_count(TOPIC), 1);
    assert_eq!(ctx.broker.queue_consumers(QUEUE), 3);

    ctx.coordinator.stop().await;
  }

  /// Each run starts from a fresh aggregate and a fresh sink.
  #[tokio::test]
  async fn test_restart_resets_aggregate_and_sink() {
    let ctx = PipelineTestContext::new();
    let java = ctx.write_input("java.txt", &["Java Java", "Java"]).await;
    let python = ctx.write_input("python.txt", &["Python"]).await;

    let first = ctx.run_to_completion(ctx.request(java, &["Java"], 2)).await;
    assert_eq!(first.total, 3);

    let second = ctx.run_to_completion(ctx.request(python, &["Python"], 2)).await;
    assert_eq!(second.count("Java"), None);
    assert_eq!(second.count("Python"), Some(1));
    assert_eq!(second.total, 1);

    let logs = ctx.sink.logs();
    assert_eq!(logs.first().map(String::as_str), Some(RESET_MARKER));
    assert!(!logs.iter().any(|l| l.contains("Java")), "first run leaked: {:?}", logs);

    ctx.coordinator.stop().await;
  }

  /// Lines left on the queue by an interrupted run are never counted by the
  /// next one.
  #[tokio::test]
  async fn test_stale_lines_from_interrupted_run_are_discarded() {
    let ctx = PipelineTestContext::new();
    let lines: Vec<String> = (0..5000).map(|i| format!("Java line {}", i)).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let big = ctx.write_input("big.txt", &refs).await;
    let empty = ctx.write_input("empty.txt", &[]).await;

    ctx.coordinator.start(ctx.request(big, &["Java"], 1)).await.unwrap();
    ctx.coordinator.start(ctx.request(empty, &["Java"], 2)).await.unwrap();

    assert!(ctx.coordinator.wait_until_drained(TEST_TIMEOUT).await);
    assert!(wait_for(TEST_TIMEOUT, || ctx.broker.queue_depth(QUEUE) == 0).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(ctx.coordinator.snapshot().unwrap().total, 0);
    assert_eq!(ctx.coordinator.metrics().unwrap().snapshot().lines_processed, 0);

    ctx.coordinator.stop().await;
  }
}
