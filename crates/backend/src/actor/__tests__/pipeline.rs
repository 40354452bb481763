//! End-to-end pipeline tests: producers, workers and aggregator wired
//! through the coordinator and an in-memory broker.

#[cfg(test)]
mod tests {
  use momcount_core::PartitionSpec;
  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      CoordinatorState, Role,
      __tests__::helpers::{PipelineTestContext, TEST_TIMEOUT, wait_for},
    },
    sink::ERROR_PREFIX,
  };

  // ==========================================================================
  // Counting
  // ==========================================================================

  /// Odd and even producers over four lines count every occurrence once.
  #[tokio::test]
  async fn test_end_to_end_counts() {
    let ctx = PipelineTestContext::new();
    let file = ctx
      .write_input("code.txt", &["Java code", "Python code", "Java and Python", "nothing here"])
      .await;

    let snapshot = ctx.run_to_completion(ctx.request(file, &["Java", "Python"], 4)).await;

    assert_eq!(snapshot.count("Java"), Some(2));
    assert_eq!(snapshot.count("Python"), Some(2));
    assert_eq!(snapshot.total, 4);
    assert!(ctx.sink.errors().is_empty(), "unexpected errors: {:?}", ctx.sink.errors());
    assert!(ctx.sink.stats().ends_with("TOTAL           : 4"));

    let metrics = ctx.coordinator.metrics().unwrap().snapshot();
    assert_eq!(metrics.lines_published, 4);
    assert_eq!(metrics.lines_processed, 4);
    assert_eq!(metrics.events_published, 4);
    assert_eq!(metrics.events_merged, 4);
    assert_eq!(metrics.producers_finished, 2);
  }

  /// A Latin-1 byte on one line neither stops the producers nor hides
  /// the lines after it.
  #[tokio::test]
  async fn test_invalid_utf8_line_does_not_end_partitions() {
    let ctx = PipelineTestContext::new();
    let file = ctx.input_dir.path().join("latin1.txt");
    tokio::fs::write(&file, b"Java one\nJos\xe9 Java\nJava three\nJava four\n".as_slice())
      .await
      .unwrap();

    let snapshot = ctx.run_to_completion(ctx.request(file, &["Java"], 2)).await;

    assert_eq!(snapshot.count("Java"), Some(4));
    assert_eq!(snapshot.total, 4);
    assert!(ctx.sink.errors().is_empty(), "unexpected errors: {:?}", ctx.sink.errors());
    assert_eq!(ctx.coordinator.metrics().unwrap().snapshot().lines_published, 4);
  }

  #[tokio::test]
  async fn test_substrings_of_longer_words_do_not_count() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("go.txt", &["Golang and Go are different"]).await;

    let snapshot = ctx.run_to_completion(ctx.request(file, &["Go"], 2)).await;

    assert_eq!(snapshot.count("Go"), Some(1));
    assert_eq!(snapshot.total, 1);
  }

  #[tokio::test]
  async fn test_matching_ignores_case() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("java.txt", &["Java is great"]).await;

    let snapshot = ctx.run_to_completion(ctx.request(file, &["java"], 2)).await;

    assert_eq!(snapshot.count("java"), Some(1));
    assert_eq!(snapshot.total, 1);
  }

  #[tokio::test]
  async fn test_absent_words_are_displayed_at_zero() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("mq.txt", &["ActiveMQ only"]).await;

    let snapshot = ctx
      .run_to_completion(ctx.request(file, &["Java", "ActiveMQ", "MOM"], 2))
      .await;

    assert_eq!(snapshot.count("Java"), Some(0));
    assert_eq!(snapshot.count("ActiveMQ"), Some(1));
    assert_eq!(snapshot.count("MOM"), Some(0));
    assert_eq!(snapshot.total, 1);
    assert!(ctx.sink.stats().contains("MOM             : 0"));
  }

  /// A word listed twice is matched twice but shown once.
  #[tokio::test]
  async fn test_duplicate_target_words_count_independently() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("dup.txt", &["Java"]).await;

    let snapshot = ctx.run_to_completion(ctx.request(file, &["Java", "Java"], 2)).await;

    assert_eq!(snapshot.counts.len(), 1);
    assert_eq!(snapshot.count("Java"), Some(2));
    assert_eq!(snapshot.total, 2);
  }

  /// Many lines over many workers and partitions: totals do not depend on
  /// how deliveries interleave.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_totals_hold_under_concurrent_delivery() {
    let ctx = PipelineTestContext::new();
    let lines: Vec<String> = (0..300)
      .map(|i| match i % 3 {
        0 => "Java Python Java".to_string(),
        1 => "MOM and python".to_string(),
        _ => "nothing to see".to_string(),
      })
      .collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let file = ctx.write_input("many.txt", &refs).await;

    let mut request = ctx.request(file, &["Java", "Python", "MOM"], 8);
    request.partitions = PartitionSpec::all(3).unwrap();
    let snapshot = ctx.run_to_completion(request).await;

    assert_eq!(snapshot.count("Java"), Some(200));
    assert_eq!(snapshot.count("Python"), Some(200));
    assert_eq!(snapshot.count("MOM"), Some(100));
    assert_eq!(snapshot.total, 500);
    assert_eq!(ctx.coordinator.metrics().unwrap().snapshot().lines_processed, 300);
  }

  #[tokio::test]
  async fn test_empty_file_yields_zero_totals() {
    let ctx = PipelineTestContext::new();
    let file = ctx.write_input("empty.txt", &[]).await;

    let snapshot = ctx.run_to_completion(ctx.request(file, &["Java"], 2)).await;

    assert_eq!(snapshot.total, 0);
    assert!(ctx.sink.errors().is_empty());
  }

  // ==========================================================================
  // Failures
  // ==========================================================================

  /// Missing input: one error line, nothing published, the rest stays idle.
  #[tokio::test]
  async fn test_missing_file_reports_single_error() {
    let ctx = PipelineTestContext::new();
    let request = ctx.request(ctx.missing_input(), &["Java", "Python"], 4);

    ctx.coordinator.start(request).await.expect("start tolerates a missing file");
    assert!(ctx.coordinator.wait_until_drained(TEST_TIMEOUT).await);

    let errors = ctx.sink.errors();
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert!(errors[0].starts_with(ERROR_PREFIX));
    assert!(errors[0].contains("does-not-exist.txt"));

    assert_eq!(ctx.coordinator.state(), CoordinatorState::Running);
    assert_eq!(ctx.coordinator.live_count(Role::Aggregator), 1);
    assert_eq!(ctx.coordinator.live_count(Role::Worker), 4);
    assert_eq!(ctx.coordinator.live_count(Role::Producer), 0);

    let metrics = ctx.coordinator.metrics().unwrap().snapshot();
    assert_eq!(metrics.lines_published, 0);
    assert_eq!(metrics.events_published, 0);
    assert_eq!(ctx.coordinator.snapshot().unwrap().total, 0);
    assert_eq!(ctx.broker.queue_depth("test.lines"), 0);

    ctx.coordinator.stop().await;
  }

  /// Messages that are not work items are skipped without stopping workers.
  #[tokio::test]
  async fn test_malformed_queue_message_is_skipped() {
    use crate::channel::{Message, MessageChannel};

    let ctx = PipelineTestContext::new();
    let request = ctx.request(ctx.missing_input(), &["Java"], 1);
    ctx.coordinator.start(request).await.unwrap();

    ctx
      .broker
      .publish_to_queue("test.lines", Message::text("no line number"))
      .await
      .unwrap();

    let metrics = ctx.coordinator.metrics().unwrap();
    assert!(wait_for(TEST_TIMEOUT, || metrics.snapshot().malformed_messages == 1).await);
    assert_eq!(ctx.coordinator.live_count(Role::Worker), 1);

    // The same worker still processes well-formed lines afterwards
    let line = {
      use momcount_core::WorkItem;

      use crate::channel::{MessageCodec, RUN_PROPERTY};
      WorkItem::new(1, "Java")
        .to_message()
        .with_property(RUN_PROPERTY, ctx.coordinator.run_id().unwrap())
    };
    ctx.broker.publish_to_queue("test.lines", line).await.unwrap();
    assert!(wait_for(TEST_TIMEOUT, || ctx.coordinator.snapshot().unwrap().total == 1).await);

    ctx.coordinator.stop().await;
  }

  #[tokio::test]
  async fn test_unreachable_broker_aborts_start() {
    use crate::actor::CoordinatorError;

    let ctx = PipelineTestContext::new();
    ctx.broker.set_available(false);
    let file = ctx.write_input("code.txt", &["Java"]).await;

    let err = ctx.coordinator.start(ctx.request(file, &["Java"], 2)).await.unwrap_err();

    assert!(matches!(err, CoordinatorError::Transport(_)), "got {:?}", err);
    assert_eq!(ctx.coordinator.state(), CoordinatorState::Idle);
    assert!(ctx.coordinator.live_components().is_empty());
    assert_eq!(ctx.broker.live_connections(), 0);
    assert!(!ctx.sink.errors().is_empty());
  }
}
