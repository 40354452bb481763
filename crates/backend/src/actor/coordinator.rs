//! Lifecycle coordinator - ordered startup, shutdown and restart of a run.
//!
//! ```text
//!          start()                 launched
//! Idle ───────────▶ Starting ───────────────▶ Running
//!  ▲                   │ not ready               │ start() / stop()
//!  │                   ▼                         ▼
//!  └──────────────── Stopping ◀──────────────────┘
//! ```
//!
//! Startup order is aggregator, then workers, then producers. Each step
//! waits for the previous components to report that they are subscribed,
//! so no producer publishes before the aggregator can see the results.

use std::{
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use momcount_core::{Config, ConfigError, RunRequest};
use serde::Serialize;
use tokio::{
  sync::{oneshot, watch},
  time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
  aggregator::{AggregateSnapshot, AggregateState, Aggregator},
  component::{ComponentError, ComponentHandle, PipelineContext, Role},
  metrics::PipelineMetrics,
  producer::LineProducer,
  worker::OccurrenceWorker,
};
use crate::{
  channel::{MessageChannel, TransportError},
  matcher::WordMatcher,
  sink::{ERROR_PREFIX, OutputSink},
};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
  Idle,
  Starting,
  Running,
  Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
  #[error("Invalid run configuration: {0}")]
  Config(#[from] ConfigError),
  #[error("Invalid target word: {0}")]
  Pattern(#[from] regex::Error),
  #[error("The {role} did not become ready in time")]
  NotReady { role: Role },
  #[error("Transport error: {0}")]
  Transport(#[from] TransportError),
}

/// Destinations and timing used by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
  pub line_queue: String,
  pub result_topic: String,
  /// Upper bound on waiting for the aggregator and workers to subscribe
  pub readiness_timeout: Duration,
  /// How long stopped components get before they are aborted
  pub shutdown_grace: Duration,
}

impl From<&Config> for CoordinatorSettings {
  fn from(config: &Config) -> Self {
    Self {
      line_queue: config.channel.line_queue.clone(),
      result_topic: config.channel.result_topic.clone(),
      readiness_timeout: config.pipeline.readiness_timeout(),
      shutdown_grace: config.pipeline.shutdown_grace(),
    }
  }
}

impl Default for CoordinatorSettings {
  fn default() -> Self {
    Self::from(&Config::default())
  }
}

/// The most recent run's shared state; kept after stop so results stay readable.
#[derive(Clone)]
struct RunState {
  run_id: String,
  metrics: Arc<PipelineMetrics>,
  aggregate: Arc<AggregateState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every component of the current run.
///
/// `start` and `stop` serialise on an internal async lock, so however many
/// restarts are issued concurrently, at most one instance of each role set
/// is live afterwards.
pub struct Coordinator {
  channel: Arc<dyn MessageChannel>,
  sink: Arc<dyn OutputSink>,
  settings: CoordinatorSettings,
  lifecycle: tokio::sync::Mutex<()>,
  state: watch::Sender<CoordinatorState>,
  handles: Mutex<Vec<ComponentHandle>>,
  current: Mutex<Option<RunState>>,
}

impl Coordinator {
  pub fn new(channel: Arc<dyn MessageChannel>, sink: Arc<dyn OutputSink>, settings: CoordinatorSettings) -> Self {
    let (state, _) = watch::channel(CoordinatorState::Idle);
    Self {
      channel,
      sink,
      settings,
      lifecycle: tokio::sync::Mutex::new(()),
      state,
      handles: Mutex::new(Vec::new()),
      current: Mutex::new(None),
    }
  }

  pub fn state(&self) -> CoordinatorState {
    *self.state.borrow()
  }

  /// Observe state transitions
  pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
    self.state.subscribe()
  }

  fn set_state(&self, state: CoordinatorState) {
    let previous = self.state.send_replace(state);
    debug!(?previous, ?state, "Coordinator state changed");
  }

  /// Components still running, by role
  pub fn live_components(&self) -> Vec<(Role, String)> {
    lock(&self.handles)
      .iter()
      .filter(|h| !h.is_finished())
      .map(|h| (h.role(), h.name().to_string()))
      .collect()
  }

  pub fn live_count(&self, role: Role) -> usize {
    lock(&self.handles)
      .iter()
      .filter(|h| h.role() == role && !h.is_finished())
      .count()
  }

  pub fn run_id(&self) -> Option<String> {
    lock(&self.current).as_ref().map(|run| run.run_id.clone())
  }

  pub fn metrics(&self) -> Option<Arc<PipelineMetrics>> {
    lock(&self.current).as_ref().map(|run| Arc::clone(&run.metrics))
  }

  /// Current aggregate of the most recent run
  pub fn snapshot(&self) -> Option<AggregateSnapshot> {
    lock(&self.current).as_ref().map(|run| run.aggregate.snapshot())
  }

  /// Wait until the current run has nothing left in flight.
  ///
  /// Returns `false` on timeout or when no run was ever started.
  pub async fn wait_until_drained(&self, timeout: Duration) -> bool {
    let Some(metrics) = self.metrics() else {
      return false;
    };
    tokio::time::timeout(timeout, async {
      while !metrics.is_drained() {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
      }
    })
    .await
    .is_ok()
  }

  /// Start a run, stopping the current one first.
  ///
  /// Returns the new run id. On error every component that was launched is
  /// stopped again and the coordinator is back to `Idle`.
  pub async fn start(&self, request: RunRequest) -> Result<String, CoordinatorError> {
    validate(&request)?;
    let matcher = WordMatcher::new(&request.words)?;

    let _guard = self.lifecycle.lock().await;
    self.shutdown().await;

    self.set_state(CoordinatorState::Starting);
    self.sink.reset();

    let run = RunState {
      run_id: uuid::Uuid::new_v4().to_string(),
      metrics: Arc::new(PipelineMetrics::new()),
      aggregate: Arc::new(AggregateState::seeded(&request.distinct_words())),
    };
    *lock(&self.current) = Some(run.clone());

    let ctx = PipelineContext {
      channel: Arc::clone(&self.channel),
      sink: Arc::clone(&self.sink),
      metrics: Arc::clone(&run.metrics),
      run_id: run.run_id.clone(),
      line_queue: self.settings.line_queue.clone(),
      result_topic: self.settings.result_topic.clone(),
    };

    info!(
      run_id = %run.run_id,
      file = %request.file.display(),
      workers = request.workers,
      partitions = request.partitions.len(),
      "Starting run"
    );

    match self.launch(&request, matcher, run.aggregate, ctx).await {
      Ok(()) => {
        self.set_state(CoordinatorState::Running);
        Ok(run.run_id)
      }
      Err(e) => {
        error!(run_id = %run.run_id, error = %e, "Run failed to start");
        self.sink.append_log(&format!("{} {}", ERROR_PREFIX, e));
        self.shutdown().await;
        Err(e)
      }
    }
  }

  /// Stop every component of the current run. A no-op when idle.
  pub async fn stop(&self) {
    let _guard = self.lifecycle.lock().await;
    self.shutdown().await;
  }

  async fn launch(
    &self,
    request: &RunRequest,
    matcher: WordMatcher,
    aggregate: Arc<AggregateState>,
    ctx: PipelineContext,
  ) -> Result<(), CoordinatorError> {
    let deadline = Instant::now() + self.settings.readiness_timeout;

    // Aggregator first: the topic does not replay
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    let aggregator = Aggregator::new(aggregate, ctx.clone());
    self.track(ComponentHandle::spawn(
      Role::Aggregator,
      "aggregator",
      cancel.clone(),
      aggregator.run(cancel, Some(ready_tx)),
    ));
    match wait_ready(ready_rx, deadline).await {
      Readiness::Ready => {}
      Readiness::Exited => return Err(self.startup_failure(Role::Aggregator, Some("aggregator")).await),
      Readiness::TimedOut => return Err(self.startup_failure(Role::Aggregator, None).await),
    }

    let mut pending = Vec::with_capacity(request.workers);
    for id in 1..=request.workers {
      let cancel = CancellationToken::new();
      let (ready_tx, ready_rx) = oneshot::channel();
      let name = format!("worker {}", id);
      let worker = OccurrenceWorker::new(id, matcher.clone(), ctx.clone());
      self.track(ComponentHandle::spawn(
        Role::Worker,
        name.clone(),
        cancel.clone(),
        worker.run(cancel, Some(ready_tx)),
      ));
      pending.push((name, ready_rx));
    }

    let mut ready = 0;
    let mut first_exited = None;
    for (name, ready_rx) in pending {
      match wait_ready(ready_rx, deadline).await {
        Readiness::Ready => ready += 1,
        Readiness::Exited => {
          first_exited.get_or_insert(name);
        }
        Readiness::TimedOut => {}
      }
    }
    if ready == 0 {
      return Err(self.startup_failure(Role::Worker, first_exited.as_deref()).await);
    }
    if ready < request.workers {
      warn!(ready, expected = request.workers, "Not every worker became ready");
      self.sink.append_log(&format!(
        "[Coordinator] Only {} of {} workers are ready; continuing.",
        ready, request.workers
      ));
    }

    // Checked once here so a missing file yields a single error, not one per producer
    if !tokio::fs::try_exists(&request.file).await.unwrap_or(false) {
      error!(path = %request.file.display(), "Input file not found, no producers started");
      self.sink.append_log(&format!(
        "{} Input file not found: {}",
        ERROR_PREFIX,
        request.file.display()
      ));
      return Ok(());
    }

    ctx.metrics.expect_producers(request.partitions.len());
    for partition in &request.partitions {
      let cancel = CancellationToken::new();
      let producer = LineProducer::new(request.file.clone(), *partition, ctx.clone());
      self.track(ComponentHandle::spawn(
        Role::Producer,
        format!("producer ({})", partition),
        cancel.clone(),
        producer.run(cancel),
      ));
    }

    Ok(())
  }

  fn track(&self, handle: ComponentHandle) {
    lock(&self.handles).push(handle);
  }

  /// Explain why `role` never became ready.
  ///
  /// `exited` names a component of that role that ended before signalling
  /// ready; its own error (usually a transport failure) is reported.
  async fn startup_failure(&self, role: Role, exited: Option<&str>) -> CoordinatorError {
    let Some(name) = exited else {
      return CoordinatorError::NotReady { role };
    };
    let handle = {
      let mut handles = lock(&self.handles);
      let position = handles.iter().position(|h| h.name() == name);
      position.map(|i| handles.remove(i))
    };
    let Some(handle) = handle else {
      return CoordinatorError::NotReady { role };
    };
    match handle.join_within(Instant::now() + self.settings.shutdown_grace).await {
      Some(Err(ComponentError::Transport(e))) => CoordinatorError::Transport(e),
      _ => CoordinatorError::NotReady { role },
    }
  }

  /// Cancel every tracked component and wait for them within the grace period.
  async fn shutdown(&self) {
    let handles = std::mem::take(&mut *lock(&self.handles));
    if handles.is_empty() && self.state() == CoordinatorState::Idle {
      return;
    }

    self.set_state(CoordinatorState::Stopping);
    let count = handles.len();
    for handle in &handles {
      handle.cancel();
    }

    let deadline = Instant::now() + self.settings.shutdown_grace;
    let outcomes = futures::future::join_all(handles.into_iter().map(|h| h.stop(deadline))).await;
    let aborted = outcomes.iter().filter(|stopped| !**stopped).count();
    if aborted > 0 {
      warn!(aborted, "Components aborted after the grace period");
    }

    info!(components = count, aborted, "Run stopped");
    self.set_state(CoordinatorState::Idle);
  }
}

fn validate(request: &RunRequest) -> Result<(), ConfigError> {
  if request.file.as_os_str().is_empty() {
    return Err(ConfigError::MissingFile);
  }
  if request.words.is_empty() {
    return Err(ConfigError::MissingWords);
  }
  if request.workers == 0 {
    return Err(ConfigError::InvalidWorkerCount(0));
  }
  if request.partitions.is_empty() {
    return Err(ConfigError::InvalidPartitionCount(0));
  }
  Ok(())
}

enum Readiness {
  Ready,
  /// The component dropped its ready signal, i.e. it has already ended
  Exited,
  TimedOut,
}

async fn wait_ready(ready: oneshot::Receiver<()>, deadline: Instant) -> Readiness {
  match tokio::time::timeout_at(deadline, ready).await {
    Ok(Ok(())) => Readiness::Ready,
    Ok(Err(_)) => Readiness::Exited,
    Err(_) => Readiness::TimedOut,
  }
}
