//! Shared plumbing for pipeline components.

use std::{fmt, future::Future, path::PathBuf, sync::Arc};

use serde::Serialize;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::metrics::PipelineMetrics;
use crate::{
  channel::{MessageChannel, TransportError},
  sink::OutputSink,
};

/// The kind of unit a [`ComponentHandle`] runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Producer,
  Worker,
  Aggregator,
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Producer => write!(f, "producer"),
      Self::Worker => write!(f, "worker"),
      Self::Aggregator => write!(f, "aggregator"),
    }
  }
}

/// How a component finished when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentExit {
  /// Ran to the end of its input
  Completed,
  /// Stopped because its cancellation token fired
  Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
  #[error("Input file not found: {}", .0.display())]
  FileNotFound(PathBuf),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Transport error: {0}")]
  Transport(#[from] TransportError),
  #[error("Component task panicked: {0}")]
  Panicked(String),
}

/// Everything the components of one run share.
#[derive(Clone)]
pub struct PipelineContext {
  pub channel: Arc<dyn MessageChannel>,
  pub sink: Arc<dyn OutputSink>,
  pub metrics: Arc<PipelineMetrics>,
  /// Stamped on every message so a run ignores leftovers of earlier runs
  pub run_id: String,
  pub line_queue: String,
  pub result_topic: String,
}

impl PipelineContext {
  /// Whether `message_run` (a message's run property, if any) belongs to this run.
  ///
  /// Messages without a run property come from outside the pipeline and
  /// are accepted.
  pub fn is_current(&self, message_run: Option<&str>) -> bool {
    message_run.is_none_or(|run| run == self.run_id)
  }
}

// ============================================================================
// Component Handle
// ============================================================================

type ComponentResult = Result<ComponentExit, ComponentError>;

/// A spawned component tracked by the coordinator.
///
/// Lifecycle: created on spawn, cancelled on stop, reclaimed once its task
/// has been joined (or aborted after the grace period).
pub struct ComponentHandle {
  role: Role,
  name: String,
  cancel: CancellationToken,
  join: JoinHandle<ComponentResult>,
}

impl fmt::Debug for ComponentHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ComponentHandle")
      .field("role", &self.role)
      .field("name", &self.name)
      .field("finished", &self.join.is_finished())
      .finish()
  }
}

impl ComponentHandle {
  /// Spawn `task` onto the runtime. `cancel` must be the token `task` observes.
  pub fn spawn<F>(role: Role, name: impl Into<String>, cancel: CancellationToken, task: F) -> Self
  where
    F: Future<Output = ComponentResult> + Send + 'static,
  {
    let name = name.into();
    debug!(%role, name = %name, "Spawning component");
    Self {
      role,
      name,
      cancel,
      join: tokio::spawn(task),
    }
  }

  pub fn role(&self) -> Role {
    self.role
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_finished(&self) -> bool {
    self.join.is_finished()
  }

  /// Request cooperative termination.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  /// Wait for the task until `deadline`, aborting it if it is still running then.
  ///
  /// Returns `None` when the task had to be aborted.
  pub async fn join_within(mut self, deadline: Instant) -> Option<ComponentResult> {
    match tokio::time::timeout_at(deadline, &mut self.join).await {
      Ok(Ok(result)) => Some(result),
      Ok(Err(e)) if e.is_cancelled() => Some(Ok(ComponentExit::Interrupted)),
      Ok(Err(e)) => Some(Err(ComponentError::Panicked(e.to_string()))),
      Err(_) => {
        warn!(role = %self.role, name = %self.name, "Component did not finish in time, aborting");
        self.join.abort();
        let _ = (&mut self.join).await;
        None
      }
    }
  }

  /// Cancel and wait until `deadline`; abort the task if it is still running then.
  ///
  /// Returns `true` if the component stopped on its own.
  pub async fn stop(self, deadline: Instant) -> bool {
    self.cancel.cancel();
    let (role, name) = (self.role, self.name.clone());
    match self.join_within(deadline).await {
      Some(Err(e)) => {
        debug!(%role, name = %name, error = %e, "Component had failed before stop");
        true
      }
      Some(Ok(_)) => true,
      None => false,
    }
  }
}
