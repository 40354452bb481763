//! Pipeline components
//!
//! Every component is a long-lived task with its own receive loop and its
//! own `CancellationToken`. Components never share mutable state except
//! through the channel, the sink, and the aggregator's atomic counters.
//!
//! # Data flow
//!
//! ```text
//! LineProducer (1 per partition)
//!      │ publish_to_queue
//!      ▼
//! [line queue] ──▶ OccurrenceWorker (1 of N) ──publish_to_topic──▶ [result topic]
//!                                                                     │
//!                                                                     ▼
//!                                                      Aggregator ──▶ OutputSink
//! ```
//!
//! # Components
//!
//! - [`LineProducer`]: reads one partition of the input file
//! - [`OccurrenceWorker`]: whole-word matching, one event per occurrence
//! - [`Aggregator`]: merges events into [`AggregateState`]
//! - [`Coordinator`]: startup ordering, readiness barrier, stop and restart

mod aggregator;
mod component;
mod coordinator;
mod metrics;
mod producer;
mod worker;

#[cfg(test)]
mod __tests__;

pub use aggregator::{AggregateSnapshot, AggregateState, Aggregator, TermCount};
pub use component::{ComponentError, ComponentExit, ComponentHandle, PipelineContext, Role};
pub use coordinator::{Coordinator, CoordinatorError, CoordinatorSettings, CoordinatorState};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use producer::LineProducer;
pub use worker::OccurrenceWorker;
