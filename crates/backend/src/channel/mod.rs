//! Message channel abstraction.
//!
//! Two delivery primitives sit behind one trait:
//!
//! - **Work queue**: each message goes to exactly one of the consumers
//!   subscribed to the queue. Messages published while nobody listens are
//!   buffered until a consumer attaches.
//! - **Topic**: each message goes to every consumer subscribed at publish
//!   time. There is no replay, so a late subscriber misses what came before.
//!
//! ```text
//! Producer ──▶ [queue] ──▶ Worker (1 of N) ──▶ [topic] ──▶ Aggregator (all)
//! ```
//!
//! The broker is an external collaborator; [`InMemoryBroker`] is the
//! built-in implementation used by the CLI and the tests.

mod codec;
mod memory;

use std::{
  collections::BTreeMap,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

pub use self::{
  codec::{LINE_PROPERTY, MalformedMessageError, MessageCodec, RUN_PROPERTY},
  memory::InMemoryBroker,
};

/// Identifier of a single subscription on a broker
pub type SubscriptionId = u64;

// ============================================================================
// Errors
// ============================================================================

/// Failure to reach or use the broker.
///
/// Callers treat this as recoverable per call: a failed publish drops that
/// one message, a failed initial connection ends the component.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
  #[error("Broker unavailable at {endpoint}")]
  Unavailable { endpoint: String },
  #[error("Unsupported broker endpoint: {0}")]
  UnsupportedEndpoint(String),
  #[error("Subscription to {destination} was closed")]
  SubscriptionClosed { destination: String },
}

// ============================================================================
// Messages
// ============================================================================

/// Message body, mirroring the two shapes the pipeline exchanges
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
  /// Plain text (work items)
  Text(String),
  /// Key/value map (occurrence events)
  Map(serde_json::Map<String, Value>),
}

impl MessageBody {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Text(_) => "text",
      Self::Map(_) => "map",
    }
  }
}

/// A message as carried by the broker.
///
/// `id` is assigned by the broker on publish; properties carry metadata
/// such as the source line number or the run that produced the message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
  pub id: u64,
  pub properties: BTreeMap<String, Value>,
  pub body: MessageBody,
}

impl Message {
  pub fn text(text: impl Into<String>) -> Self {
    Self {
      id: 0,
      properties: BTreeMap::new(),
      body: MessageBody::Text(text.into()),
    }
  }

  pub fn map(map: serde_json::Map<String, Value>) -> Self {
    Self {
      id: 0,
      properties: BTreeMap::new(),
      body: MessageBody::Map(map),
    }
  }

  pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.properties.insert(key.into(), value.into());
    self
  }

  pub fn property_u64(&self, key: &str) -> Option<u64> {
    self.properties.get(key).and_then(Value::as_u64)
  }

  pub fn property_str(&self, key: &str) -> Option<&str> {
    self.properties.get(key).and_then(Value::as_str)
  }
}

// ============================================================================
// Consumer Handle
// ============================================================================

/// Which delivery primitive a subscription is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
  Queue,
  Topic,
}

enum Inbox {
  /// Competing consumers pull from one receiver; the lock hands it to
  /// waiting consumers in FIFO order.
  Shared {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    pending: Arc<AtomicUsize>,
  },
  /// A private copy of every message published to a topic.
  Owned(mpsc::UnboundedReceiver<Message>),
}

/// A live subscription to a queue or topic.
///
/// Dropping the handle stops delivery to it; [`MessageChannel::close`]
/// additionally deregisters it from the broker's bookkeeping.
pub struct ConsumerHandle {
  id: SubscriptionId,
  destination: String,
  kind: DestinationKind,
  inbox: Inbox,
}

impl std::fmt::Debug for ConsumerHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConsumerHandle")
      .field("id", &self.id)
      .field("destination", &self.destination)
      .field("kind", &self.kind)
      .finish()
  }
}

impl ConsumerHandle {
  /// A competing-consumer subscription on a shared receiver.
  ///
  /// `pending` is decremented for every message taken from the queue.
  pub fn queue(
    id: SubscriptionId,
    destination: impl Into<String>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    pending: Arc<AtomicUsize>,
  ) -> Self {
    Self {
      id,
      destination: destination.into(),
      kind: DestinationKind::Queue,
      inbox: Inbox::Shared { rx, pending },
    }
  }

  /// A broadcast subscription with its own receiver.
  pub fn topic(id: SubscriptionId, destination: impl Into<String>, rx: mpsc::UnboundedReceiver<Message>) -> Self {
    Self {
      id,
      destination: destination.into(),
      kind: DestinationKind::Topic,
      inbox: Inbox::Owned(rx),
    }
  }

  pub fn id(&self) -> SubscriptionId {
    self.id
  }

  pub fn destination(&self) -> &str {
    &self.destination
  }

  pub fn kind(&self) -> DestinationKind {
    self.kind
  }

  /// Wait for the next message.
  ///
  /// Returns `None` once the subscription is closed. Cancel-safe: if the
  /// future is dropped before completing, no message is lost.
  pub async fn recv(&mut self) -> Option<Message> {
    match &mut self.inbox {
      Inbox::Shared { rx, pending } => {
        let msg = rx.lock().await.recv().await;
        if msg.is_some() {
          pending.fetch_sub(1, Ordering::AcqRel);
        }
        msg
      }
      Inbox::Owned(rx) => rx.recv().await,
    }
  }
}

// ============================================================================
// Channel Trait
// ============================================================================

/// The broker contract the pipeline is written against.
///
/// Implementations must be safe to share across tasks.
#[async_trait::async_trait]
pub trait MessageChannel: Send + Sync {
  /// Endpoint this channel talks to (for logs)
  fn endpoint(&self) -> &str;

  /// Open a client connection. Components call this once at startup and
  /// terminate if it fails.
  async fn connect(&self, client_id: &str) -> Result<(), TransportError>;

  /// Release a client connection. Never fails.
  async fn disconnect(&self, client_id: &str);

  /// Deliver `message` to exactly one consumer of `destination`.
  async fn publish_to_queue(&self, destination: &str, message: Message) -> Result<(), TransportError>;

  /// Join the competing consumers of `destination`.
  async fn subscribe_to_queue(&self, destination: &str) -> Result<ConsumerHandle, TransportError>;

  /// Deliver a copy of `message` to every current subscriber of `destination`.
  async fn publish_to_topic(&self, destination: &str, message: Message) -> Result<(), TransportError>;

  /// Subscribe to every message published to `destination` from now on.
  async fn subscribe_to_topic(&self, destination: &str) -> Result<ConsumerHandle, TransportError>;

  /// Deregister a subscription.
  async fn close(&self, handle: ConsumerHandle);
}

/// Open a channel for the configured endpoint.
///
/// `memory://` endpoints resolve to one process-wide broker per endpoint,
/// so every component opened with the same endpoint shares destinations.
pub fn open(endpoint: &str) -> Result<Arc<dyn MessageChannel>, TransportError> {
  if endpoint.starts_with(memory::MEMORY_SCHEME) {
    return Ok(InMemoryBroker::shared(endpoint));
  }
  Err(TransportError::UnsupportedEndpoint(endpoint.to_string()))
}
