//! In-process broker implementing [`MessageChannel`].
//!
//! Queues are a single unbounded mpsc channel whose receiver is shared by
//! all competing consumers. Topics keep one unbounded sender per subscriber
//! and copy each message to every sender present at publish time.

use std::sync::{
  Arc, LazyLock,
  atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

use super::{ConsumerHandle, DestinationKind, Message, MessageChannel, SubscriptionId, TransportError};

pub(super) const MEMORY_SCHEME: &str = "memory://";

/// Process-wide brokers, keyed by endpoint
static REGISTRY: LazyLock<DashMap<String, Arc<InMemoryBroker>>> = LazyLock::new(DashMap::new);

struct QueueState {
  tx: mpsc::UnboundedSender<Message>,
  rx: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
  /// Messages published but not yet taken by a consumer
  pending: Arc<AtomicUsize>,
  consumers: AtomicUsize,
}

impl QueueState {
  fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      tx,
      rx: Arc::new(Mutex::new(rx)),
      pending: Arc::new(AtomicUsize::new(0)),
      consumers: AtomicUsize::new(0),
    }
  }
}

/// An in-memory queue + topic broker.
///
/// Cheap to share behind an `Arc`; every operation is safe to call from
/// any task. [`InMemoryBroker::set_available`] simulates an outage for
/// testing failure paths.
pub struct InMemoryBroker {
  endpoint: String,
  available: AtomicBool,
  next_message_id: AtomicU64,
  next_subscription_id: AtomicU64,
  /// Open client connections, keyed by client id
  connections: DashMap<String, usize>,
  queues: DashMap<String, Arc<QueueState>>,
  topics: DashMap<String, Vec<(SubscriptionId, mpsc::UnboundedSender<Message>)>>,
}

impl InMemoryBroker {
  /// Create a standalone broker (not registered for [`super::open`]).
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self {
      endpoint: endpoint.into(),
      available: AtomicBool::new(true),
      next_message_id: AtomicU64::new(1),
      next_subscription_id: AtomicU64::new(1),
      connections: DashMap::new(),
      queues: DashMap::new(),
      topics: DashMap::new(),
    }
  }

  /// Get or create the process-wide broker for `endpoint`.
  pub fn shared(endpoint: &str) -> Arc<Self> {
    REGISTRY
      .entry(endpoint.to_string())
      .or_insert_with(|| Arc::new(Self::new(endpoint)))
      .value()
      .clone()
  }

  /// Toggle availability. While unavailable every call fails with
  /// [`TransportError::Unavailable`]; existing subscriptions keep their
  /// already-delivered messages.
  pub fn set_available(&self, available: bool) {
    self.available.store(available, Ordering::Release);
    debug!(endpoint = %self.endpoint, available, "Broker availability changed");
  }

  /// Messages waiting on `queue` for a consumer
  pub fn queue_depth(&self, queue: &str) -> usize {
    self
      .queues
      .get(queue)
      .map(|q| q.pending.load(Ordering::Acquire))
      .unwrap_or(0)
  }

  /// Consumers currently registered on `queue`
  pub fn queue_consumers(&self, queue: &str) -> usize {
    self
      .queues
      .get(queue)
      .map(|q| q.consumers.load(Ordering::Acquire))
      .unwrap_or(0)
  }

  /// Subscribers currently registered on `topic`
  pub fn subscriber_count(&self, topic: &str) -> usize {
    self.topics.get(topic).map(|subs| subs.len()).unwrap_or(0)
  }

  /// Total open client connections
  pub fn live_connections(&self) -> usize {
    self.connections.iter().map(|entry| *entry.value()).sum()
  }

  fn ensure_available(&self) -> Result<(), TransportError> {
    if self.available.load(Ordering::Acquire) {
      Ok(())
    } else {
      Err(TransportError::Unavailable {
        endpoint: self.endpoint.clone(),
      })
    }
  }

  fn queue(&self, name: &str) -> Arc<QueueState> {
    let entry = self
      .queues
      .entry(name.to_string())
      .or_insert_with(|| Arc::new(QueueState::new()));
    Arc::clone(entry.value())
  }

  fn stamp(&self, mut message: Message) -> Message {
    message.id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
    message
  }
}

#[async_trait::async_trait]
impl MessageChannel for InMemoryBroker {
  fn endpoint(&self) -> &str {
    &self.endpoint
  }

  async fn connect(&self, client_id: &str) -> Result<(), TransportError> {
    self.ensure_available()?;
    *self.connections.entry(client_id.to_string()).or_insert(0) += 1;
    trace!(client_id, "Client connected");
    Ok(())
  }

  async fn disconnect(&self, client_id: &str) {
    let remove = match self.connections.get_mut(client_id) {
      Some(mut count) => {
        *count = count.saturating_sub(1);
        *count == 0
      }
      None => false,
    };
    if remove {
      self.connections.remove_if(client_id, |_, count| *count == 0);
    }
    trace!(client_id, "Client disconnected");
  }

  async fn publish_to_queue(&self, destination: &str, message: Message) -> Result<(), TransportError> {
    self.ensure_available()?;
    let queue = self.queue(destination);
    let message = self.stamp(message);
    let id = message.id;

    queue.pending.fetch_add(1, Ordering::AcqRel);
    if queue.tx.send(message).is_err() {
      queue.pending.fetch_sub(1, Ordering::AcqRel);
      return Err(TransportError::SubscriptionClosed {
        destination: destination.to_string(),
      });
    }

    trace!(destination, message_id = id, "Queued message");
    Ok(())
  }

  async fn subscribe_to_queue(&self, destination: &str) -> Result<ConsumerHandle, TransportError> {
    self.ensure_available()?;
    let queue = self.queue(destination);
    queue.consumers.fetch_add(1, Ordering::AcqRel);
    let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);

    debug!(destination, subscription_id = id, "Queue consumer registered");
    Ok(ConsumerHandle::queue(
      id,
      destination,
      Arc::clone(&queue.rx),
      Arc::clone(&queue.pending),
    ))
  }

  async fn publish_to_topic(&self, destination: &str, message: Message) -> Result<(), TransportError> {
    self.ensure_available()?;
    let message = self.stamp(message);

    // No subscribers: the message is simply gone (no replay)
    let Some(mut subscribers) = self.topics.get_mut(destination) else {
      trace!(destination, message_id = message.id, "Topic has no subscribers");
      return Ok(());
    };

    // Prune subscribers whose handle was dropped without close()
    subscribers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
    trace!(
      destination,
      message_id = message.id,
      subscribers = subscribers.len(),
      "Published to topic"
    );
    Ok(())
  }

  async fn subscribe_to_topic(&self, destination: &str) -> Result<ConsumerHandle, TransportError> {
    self.ensure_available()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
    self.topics.entry(destination.to_string()).or_default().push((id, tx));

    debug!(destination, subscription_id = id, "Topic subscriber registered");
    Ok(ConsumerHandle::topic(id, destination, rx))
  }

  async fn close(&self, handle: ConsumerHandle) {
    match handle.kind() {
      DestinationKind::Queue => {
        if let Some(queue) = self.queues.get(handle.destination()) {
          let _ = queue
            .consumers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
      }
      DestinationKind::Topic => {
        if let Some(mut subscribers) = self.topics.get_mut(handle.destination()) {
          subscribers.retain(|(id, _)| *id != handle.id());
        }
      }
    }
    debug!(
      destination = handle.destination(),
      subscription_id = handle.id(),
      "Subscription closed"
    );
  }
}
