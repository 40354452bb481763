pub mod actor;
pub mod channel;
pub mod sink;

mod matcher;
pub use matcher::WordMatcher;

pub use actor::{AggregateSnapshot, Coordinator, CoordinatorError, CoordinatorSettings, CoordinatorState, Role};
pub use channel::{InMemoryBroker, MessageChannel, TransportError};
pub use sink::{ChannelSink, MemorySink, OutputSink, SinkEvent};
