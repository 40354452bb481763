//! Mapping between domain types and broker messages.
//!
//! Work items travel as text bodies with the line number in a property;
//! occurrence events travel as map bodies. Anything else is malformed.

use momcount_core::{OccurrenceEvent, WorkItem};
use serde_json::Value;

use super::{Message, MessageBody};

/// Property naming the run that produced a message
pub const RUN_PROPERTY: &str = "run";

/// Property carrying a work item's 1-based line number
pub const LINE_PROPERTY: &str = "line";

/// A message whose shape does not match what the receiver expects.
///
/// Always handled by logging and skipping the single message.
#[derive(Debug, thiserror::Error)]
pub enum MalformedMessageError {
  #[error("Expected a {expected} message, got {found}")]
  UnexpectedBody {
    expected: &'static str,
    found: &'static str,
  },
  #[error("Message is missing the '{0}' property")]
  MissingProperty(&'static str),
  #[error("Invalid payload: {0}")]
  InvalidPayload(#[from] serde_json::Error),
}

/// Conversion of a domain value to and from its broker representation
pub trait MessageCodec: Sized {
  fn to_message(&self) -> Message;
  fn from_message(message: &Message) -> Result<Self, MalformedMessageError>;
}

impl MessageCodec for WorkItem {
  fn to_message(&self) -> Message {
    Message::text(self.text.clone()).with_property(LINE_PROPERTY, self.line_number)
  }

  fn from_message(message: &Message) -> Result<Self, MalformedMessageError> {
    let MessageBody::Text(text) = &message.body else {
      return Err(MalformedMessageError::UnexpectedBody {
        expected: "text",
        found: message.body.kind(),
      });
    };
    let line_number = message
      .property_u64(LINE_PROPERTY)
      .ok_or(MalformedMessageError::MissingProperty(LINE_PROPERTY))?;
    Ok(WorkItem::new(line_number, text.clone()))
  }
}

impl MessageCodec for OccurrenceEvent {
  fn to_message(&self) -> Message {
    let mut map = serde_json::Map::new();
    map.insert("term".to_string(), Value::from(self.term.clone()));
    map.insert("count".to_string(), Value::from(self.count));
    map.insert("source_worker_id".to_string(), Value::from(self.source_worker_id));
    Message::map(map)
  }

  fn from_message(message: &Message) -> Result<Self, MalformedMessageError> {
    let MessageBody::Map(map) = &message.body else {
      return Err(MalformedMessageError::UnexpectedBody {
        expected: "map",
        found: message.body.kind(),
      });
    };
    Ok(serde_json::from_value(Value::Object(map.clone()))?)
  }
}
