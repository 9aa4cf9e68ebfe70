//! # Transport Contract
//!
//! Purpose: The narrow set of store capabilities the facade and the
//! subscriber rely on. `KVClient` provides it over RESP2; tests substitute
//! in-memory fakes.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Facade and subscriber are generic over `Transport`.
//! 2. **Bytes In, Bytes Out**: Encoding stays in the codec; the transport only
//!    moves opaque payloads.
//! 3. **Blocking Subscriptions**: `Subscription::next_message` blocks until a
//!    message arrives or the connection fails.

use crate::error::ClientResult;

/// Operations a backing store must offer.
pub trait Transport: Send + Sync + 'static {
    /// Fetches a value; `None` when the key is missing.
    fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>>;

    fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()>;

    /// Deletes a key. Returns true when a key was removed.
    fn delete(&self, key: &[u8]) -> ClientResult<bool>;

    /// Fetches several keys at once, in order.
    fn mget(&self, keys: &[&[u8]]) -> ClientResult<Vec<Option<Vec<u8>>>>;

    /// Sends all queued operations in one round trip. Not transactional.
    fn execute(&self, pipeline: &Pipeline) -> ClientResult<()>;

    /// Publishes a payload. Returns the number of receiving subscribers.
    fn publish(&self, channel: &str, payload: &[u8]) -> ClientResult<i64>;

    /// Opens a subscription to the given channels.
    fn subscribe(&self, channels: &[String]) -> ClientResult<Box<dyn Subscription>>;

    /// Liveness probe.
    fn ping(&self) -> ClientResult<()>;

    /// Releases pooled resources.
    fn close(&self);
}

/// A live subscription.
pub trait Subscription: Send {
    /// Blocks for the next message. `Ok(None)` means the stream ended.
    fn next_message(&mut self) -> ClientResult<Option<Message>>;
}

/// Kind of a pub/sub frame. Only `Message` carries user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Subscribe,
    Unsubscribe,
    Message,
    Other(String),
}

impl MessageKind {
    pub fn parse(tag: &[u8]) -> Self {
        match tag {
            b"subscribe" => MessageKind::Subscribe,
            b"unsubscribe" => MessageKind::Unsubscribe,
            b"message" => MessageKind::Message,
            other => MessageKind::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }
}

/// One frame received on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub channel: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// User-data message.
    pub fn data(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Message {
            kind: MessageKind::Message,
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Queued write operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl PipelineOp {
    /// RESP command arguments for this operation.
    pub fn to_command(&self) -> Vec<Vec<u8>> {
        match self {
            PipelineOp::Set { key, value } => vec![b"SET".to_vec(), key.clone(), value.clone()],
            PipelineOp::Delete { key } => vec![b"DEL".to_vec(), key.clone()],
        }
    }
}

/// Ordered batch of write operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(PipelineOp::Delete { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_keeps_order() {
        let mut pipe = Pipeline::new();
        pipe.set("a", "1").delete("b");
        assert_eq!(pipe.len(), 2);
        assert_eq!(
            pipe.ops()[0].to_command(),
            vec![b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]
        );
        assert_eq!(pipe.ops()[1].to_command(), vec![b"DEL".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn parses_message_kinds() {
        assert_eq!(MessageKind::parse(b"message"), MessageKind::Message);
        assert_eq!(MessageKind::parse(b"subscribe"), MessageKind::Subscribe);
        assert_eq!(
            MessageKind::parse(b"pmessage"),
            MessageKind::Other("pmessage".into())
        );
    }
}
