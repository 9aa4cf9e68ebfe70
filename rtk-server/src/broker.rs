//! # Pub/Sub Broker
//!
//! Channel name to subscriber registry. Each connection registers an
//! unbounded sender; `publish` pushes a ready-encoded frame to every sender
//! on the channel and prunes senders whose connection is gone.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::resp_message;

pub type PushSender = UnboundedSender<Bytes>;

#[derive(Debug, Default)]
pub struct Broker {
    channels: Mutex<HashMap<Vec<u8>, HashMap<u64, PushSender>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: &[u8], session: u64, sender: PushSender) {
        self.channels
            .lock()
            .entry(channel.to_vec())
            .or_default()
            .insert(session, sender);
    }

    pub fn unsubscribe(&self, channel: &[u8], session: u64) {
        let mut channels = self.channels.lock();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.remove(&session);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Delivers `payload` to every subscriber of `channel`. Returns how many
    /// received it.
    pub fn publish(&self, channel: &[u8], payload: &[u8]) -> i64 {
        let mut channels = self.channels.lock();
        let Some(subscribers) = channels.get_mut(channel) else {
            return 0;
        };

        let frame = Bytes::from(resp_message(channel, payload));
        subscribers.retain(|_, sender| sender.send(frame.clone()).is_ok());
        let delivered = subscribers.len() as i64;
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        delivered
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}
