//! In-memory transport for unit tests, with switches for injecting failures.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{ClientError, ClientResult};
use crate::subscriber::CONTROL_CHANNEL;
use crate::transport::{Message, MessageKind, Pipeline, PipelineOp, Subscription, Transport};

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

struct FakeSubscriber {
    channels: Vec<String>,
    sender: mpsc::Sender<ClientResult<Message>>,
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    store: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    subscribers: Mutex<Vec<FakeSubscriber>>,
    down: AtomicBool,
    drop_control: AtomicBool,
    flaky_calls: AtomicUsize,
    fail_subscribe: Mutex<Option<ClientError>>,
    subscribe_calls: AtomicUsize,
    pings: AtomicUsize,
    writes: AtomicUsize,
    pipelines: AtomicUsize,
    closed: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// While down every call fails with a refused connection, and open
    /// subscriptions are torn down with a reset.
    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
        if down {
            for subscriber in self.subscribers.lock().drain(..) {
                let reset = io::Error::from(io::ErrorKind::ConnectionReset);
                let _ = subscriber.sender.send(Err(ClientError::Io(reset)));
            }
        }
    }

    /// The next `calls` data operations fail with a closed connection.
    pub(crate) fn fail_next_calls(&self, calls: usize) {
        self.flaky_calls.store(calls, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_subscribe(&self, err: ClientError) {
        *self.fail_subscribe.lock() = Some(err);
    }

    /// Swallows publishes on the control channel.
    pub(crate) fn drop_control_messages(&self, drop: bool) {
        self.drop_control.store(drop, Ordering::SeqCst);
    }

    pub(crate) fn raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.lock().get(key).cloned()
    }

    pub(crate) fn insert_raw(&self, key: &[u8], value: &[u8]) {
        self.store.lock().insert(key.to_vec(), value.to_vec());
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Store mutations, counting each pipeline operation.
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn pipelines(&self) -> usize {
        self.pipelines.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> ClientResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ClientError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)));
        }
        let flaky = self
            .flaky_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if flaky.is_ok() {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }
}

impl Transport for FakeTransport {
    fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.raw(key))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert_raw(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.lock().remove(key).is_some())
    }

    fn mget(&self, keys: &[&[u8]]) -> ClientResult<Vec<Option<Vec<u8>>>> {
        self.check()?;
        let store = self.store.lock();
        Ok(keys.iter().map(|key| store.get(*key).cloned()).collect())
    }

    fn execute(&self, pipeline: &Pipeline) -> ClientResult<()> {
        self.check()?;
        self.pipelines.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.lock();
        for op in pipeline.ops() {
            self.writes.fetch_add(1, Ordering::SeqCst);
            match op {
                PipelineOp::Set { key, value } => {
                    store.insert(key.clone(), value.clone());
                }
                PipelineOp::Delete { key } => {
                    store.remove(key);
                }
            }
        }
        Ok(())
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> ClientResult<i64> {
        self.check()?;
        if channel == CONTROL_CHANNEL && self.drop_control.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut delivered = 0;
        self.subscribers.lock().retain(|subscriber| {
            if !subscriber.channels.iter().any(|c| c == channel) {
                return true;
            }
            let sent = subscriber
                .sender
                .send(Ok(Message::data(channel, payload)))
                .is_ok();
            if sent {
                delivered += 1;
            }
            sent
        });
        Ok(delivered)
    }

    fn subscribe(&self, channels: &[String]) -> ClientResult<Box<dyn Subscription>> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_subscribe.lock().take() {
            return Err(err);
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(ClientError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)));
        }

        let (sender, receiver) = mpsc::channel();
        for (index, channel) in channels.iter().enumerate() {
            let confirmation = Message {
                kind: MessageKind::Subscribe,
                channel: channel.clone(),
                payload: (index + 1).to_string().into_bytes(),
            };
            let _ = sender.send(Ok(confirmation));
        }
        self.subscribers.lock().push(FakeSubscriber {
            channels: channels.to_vec(),
            sender,
        });
        Ok(Box::new(FakeSubscription { receiver }))
    }

    fn ping(&self) -> ClientResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ClientError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)));
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeSubscription {
    receiver: mpsc::Receiver<ClientResult<Message>>,
}

impl Subscription for FakeSubscription {
    fn next_message(&mut self) -> ClientResult<Option<Message>> {
        match self.receiver.recv() {
            Ok(message) => message.map(Some),
            Err(mpsc::RecvError) => Ok(None),
        }
    }
}
