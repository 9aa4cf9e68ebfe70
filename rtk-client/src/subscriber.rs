//! # Subscriber Manager
//!
//! Purpose: Run one background listener per manager that subscribes to a set
//! of channels, decodes each message and hands it to a user handler.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Starting -> Listening <-> Reconnecting
//!                         |
//!                      Stopping -> Idle
//! ```
//!
//! ## Design Principles
//! 1. **Cooperative Shutdown**: `stop` clears the run flag, then publishes a
//!    sentinel on the reserved control channel. The listener is blocked in a
//!    read, and the sentinel is what wakes it up.
//! 2. **Per-Run State**: Every `start` gets a fresh `Run`. A listener that
//!    outlived a `stop` timeout keeps its own, already-stopped flag and cannot
//!    be confused with a later run.
//! 3. **Fault Isolation**: Handler errors and panics are logged per message;
//!    transport failures lead to reconnecting, never to an exit.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rtk_common::Value;
use tracing::{debug, error, info, warn};

use crate::error::ClientResult;
use crate::logging::Logger;
use crate::options::ToolkitOptions;
use crate::transport::{Message, MessageKind, Transport};

/// Reserved channel used only for shutdown signalling.
pub const CONTROL_CHANNEL: &str = "__redis_toolkit_stop__";

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Observable listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriberState {
    Idle = 0,
    Starting = 1,
    Listening = 2,
    Reconnecting = 3,
    Stopping = 4,
}

impl SubscriberState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SubscriberState::Starting,
            2 => SubscriberState::Listening,
            3 => SubscriberState::Reconnecting,
            4 => SubscriberState::Stopping,
            _ => SubscriberState::Idle,
        }
    }
}

/// Receives decoded messages. Errors are logged and do not stop the listener.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, channel: &str, value: Value) -> anyhow::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&str, Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, channel: &str, value: Value) -> anyhow::Result<()> {
        self(channel, value)
    }
}

/// Listener timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberSettings {
    /// Pause after an unexpected failure before subscribing again.
    pub retry_delay: Duration,
    /// Interval between liveness probes while the store is unreachable.
    pub poll_interval: Duration,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self::from(&ToolkitOptions::default())
    }
}

impl From<&ToolkitOptions> for SubscriberSettings {
    fn from(options: &ToolkitOptions) -> Self {
        SubscriberSettings {
            retry_delay: options.subscriber_retry_delay,
            poll_interval: options.reconnect_poll_interval,
        }
    }
}

/// State shared between one listener thread and the manager.
struct Run {
    running: AtomicBool,
    state: AtomicU8,
    exited: Mutex<bool>,
    signal: Condvar,
    token: Vec<u8>,
}

impl Run {
    fn new(id: u64) -> Self {
        Run {
            running: AtomicBool::new(true),
            state: AtomicU8::new(SubscriberState::Starting as u8),
            exited: Mutex::new(false),
            signal: Condvar::new(),
            token: format!("stop:{}:{}", std::process::id(), id).into_bytes(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn state(&self) -> SubscriberState {
        SubscriberState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Records a transition unless a stop was already requested.
    fn enter(&self, state: SubscriberState) {
        if self.is_running() {
            self.state.store(state as u8, Ordering::Release);
        }
    }

    fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.state.store(SubscriberState::Stopping as u8, Ordering::Release);
        let _exited = self.exited.lock();
        self.signal.notify_all();
    }

    /// Sleeps for `delay` or until a stop is requested.
    fn pause(&self, delay: Duration) {
        let mut exited = self.exited.lock();
        self.signal
            .wait_while_for(&mut exited, |_| self.is_running(), delay);
    }

    fn mark_exited(&self) {
        self.state.store(SubscriberState::Idle as u8, Ordering::Release);
        let mut exited = self.exited.lock();
        *exited = true;
        self.signal.notify_all();
    }

    /// Waits up to `timeout` for the listener to exit.
    fn wait_exited(&self, timeout: Duration) -> bool {
        let mut exited = self.exited.lock();
        if !*exited {
            self.signal
                .wait_while_for(&mut exited, |done| !*done, timeout);
        }
        *exited
    }
}

struct Active {
    run: Arc<Run>,
    handle: JoinHandle<()>,
}

/// Owns at most one background listener.
pub struct SubscriberManager<T: Transport> {
    transport: Arc<T>,
    settings: SubscriberSettings,
    logger: Logger,
    active: Mutex<Option<Active>>,
}

impl<T: Transport> SubscriberManager<T> {
    pub fn new(transport: Arc<T>, settings: SubscriberSettings, logger: Logger) -> Self {
        SubscriberManager {
            transport,
            settings,
            logger,
            active: Mutex::new(None),
        }
    }

    /// Current listener state; `Idle` when nothing is running.
    pub fn state(&self) -> SubscriberState {
        match self.active.lock().as_ref() {
            Some(active) => active.run.state(),
            None => SubscriberState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| active.run.is_running() && !active.handle.is_finished())
    }

    /// Starts listening on `channels`. Returns false without spawning when
    /// `channels` is empty or a listener is already running.
    pub fn start<F>(&self, channels: &[String], handler: F) -> bool
    where
        F: Fn(&str, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.start_handler(channels, Arc::new(handler))
    }

    /// Like `start`, for handlers already behind a trait object.
    pub fn start_handler(&self, channels: &[String], handler: Arc<dyn MessageHandler>) -> bool {
        self.logger.scope(|| self.spawn_listener(channels, handler))
    }

    fn spawn_listener(&self, channels: &[String], handler: Arc<dyn MessageHandler>) -> bool {
        let channels: Vec<String> = channels
            .iter()
            .filter(|channel| channel.as_str() != CONTROL_CHANNEL)
            .cloned()
            .collect();
        if channels.is_empty() {
            info!("no channels to subscribe");
            return false;
        }

        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.run.is_running() && !current.handle.is_finished() {
                debug!("subscriber already running");
                return false;
            }
        }

        let id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let run = Arc::new(Run::new(id));
        let listener = Listener {
            transport: self.transport.clone(),
            channels: channels.clone(),
            handler,
            run: run.clone(),
            settings: self.settings,
            logger: self.logger.clone(),
        };

        let spawned = thread::Builder::new()
            .name(format!("rtk-subscriber-{}", id))
            .spawn(move || listener.run());
        match spawned {
            Ok(handle) => {
                *active = Some(Active { run, handle });
                info!(channels = %channels.join(", "), "subscriber started");
                true
            }
            Err(err) => {
                error!(error = %err, "failed to spawn subscriber thread");
                false
            }
        }
    }

    /// Stops the listener, waiting up to `timeout` for it to exit.
    ///
    /// Returns true when no listener is left running. On timeout the thread
    /// is abandoned; it exits by itself once its blocking read returns.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.logger.scope(|| self.stop_listener(timeout))
    }

    fn stop_listener(&self, timeout: Duration) -> bool {
        let Some(Active { run, handle }) = self.active.lock().take() else {
            return true;
        };

        run.request_stop();
        if let Err(err) = self.transport.publish(CONTROL_CHANNEL, &run.token) {
            debug!(error = %err, "could not publish stop signal");
        }

        if run.wait_exited(timeout) {
            if handle.join().is_err() {
                warn!("subscriber thread panicked");
            }
            info!("subscriber stopped");
            true
        } else {
            warn!(?timeout, "subscriber did not stop in time");
            false
        }
    }
}

/// Signals the listener without waiting; the thread exits on its own once
/// the stop signal wakes its blocking read.
impl<T: Transport> Drop for SubscriberManager<T> {
    fn drop(&mut self) {
        let Some(active) = self.active.get_mut().take() else {
            return;
        };
        active.run.request_stop();
        let signalled = self.transport.publish(CONTROL_CHANNEL, &active.run.token);
        if let Err(err) = signalled {
            self.logger
                .scope(|| debug!(error = %err, "could not publish stop signal on drop"));
        }
    }
}

/// Everything the background thread owns.
struct Listener<T: Transport> {
    transport: Arc<T>,
    channels: Vec<String>,
    handler: Arc<dyn MessageHandler>,
    run: Arc<Run>,
    settings: SubscriberSettings,
    logger: Logger,
}

enum ListenEnd {
    Stopped,
    StreamEnded,
}

impl<T: Transport> Listener<T> {
    fn run(self) {
        let _guard = self.logger.install();

        while self.run.is_running() {
            match self.listen() {
                Ok(ListenEnd::Stopped) => break,
                Ok(ListenEnd::StreamEnded) => {
                    if self.run.is_running() {
                        warn!("subscription stream ended");
                        self.await_recovery();
                    }
                }
                Err(err) if err.is_retryable() => {
                    error!(error = %err, "subscriber lost its connection");
                    self.await_recovery();
                }
                Err(err) => {
                    error!(error = %err, "unexpected subscriber failure");
                    self.run.enter(SubscriberState::Starting);
                    self.run.pause(self.settings.retry_delay);
                }
            }
        }

        self.run.mark_exited();
        debug!("subscriber loop finished");
    }

    /// One subscribe-and-listen cycle.
    fn listen(&self) -> ClientResult<ListenEnd> {
        self.run.enter(SubscriberState::Starting);
        let mut all_channels = self.channels.clone();
        all_channels.push(CONTROL_CHANNEL.to_string());
        let mut subscription = self.transport.subscribe(&all_channels)?;

        let mut confirmed = 0;
        loop {
            let Some(message) = subscription.next_message()? else {
                return Ok(ListenEnd::StreamEnded);
            };
            if !self.run.is_running() {
                return Ok(ListenEnd::Stopped);
            }

            match message.kind {
                MessageKind::Subscribe => {
                    confirmed += 1;
                    if confirmed == all_channels.len() {
                        self.mark_listening();
                    }
                }
                MessageKind::Message if message.channel == CONTROL_CHANNEL => {
                    if message.payload == self.run.token {
                        debug!("stop signal received");
                        return Ok(ListenEnd::Stopped);
                    }
                }
                MessageKind::Message => {
                    if confirmed < all_channels.len() {
                        confirmed = all_channels.len();
                        self.mark_listening();
                    }
                    self.dispatch(message);
                }
                _ => {}
            }
        }
    }

    fn mark_listening(&self) {
        self.run.enter(SubscriberState::Listening);
        info!(channels = %self.channels.join(", "), "listening");
    }

    fn dispatch(&self, message: Message) {
        let value = rtk_common::decode_bytes(&message.payload);
        if self.logger.values_enabled() {
            info!(channel = %message.channel, value = %self.logger.format(&value), "message received");
        }

        let channel = message.channel.as_str();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(channel, value)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(channel, error = %err, "message handler failed"),
            Err(payload) => error!(channel, panic = panic_message(&*payload), "message handler panicked"),
        }
    }

    /// Polls liveness until the store answers or a stop is requested.
    fn await_recovery(&self) {
        self.run.enter(SubscriberState::Reconnecting);
        while self.run.is_running() {
            match self.transport.ping() {
                Ok(()) => {
                    info!("connection recovered");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, retry_in = ?self.settings.poll_interval, "store still unreachable");
                    self.run.pause(self.settings.poll_interval);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "non-string panic payload"
    }
}
