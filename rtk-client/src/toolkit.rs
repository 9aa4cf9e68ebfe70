//! # Store Facade
//!
//! Purpose: Typed get/set/publish over a `Transport`, with values passed
//! through the codec and one subscriber listener per instance.
//!
//! ## Design Principles
//! 1. **Validate Before Mutate**: Key length and encoded size are checked
//!    before anything is written; a batch is fully checked before its pipeline
//!    is sent.
//! 2. **Distinct Failures**: Callers see `Serialization`, `Validation` or
//!    `Transport` errors and can react to each differently.
//! 3. **Scoped Logging**: Every operation logs through the injected `Logger`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rtk_common::Value;
use tracing::{debug, error, info, warn};

use crate::client::KVClient;
use crate::error::{ToolkitError, ToolkitResult};
use crate::logging::{format_value, Logger};
use crate::options::{ConnectionConfig, ToolkitOptions};
use crate::subscriber::{
    MessageHandler, SubscriberManager, SubscriberSettings, SubscriberState, CONTROL_CHANNEL,
};
use crate::transport::{Pipeline, Transport};

/// Typed store access plus a background subscriber.
///
/// Dropping the toolkit calls [`Toolkit::close`].
pub struct Toolkit<T: Transport = KVClient> {
    transport: Arc<T>,
    options: ToolkitOptions,
    logger: Logger,
    subscriber: SubscriberManager<T>,
    closed: AtomicBool,
}

impl Toolkit<KVClient> {
    /// Toolkit over a RESP client for `config`, with default options.
    /// Connections are opened on first use.
    pub fn connect(config: &ConnectionConfig) -> Self {
        Self::builder().connection(config).build()
    }

    pub fn builder() -> ToolkitBuilder<KVClient> {
        ToolkitBuilder::new()
    }
}

impl<T: Transport> Toolkit<T> {
    pub fn new(transport: T, options: ToolkitOptions, logger: Logger) -> Self {
        let transport = Arc::new(transport);
        let logger = logger
            .log_values(options.log_values)
            .max_log_size(options.max_log_size);
        let subscriber = SubscriberManager::new(
            transport.clone(),
            SubscriberSettings::from(&options),
            logger.clone(),
        );
        Toolkit {
            transport,
            options,
            logger,
            subscriber,
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying transport, for commands the facade does not wrap.
    pub fn client(&self) -> &T {
        &self.transport
    }

    pub fn options(&self) -> &ToolkitOptions {
        &self.options
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> ToolkitResult<()> {
        self.set_with(key, value, &self.options)
    }

    /// Encodes and stores `value` under `key`.
    pub fn set_with(
        &self,
        key: &str,
        value: impl Into<Value>,
        options: &ToolkitOptions,
    ) -> ToolkitResult<()> {
        let value = value.into();
        self.logger.scope(|| {
            check_key(key, options)?;
            let encoded = rtk_common::encode(&value)?.into_bytes();
            check_value_size(key, encoded.len(), options)?;

            if options.log_values {
                info!(key, value = %format_value(&value, options.max_log_size), "set");
            }
            options
                .retry
                .run(|| self.transport.set(key.as_bytes(), &encoded))?;
            Ok(())
        })
    }

    pub fn get(&self, key: &str) -> ToolkitResult<Option<Value>> {
        self.get_with(key, &self.options)
    }

    /// Fetches and decodes `key`. `None` means the key does not exist; a
    /// stored null comes back as `Some(Value::Null)`.
    pub fn get_with(&self, key: &str, options: &ToolkitOptions) -> ToolkitResult<Option<Value>> {
        self.logger.scope(|| {
            let raw = options.retry.run(|| self.transport.get(key.as_bytes()))?;
            let Some(raw) = raw else {
                debug!(key, "key not found");
                return Ok(None);
            };

            let value = rtk_common::decode_bytes(&raw);
            if options.log_values {
                info!(key, value = %format_value(&value, options.max_log_size), "get");
            }
            Ok(Some(value))
        })
    }

    /// Deletes `key`. Returns true when something was removed.
    pub fn delete(&self, key: &str) -> ToolkitResult<bool> {
        self.logger.scope(|| {
            let removed = self
                .options
                .retry
                .run(|| self.transport.delete(key.as_bytes()))?;
            info!(key, removed, "delete");
            Ok(removed)
        })
    }

    pub fn batch_set<I, K, V>(&self, entries: I) -> ToolkitResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.batch_set_with(entries, &self.options)
    }

    /// Validates and encodes every entry, then writes them in one pipeline.
    ///
    /// Not transactional: a transport failure part-way may leave some
    /// entries written.
    pub fn batch_set_with<I, K, V>(&self, entries: I, options: &ToolkitOptions) -> ToolkitResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.logger.scope(|| {
            let mut pipeline = Pipeline::new();
            let mut total = 0usize;

            for (key, value) in entries {
                let key = key.into();
                check_key(&key, options)?;
                let encoded = rtk_common::encode(&value.into())?.into_bytes();
                check_value_size(&key, encoded.len(), options)?;
                total += encoded.len();
                pipeline.set(key, encoded);
            }

            let limit = options.max_batch_size();
            if options.enable_validation && total > limit {
                return Err(ToolkitError::Validation(format!(
                    "batch size {} bytes exceeds limit {} bytes",
                    total, limit
                )));
            }
            if pipeline.is_empty() {
                return Ok(());
            }

            self.transport.execute(&pipeline)?;
            if options.log_values {
                info!(keys = pipeline.len(), bytes = total, "batch set");
            }
            Ok(())
        })
    }

    pub fn batch_get<S: AsRef<str>>(&self, keys: &[S]) -> ToolkitResult<BTreeMap<String, Option<Value>>> {
        self.batch_get_with(keys, &self.options)
    }

    /// Fetches all `keys` in one round trip. Missing keys map to `None`.
    pub fn batch_get_with<S: AsRef<str>>(
        &self,
        keys: &[S],
        options: &ToolkitOptions,
    ) -> ToolkitResult<BTreeMap<String, Option<Value>>> {
        self.logger.scope(|| {
            let raw_keys: Vec<&[u8]> = keys.iter().map(|k| k.as_ref().as_bytes()).collect();
            let values = self.transport.mget(&raw_keys)?;

            let result: BTreeMap<String, Option<Value>> = keys
                .iter()
                .zip(values)
                .map(|(key, raw)| {
                    let value = raw.map(|data| rtk_common::decode_bytes(&data));
                    (key.as_ref().to_string(), value)
                })
                .collect();

            if options.log_values {
                info!(keys = keys.len(), "batch get");
            }
            Ok(result)
        })
    }

    pub fn publish(&self, channel: &str, value: impl Into<Value>) -> ToolkitResult<i64> {
        self.publish_with(channel, value, &self.options)
    }

    /// Encodes and publishes `value`. Returns how many subscribers got it.
    pub fn publish_with(
        &self,
        channel: &str,
        value: impl Into<Value>,
        options: &ToolkitOptions,
    ) -> ToolkitResult<i64> {
        let value = value.into();
        self.logger.scope(|| {
            if channel == CONTROL_CHANNEL {
                return Err(ToolkitError::Validation(format!(
                    "channel {} is reserved",
                    CONTROL_CHANNEL
                )));
            }
            let encoded = rtk_common::encode(&value)?.into_bytes();

            if options.log_values {
                info!(channel, value = %format_value(&value, options.max_log_size), "publish");
            }
            let receivers = options
                .retry
                .run(|| self.transport.publish(channel, &encoded))?;
            Ok(receivers)
        })
    }

    /// Starts the background listener. Returns false when `channels` is
    /// empty, a listener is already running, or the toolkit is closed.
    pub fn start_subscriber<F>(&self, channels: &[String], handler: F) -> bool
    where
        F: Fn(&str, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.start_subscriber_handler(channels, Arc::new(handler))
    }

    pub fn start_subscriber_handler(&self, channels: &[String], handler: Arc<dyn MessageHandler>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.subscriber.start_handler(channels, handler)
    }

    /// Stops the listener, waiting up to `subscriber_stop_timeout`.
    pub fn stop_subscriber(&self) -> bool {
        self.subscriber.stop(self.options.subscriber_stop_timeout)
    }

    pub fn subscriber_state(&self) -> SubscriberState {
        self.subscriber.state()
    }

    /// Pings the store. Failures are logged and reported as false.
    pub fn health_check(&self) -> bool {
        self.logger.scope(|| match self.transport.ping() {
            Ok(()) => true,
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "health check failed");
                false
            }
            Err(err) => {
                error!(error = %err, "health check failed");
                false
            }
        })
    }

    /// Stops the subscriber and releases the transport's connections.
    /// Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_subscriber();
        self.transport.close();
        self.logger.scope(|| info!("toolkit closed"));
    }
}

impl<T: Transport> Drop for Toolkit<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for [`Toolkit`]. Starts the subscriber on `build` when both
/// channels and a handler were given.
pub struct ToolkitBuilder<T: Transport = KVClient> {
    transport: T,
    options: ToolkitOptions,
    logger: Logger,
    channels: Vec<String>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl ToolkitBuilder<KVClient> {
    pub fn new() -> Self {
        ToolkitBuilder {
            transport: KVClient::with_config(ConnectionConfig::default().to_client_config()),
            options: ToolkitOptions::default(),
            logger: Logger::global(),
            channels: Vec::new(),
            handler: None,
        }
    }

    /// Where the RESP client connects.
    pub fn connection(mut self, config: &ConnectionConfig) -> Self {
        self.transport = KVClient::with_config(config.to_client_config());
        self
    }
}

impl Default for ToolkitBuilder<KVClient> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> ToolkitBuilder<T> {
    /// Replaces the transport.
    pub fn transport<U: Transport>(self, transport: U) -> ToolkitBuilder<U> {
        ToolkitBuilder {
            transport,
            options: self.options,
            logger: self.logger,
            channels: self.channels,
            handler: self.handler,
        }
    }

    pub fn options(mut self, options: ToolkitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Toolkit<T> {
        let toolkit = Toolkit::new(self.transport, self.options, self.logger);
        match self.handler {
            Some(handler) if !self.channels.is_empty() => {
                toolkit.start_subscriber_handler(&self.channels, handler);
            }
            Some(_) => toolkit.logger.scope(|| debug!("handler given without channels")),
            None => {}
        }
        toolkit
    }
}

fn check_key(key: &str, options: &ToolkitOptions) -> ToolkitResult<()> {
    let len = key.chars().count();
    if options.enable_validation && len > options.max_key_length {
        return Err(ToolkitError::Validation(format!(
            "key length {} exceeds limit {}",
            len, options.max_key_length
        )));
    }
    Ok(())
}

fn check_value_size(key: &str, size: usize, options: &ToolkitOptions) -> ToolkitResult<()> {
    if options.enable_validation && size > options.max_value_size {
        return Err(ToolkitError::Validation(format!(
            "value for key '{}' is {} bytes, limit is {} bytes",
            key, size, options.max_value_size
        )));
    }
    Ok(())
}
