//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing Redis-compatible
//! commands over RESP2, and implement `Transport` on top of it.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and protocol details.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Fail Fast**: Protocol violations surface immediately as errors.
//! 4. **Dedicated Subscriber Socket**: Subscriptions never borrow a pooled
//!    connection, because a subscribed connection cannot run other commands.

use std::time::Duration;

use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::pool::{Connection, ConnectionPool, PoolConfig};
use crate::resp::RespValue;
use crate::transport::{Message, MessageKind, Pipeline, Subscription, Transport};

/// Configuration for the synchronous client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout. Never applied to subscriptions.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
            username: None,
            password: None,
            db: 0,
        }
    }
}

/// Synchronous client with connection pooling.
///
/// Each call acquires a connection, executes one command (or one pipeline),
/// and returns the connection to the pool.
pub struct KVClient {
    pool: ConnectionPool,
}

impl KVClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> Self {
        Self::with_config(ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        })
    }

    /// Creates a client with a custom configuration. Connections open lazily.
    pub fn with_config(config: ClientConfig) -> Self {
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
            username: config.username,
            password: config.password,
            db: config.db,
        });
        KVClient { pool }
    }

    fn exec(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let mut conn = self.pool.acquire()?;
        conn.exec(args)?.into_result()
    }

    /// Fetches a value by key. Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.exec(&[b"GET", key])? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.exec(&[b"SET", key, value])? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        match self.exec(&[b"DEL", key])? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Fetches several keys in one round trip.
    pub fn mget(&self, keys: &[&[u8]]) -> ClientResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"MGET");
        args.extend_from_slice(keys);

        match self.exec(&args)? {
            RespValue::Array(items) if items.len() == keys.len() => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(data) => Ok(data),
                    _ => Err(ClientError::UnexpectedResponse),
                })
                .collect(),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sends every pipeline operation, then checks every reply.
    pub fn execute(&self, pipeline: &Pipeline) -> ClientResult<()> {
        if pipeline.is_empty() {
            return Ok(());
        }
        let commands: Vec<Vec<Vec<u8>>> = pipeline.ops().iter().map(|op| op.to_command()).collect();
        let mut conn = self.pool.acquire()?;
        let replies = conn.exec_batch(&commands)?;
        for reply in replies {
            reply.into_result()?;
        }
        Ok(())
    }

    /// Publishes a payload. Returns the receiver count.
    pub fn publish(&self, channel: &str, payload: &[u8]) -> ClientResult<i64> {
        match self.exec(&[b"PUBLISH", channel.as_bytes(), payload])? {
            RespValue::Integer(count) => Ok(count),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Pings the server. Returns the raw response payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        let response = match payload {
            Some(data) => self.exec(&[b"PING", data])?,
            None => self.exec(&[b"PING"])?,
        };
        match response {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(Some(data)) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Opens a dedicated connection subscribed to `channels`.
    pub fn subscribe(&self, channels: &[String]) -> ClientResult<RespSubscription> {
        let mut conn = Connection::connect(self.pool.config())?;
        conn.set_read_timeout(None)?;

        let mut args: Vec<&[u8]> = Vec::with_capacity(channels.len() + 1);
        args.push(b"SUBSCRIBE");
        args.extend(channels.iter().map(|c| c.as_bytes()));
        conn.send(&args)?;
        debug!(channels = channels.len(), "subscription opened");

        Ok(RespSubscription { conn })
    }

    /// Drops idle pooled connections.
    pub fn close(&self) {
        self.pool.disconnect();
    }
}

impl Transport for KVClient {
    fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        KVClient::get(self, key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        KVClient::set(self, key, value)
    }

    fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        KVClient::delete(self, key)
    }

    fn mget(&self, keys: &[&[u8]]) -> ClientResult<Vec<Option<Vec<u8>>>> {
        KVClient::mget(self, keys)
    }

    fn execute(&self, pipeline: &Pipeline) -> ClientResult<()> {
        KVClient::execute(self, pipeline)
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> ClientResult<i64> {
        KVClient::publish(self, channel, payload)
    }

    fn subscribe(&self, channels: &[String]) -> ClientResult<Box<dyn Subscription>> {
        Ok(Box::new(KVClient::subscribe(self, channels)?))
    }

    fn ping(&self) -> ClientResult<()> {
        KVClient::ping(self, None).map(|_| ())
    }

    fn close(&self) {
        KVClient::close(self)
    }
}

/// Subscription over its own RESP connection.
pub struct RespSubscription {
    conn: Connection,
}

impl Subscription for RespSubscription {
    fn next_message(&mut self) -> ClientResult<Option<Message>> {
        let frame = match self.conn.read() {
            Ok(frame) => frame.into_result()?,
            Err(ClientError::ConnectionClosed) => return Ok(None),
            Err(err) => return Err(err),
        };
        parse_push(frame).map(Some)
    }
}

impl Drop for RespSubscription {
    fn drop(&mut self) {
        self.conn.shutdown();
    }
}

/// Parses `[kind, channel, payload]` push frames.
fn parse_push(frame: RespValue) -> ClientResult<Message> {
    let RespValue::Array(items) = frame else {
        return Err(ClientError::UnexpectedResponse);
    };
    let mut items = items.into_iter();
    let (Some(kind), Some(channel), Some(payload)) = (items.next(), items.next(), items.next()) else {
        return Err(ClientError::UnexpectedResponse);
    };

    let kind = MessageKind::parse(kind.as_bytes().ok_or(ClientError::UnexpectedResponse)?);
    let channel = channel
        .as_bytes()
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .ok_or(ClientError::UnexpectedResponse)?;
    let payload = match payload {
        RespValue::Integer(count) => count.to_string().into_bytes(),
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => data,
        _ => Vec::new(),
    };
    Ok(Message {
        kind,
        channel,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(data: &[u8]) -> RespValue {
        RespValue::Bulk(Some(data.to_vec()))
    }

    #[test]
    fn parses_message_push() {
        let frame = RespValue::Array(vec![bulk(b"message"), bulk(b"news"), bulk(b"\x00\x01")]);
        assert_eq!(parse_push(frame).unwrap(), Message::data("news", vec![0u8, 1]));
    }

    #[test]
    fn parses_subscribe_confirmation() {
        let frame = RespValue::Array(vec![bulk(b"subscribe"), bulk(b"news"), RespValue::Integer(2)]);
        let msg = parse_push(frame).unwrap();
        assert_eq!(msg.kind, MessageKind::Subscribe);
        assert_eq!(msg.payload, b"2");
    }

    #[test]
    fn retry_survives_store_restart_with_full_idle_pool() {
        use crate::retry::RetryPolicy;
        use rtk_server::ServerHandle;

        let server = ServerHandle::spawn("127.0.0.1:0").unwrap();
        let addr = server.local_addr();
        let client = KVClient::with_config(ClientConfig {
            addr: addr.to_string(),
            max_idle: 3,
            max_total: 3,
            read_timeout: Some(Duration::from_secs(2)),
            connect_timeout: Some(Duration::from_millis(500)),
            ..ClientConfig::default()
        });

        let mut held: Vec<_> = (0..3).map(|_| client.pool.acquire().unwrap()).collect();
        for conn in &mut held {
            conn.exec(&[b"PING"]).unwrap();
        }
        drop(held);
        assert_eq!(client.pool.idle_len(), 3);

        server.shutdown();
        let _server = ServerHandle::spawn(addr).unwrap();

        let got = RetryPolicy::default().run(|| client.get(b"k"));
        assert!(matches!(got, Ok(None)), "store is up again: {:?}", got);
        assert!(client.pool.idle_len() <= 1);
    }

    #[test]
    fn rejects_short_push() {
        let frame = RespValue::Array(vec![bulk(b"message")]);
        assert!(matches!(parse_push(frame), Err(ClientError::UnexpectedResponse)));
        assert!(matches!(
            parse_push(RespValue::Integer(1)),
            Err(ClientError::UnexpectedResponse)
        ));
    }
}
