//! # Connection Pool
//!
//! Purpose: Reuse TCP connections for foreground commands to reduce handshake
//! latency, and open dedicated connections for subscriptions.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Poison on Failure**: A connection that saw an IO or protocol error is
//!    dropped instead of being returned.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Pool configuration for the sync client.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379" or "localhost:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Sent with AUTH when a password is configured.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database selected on connect when non-zero.
    pub db: u32,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool with the provided configuration.
    pub fn new(config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquires a connection from the pool.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        if let Some(conn) = self.inner.state.lock().idle.pop_front() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(ClientError::PoolExhausted);
        }

        match Connection::connect(&self.inner.config) {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                self.inner.release_slot();
                Err(err)
            }
        }
    }

    /// Drops every idle connection. In-use connections close when released.
    pub fn disconnect(&self) {
        let dropped = self.inner.drop_idle();
        debug!(dropped, "closed idle connections");
    }

    #[cfg(test)]
    pub(crate) fn idle_len(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }
}

impl PoolInner {
    /// Closes every idle connection and frees their slots.
    fn drop_idle(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.idle.len();
        state.idle.clear();
        state.total = state.total.saturating_sub(dropped);
        dropped
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.state.lock();
        if state.idle.len() < self.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes one command and returns the parsed reply.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.exec(args),
            None => Err(ClientError::ConnectionClosed),
        };
        self.track(result)
    }

    /// Writes every command, then reads one reply per command.
    pub fn exec_batch(&mut self, commands: &[Vec<Vec<u8>>]) -> ClientResult<Vec<RespValue>> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.exec_batch(commands),
            None => Err(ClientError::ConnectionClosed),
        };
        self.track(result)
    }

    fn track<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        // Server error replies leave the stream in sync; anything else does not.
        if let Err(err) = &result {
            if !matches!(err, ClientError::Server { .. }) {
                self.valid = false;
            }
            // The peer went away, so idle sockets opened to it are dead too.
            if err.is_connection() {
                let dropped = self.pool.drop_idle();
                if dropped > 0 {
                    debug!(dropped, "discarded idle connections after connection loss");
                }
            }
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.valid {
            self.pool.return_connection(conn);
        } else {
            self.pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Opens a connection and runs the AUTH/SELECT handshake.
    pub fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        };
        conn.handshake(config)?;
        Ok(conn)
    }

    fn handshake(&mut self, config: &PoolConfig) -> ClientResult<()> {
        if let Some(password) = &config.password {
            let reply = match &config.username {
                Some(user) => self.exec(&[b"AUTH", user.as_bytes(), password.as_bytes()])?,
                None => self.exec(&[b"AUTH", password.as_bytes()])?,
            };
            reply.into_result()?;
        }
        if config.db != 0 {
            let db = config.db.to_string();
            self.exec(&[b"SELECT", db.as_bytes()])?.into_result()?;
        }
        Ok(())
    }

    /// Changes the read timeout; `None` blocks indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ClientResult<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Writes one command without waiting for a reply.
    pub fn send(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        self.flush_write_buf()
    }

    /// Reads the next reply or push message.
    pub fn read(&mut self) -> ClientResult<RespValue> {
        read_response(&mut self.reader, &mut self.line_buf)
    }

    /// Shuts down both halves of the socket.
    pub fn shutdown(&self) {
        let _ = self.reader.get_ref().shutdown(std::net::Shutdown::Both);
    }

    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.send(args)?;
        self.read()
    }

    fn exec_batch(&mut self, commands: &[Vec<Vec<u8>>]) -> ClientResult<Vec<RespValue>> {
        self.write_buf.clear();
        for command in commands {
            let args: Vec<&[u8]> = command.iter().map(Vec::as_slice).collect();
            encode_command(&args, &mut self.write_buf);
        }
        self.flush_write_buf()?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in commands {
            replies.push(self.read()?);
        }
        Ok(replies)
    }

    fn flush_write_buf(&mut self) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = config
        .addr
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(config.addr.clone()))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) => Err(ClientError::Io(err)),
        None => Err(ClientError::InvalidAddress(config.addr.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(addr: &str) -> PoolConfig {
        PoolConfig {
            addr: addr.to_string(),
            max_idle: 1,
            max_total: 1,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: Some(Duration::from_millis(200)),
            username: None,
            password: None,
            db: 0,
        }
    }

    #[test]
    fn invalid_address_is_reported() {
        let pool = ConnectionPool::new(config("not an address"));
        assert!(matches!(pool.acquire(), Err(ClientError::InvalidAddress(_))));
    }

    #[test]
    fn failed_connect_releases_slot() {
        // Bind then drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let pool = ConnectionPool::new(config(&format!("127.0.0.1:{}", port)));
        let first = pool.acquire().err().expect("refused");
        assert!(first.is_connection() || first.is_timeout());
        // Slot was released, so the second attempt is not PoolExhausted.
        assert!(!matches!(pool.acquire(), Err(ClientError::PoolExhausted)));
    }
}
