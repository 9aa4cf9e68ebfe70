//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them to the shared
//! keyspace and pub/sub broker.
//!
//! A connection that subscribes switches to subscribed mode: it keeps
//! reading commands while frames published to its channels are written to
//! it as they arrive.

use std::collections::BTreeSet;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, PushSender};
use crate::protocol::{
    push_array_header, push_bulk, resp_bulk, resp_error, resp_integer, resp_null, resp_simple,
    resp_subscription, RespParser,
};
use crate::store::Store;

/// State shared by every connection.
#[derive(Debug, Default)]
pub struct Shared {
    store: Store,
    broker: Broker,
    clients: AtomicUsize,
    next_session: AtomicU64,
}

/// Accepts connections until `shutdown` flips, then returns.
pub async fn serve(listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
    let shared = Arc::new(Shared::default());
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let shared = shared.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!(%peer, "client connected");
                    if let Err(err) = handle_connection(stream, shared, shutdown).await {
                        debug!(%peer, error = %err, "connection ended with error");
                    }
                });
            }
            _ = shutdown.changed() => break,
        }
    }

    info!("server stopped");
    Ok(())
}

/// Handles a single TCP client connection.
pub async fn handle_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut stream = stream;
    stream.set_nodelay(true)?;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut out = Vec::with_capacity(1024);

    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Bytes>();
    let mut session = Session::new(shared, push_tx);

    loop {
        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                if read? == 0 {
                    break;
                }

                let mut flow = Flow::Continue;
                loop {
                    match parser.parse(&mut buffer) {
                        Ok(Some(args)) if args.is_empty() => {}
                        Ok(Some(args)) => {
                            flow = session.execute(&args, &mut out);
                            if flow == Flow::Close {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            out.extend_from_slice(&resp_error(&format!("ERR {}", err)));
                            flow = Flow::Close;
                            break;
                        }
                    }
                }

                if !out.is_empty() {
                    stream.write_all(&out).await?;
                    out.clear();
                }
                if flow == Flow::Close {
                    break;
                }
            }
            Some(frame) = push_rx.recv() => {
                stream.write_all(&frame).await?;
            }
            _ = shutdown.changed() => break,
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Per-connection state.
struct Session {
    id: u64,
    db: u32,
    shared: Arc<Shared>,
    subscriptions: BTreeSet<Vec<u8>>,
    push_tx: PushSender,
}

impl Session {
    fn new(shared: Arc<Shared>, push_tx: PushSender) -> Self {
        let id = shared.next_session.fetch_add(1, Ordering::Relaxed);
        shared.clients.fetch_add(1, Ordering::Relaxed);
        Session {
            id,
            db: 0,
            shared,
            subscriptions: BTreeSet::new(),
            push_tx,
        }
    }

    fn execute(&mut self, args: &[Vec<u8>], out: &mut Vec<u8>) -> Flow {
        let cmd = args[0].to_ascii_uppercase();

        if !self.subscriptions.is_empty()
            && !matches!(cmd.as_slice(), b"SUBSCRIBE" | b"UNSUBSCRIBE" | b"PING" | b"QUIT")
        {
            out.extend(resp_error(
                "ERR only (UN)SUBSCRIBE / PING / QUIT are allowed in this context",
            ));
            return Flow::Continue;
        }

        match cmd.as_slice() {
            b"PING" => out.extend(self.handle_ping(args)),
            b"ECHO" => out.extend(handle_echo(args)),
            b"GET" => out.extend(self.handle_get(args)),
            b"SET" => out.extend(self.handle_set(args)),
            b"DEL" => out.extend(self.handle_del(args)),
            b"MGET" => out.extend(self.handle_mget(args)),
            b"PUBLISH" => out.extend(self.handle_publish(args)),
            b"SUBSCRIBE" => self.handle_subscribe(args, out),
            b"UNSUBSCRIBE" => self.handle_unsubscribe(args, out),
            b"AUTH" => out.extend(handle_auth(args)),
            b"SELECT" => out.extend(self.handle_select(args)),
            b"INFO" => out.extend(self.handle_info()),
            b"QUIT" => {
                out.extend(resp_simple("OK"));
                return Flow::Close;
            }
            _ => out.extend(resp_error(&format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(&args[0])
            ))),
        }
        Flow::Continue
    }

    fn handle_ping(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if !self.subscriptions.is_empty() {
            // Subscribed connections get PING answered as a push.
            let mut buf = Vec::new();
            push_array_header(&mut buf, 2);
            push_bulk(&mut buf, b"pong");
            push_bulk(&mut buf, args.get(1).map(Vec::as_slice).unwrap_or_default());
            return buf;
        }
        match args.len() {
            1 => resp_simple("PONG"),
            2 => resp_bulk(&args[1]),
            _ => wrong_arity("ping"),
        }
    }

    fn handle_get(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() != 2 {
            return wrong_arity("get");
        }
        match self.shared.store.get(self.db, &args[1]) {
            Some(value) => resp_bulk(&value),
            None => resp_null(),
        }
    }

    fn handle_set(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() != 3 {
            return wrong_arity("set");
        }
        self.shared.store.set(self.db, args[1].clone(), args[2].clone());
        resp_simple("OK")
    }

    fn handle_del(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() < 2 {
            return wrong_arity("del");
        }
        let removed = args[1..]
            .iter()
            .map(|key| self.shared.store.delete(self.db, key))
            .filter(|removed| *removed)
            .count();
        resp_integer(removed as i64)
    }

    fn handle_mget(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() < 2 {
            return wrong_arity("mget");
        }
        let mut buf = Vec::new();
        push_array_header(&mut buf, args.len() - 1);
        for key in &args[1..] {
            match self.shared.store.get(self.db, key) {
                Some(value) => push_bulk(&mut buf, &value),
                None => buf.extend_from_slice(&resp_null()),
            }
        }
        buf
    }

    fn handle_publish(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() != 3 {
            return wrong_arity("publish");
        }
        resp_integer(self.shared.broker.publish(&args[1], &args[2]))
    }

    fn handle_subscribe(&mut self, args: &[Vec<u8>], out: &mut Vec<u8>) {
        if args.len() < 2 {
            out.extend(wrong_arity("subscribe"));
            return;
        }
        for channel in &args[1..] {
            if self.subscriptions.insert(channel.clone()) {
                self.shared
                    .broker
                    .subscribe(channel, self.id, self.push_tx.clone());
            }
            out.extend(resp_subscription(
                b"subscribe",
                Some(channel.as_slice()),
                self.subscriptions.len(),
            ));
        }
        debug!(session = self.id, channels = self.subscriptions.len(), "subscribed");
    }

    fn handle_unsubscribe(&mut self, args: &[Vec<u8>], out: &mut Vec<u8>) {
        let channels: Vec<Vec<u8>> = if args.len() > 1 {
            args[1..].to_vec()
        } else {
            self.subscriptions.iter().cloned().collect()
        };

        if channels.is_empty() {
            out.extend(resp_subscription(b"unsubscribe", None, 0));
            return;
        }
        for channel in channels {
            if self.subscriptions.remove(&channel) {
                self.shared.broker.unsubscribe(&channel, self.id);
            }
            out.extend(resp_subscription(
                b"unsubscribe",
                Some(channel.as_slice()),
                self.subscriptions.len(),
            ));
        }
    }

    fn handle_select(&mut self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() != 2 {
            return wrong_arity("select");
        }
        match std::str::from_utf8(&args[1]).ok().and_then(|db| db.parse().ok()) {
            Some(db) => {
                self.db = db;
                resp_simple("OK")
            }
            None => resp_error("ERR value is not an integer or out of range"),
        }
    }

    fn handle_info(&self) -> Vec<u8> {
        let info = format!(
            "# Server\r\nredis_mode:standalone\r\nserver:rtk-server\r\n# Clients\r\nconnected_clients:{}\r\n# Keyspace\r\nkeys:{}\r\npubsub_channels:{}\r\n",
            self.shared.clients.load(Ordering::Relaxed),
            self.shared.store.len(),
            self.shared.broker.channel_count(),
        );
        resp_bulk(info.as_bytes())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for channel in &self.subscriptions {
            self.shared.broker.unsubscribe(channel, self.id);
        }
        self.shared.clients.fetch_sub(1, Ordering::Relaxed);
    }
}

fn handle_echo(args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("echo");
    }
    resp_bulk(&args[1])
}

/// Credentials are not checked; AUTH exists so clients configured with a
/// password can connect.
fn handle_auth(args: &[Vec<u8>]) -> Vec<u8> {
    match args.len() {
        2 | 3 => resp_simple("OK"),
        _ => wrong_arity("auth"),
    }
}

fn wrong_arity(command: &str) -> Vec<u8> {
    resp_error(&format!("ERR wrong number of arguments for '{}' command", command))
}

/// A server running on its own runtime thread.
///
/// Dropping the handle shuts the server down.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Binds `addr` and starts serving. Use port 0 for an ephemeral port.
    pub fn spawn(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("rtk-server-worker")
            .enable_all()
            .build()?;
        let (shutdown, rx) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name("rtk-server".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            error!(error = %err, "failed to register listener");
                            return;
                        }
                    };
                    if let Err(err) = serve(listener, rx).await {
                        error!(error = %err, "server failed");
                    }
                });
                // Dropping the runtime cancels connection tasks, closing their sockets.
            })?;

        Ok(ServerHandle {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting, closes every client connection and waits for the
    /// runtime thread to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("server thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
