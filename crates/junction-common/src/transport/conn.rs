//! The connection actor: send queue, read loop, lifecycle.

use bytes::{Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use super::Callbacks;
use crate::proto::{frame, Message};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const READ_CHUNK: usize = 4096;

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

/// Handle to one live TCP connection.
///
/// Cheap to clone behind [`ConnectionRef`]; the same handle is passed to
/// every callback so owners can key their bookkeeping by [`Connection::id`].
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    up: AtomicBool,
}

pub type ConnectionRef = Arc<Connection>;

impl Connection {
    fn new(peer: SocketAddr, outbound: mpsc::UnboundedSender<Outbound>) -> ConnectionRef {
        Arc::new(Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            outbound,
            up: AtomicBool::new(true),
        })
    }

    /// Process-unique id, stable for the connection's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Encode `msg` and queue it for the writer. Returns `false` without
    /// enqueueing when the connection is down or the message does not encode.
    pub fn send(&self, msg: &Message) -> bool {
        if !self.connected() {
            tracing::debug!(peer = %self.peer, "send on closed connection");
            return false;
        }
        match frame::encode(msg) {
            Ok(bytes) => self.outbound.send(Outbound::Frame(bytes)).is_ok(),
            Err(e) => {
                tracing::error!(peer = %self.peer, error = %e, "failed to encode message");
                false
            }
        }
    }

    /// Graceful close: queued frames flush, then the socket shuts down.
    pub fn shutdown(&self) {
        if self.up.swap(false, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Shutdown);
        }
    }

    /// Connection not backed by a socket; what it sends is observable through
    /// the returned probe. For tests.
    pub fn pipe() -> (ConnectionRef, SentFrames) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        (Connection::new(peer, tx), SentFrames { rx })
    }

    /// Connection not backed by a socket, sent data discarded. For tests.
    pub fn detached() -> ConnectionRef {
        let (conn, probe) = Self::pipe();
        // Keep the channel open so sends keep succeeding.
        std::mem::forget(probe);
        conn
    }
}

/// Decoded view of the frames a [`Connection::pipe`] connection has sent.
pub struct SentFrames {
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl SentFrames {
    /// Next sent message, if one is already queued.
    pub fn try_next(&mut self) -> Option<Message> {
        loop {
            match self.rx.try_recv().ok()? {
                Outbound::Frame(bytes) => {
                    let mut buf = BytesMut::from(&bytes[..]);
                    return frame::decode(&mut buf).ok();
                }
                Outbound::Shutdown => continue,
            }
        }
    }

    /// Await the next sent message; `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await? {
                Outbound::Frame(bytes) => {
                    let mut buf = BytesMut::from(&bytes[..]);
                    return frame::decode(&mut buf).ok();
                }
                Outbound::Shutdown => continue,
            }
        }
    }
}

/// Wrap an established stream in a [`Connection`] and spawn its reader and
/// writer tasks. `on_up` fires before any message is delivered.
pub(crate) fn spawn(stream: TcpStream, peer: SocketAddr, callbacks: Arc<Callbacks>) -> ConnectionRef {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);

    let conn = Connection::new(peer, tx);
    if let Some(cb) = &callbacks.on_up {
        cb(&conn);
    }

    tokio::spawn(write_loop(write_half, rx, closed_tx));
    tokio::spawn(read_loop(read_half, closed_rx, conn.clone(), callbacks));
    conn
}

async fn write_loop(
    mut half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    closed_tx: watch::Sender<bool>,
) {
    // Ends on Shutdown, write error, or every sender handle dropping.
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if let Err(e) = half.write_all(&bytes).await {
                    tracing::debug!(error = %e, "write failed");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = half.shutdown().await;
    let _ = closed_tx.send(true);
}

async fn read_loop(
    mut half: OwnedReadHalf,
    mut closed_rx: watch::Receiver<bool>,
    conn: ConnectionRef,
    callbacks: Arc<Callbacks>,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    'conn: loop {
        while frame::can_decode(&buf) {
            match frame::decode(&mut buf) {
                Ok(msg) => {
                    if let Some(cb) = &callbacks.on_message {
                        cb(&conn, msg);
                    }
                    // The handler may have shut us down; stop delivering.
                    if !conn.connected() {
                        break 'conn;
                    }
                }
                Err(e) => {
                    // A peer we cannot parse is a peer we cannot answer.
                    tracing::warn!(peer = %conn.peer(), error = %e, "undecodable frame, dropping connection");
                    break 'conn;
                }
            }
        }
        if buf.len() > frame::MAX_BUFFERED {
            tracing::warn!(peer = %conn.peer(), buffered = buf.len(), "no frame in oversized buffer, dropping connection");
            break 'conn;
        }

        tokio::select! {
            _ = closed_rx.changed() => break 'conn,
            read = half.read_buf(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(peer = %conn.peer(), "connection closed by peer");
                    break 'conn;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(peer = %conn.peer(), error = %e, "read failed");
                    break 'conn;
                }
            },
        }
    }

    conn.up.store(false, Ordering::Release);
    // Stop the writer even when the reader got here first.
    let _ = conn.outbound.send(Outbound::Shutdown);
    if let Some(cb) = &callbacks.on_down {
        cb(&conn);
    }
}
