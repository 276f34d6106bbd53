//! Accepting side of the transport.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, Weak};
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;

use super::conn::{self, ConnectionRef};
use super::{Callbacks, ConnectionCallback, MessageCallback};
use crate::error::{JunctionError, Result};

/// TCP server: binds, accepts, and tracks live connections.
///
/// Callbacks are installed between [`TcpServer::bind`] and
/// [`TcpServer::start`]; the close callback fires once per connection after
/// the server has dropped it from its registry.
pub struct TcpServer {
    local: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    on_up: Mutex<Option<ConnectionCallback>>,
    on_down: Mutex<Option<ConnectionCallback>>,
    on_message: Mutex<Option<MessageCallback>>,
    conns: Mutex<HashMap<u64, ConnectionRef>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    /// Bind to `addr` (e.g. `"0.0.0.0:8080"`, port 0 for ephemeral).
    /// SO_REUSEADDR and, on unix, SO_REUSEPORT are set before binding.
    pub async fn bind(addr: &str) -> Result<Arc<Self>> {
        let addr = addr
            .to_socket_addrs()
            .map_err(|e| JunctionError::Connection(format!("invalid address '{addr}': {e}")))?
            .next()
            .ok_or_else(|| JunctionError::Connection(format!("address '{addr}' resolved to nothing")))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        #[cfg(unix)]
        socket.set_reuseport(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let local = listener.local_addr()?;

        Ok(Arc::new(TcpServer {
            local,
            listener: Mutex::new(Some(listener)),
            on_up: Mutex::new(None),
            on_down: Mutex::new(None),
            on_message: Mutex::new(None),
            conns: Mutex::new(HashMap::new()),
            accept_task: Mutex::new(None),
        }))
    }

    /// The actual bound address; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn set_connection_callback(&self, cb: ConnectionCallback) {
        *self.on_up.lock().unwrap() = Some(cb);
    }

    pub fn set_close_callback(&self, cb: ConnectionCallback) {
        *self.on_down.lock().unwrap() = Some(cb);
    }

    pub fn set_message_callback(&self, cb: MessageCallback) {
        *self.on_message.lock().unwrap() = Some(cb);
    }

    /// Start the accept loop. Callbacks installed after this are not seen by
    /// new connections.
    pub fn start(self: &Arc<Self>) {
        let Some(listener) = self.listener.lock().unwrap().take() else {
            tracing::warn!("server already started");
            return;
        };

        // Dropping the connection from the registry before the owner's close
        // callback keeps "connection found but closed" windows short.
        let registry = Arc::downgrade(self);
        let user_down = self.on_down.lock().unwrap().clone();
        let on_down: ConnectionCallback = Arc::new(move |conn: &ConnectionRef| {
            if let Some(server) = registry.upgrade() {
                server.conns.lock().unwrap().remove(&conn.id());
            }
            if let Some(cb) = &user_down {
                cb(conn);
            }
        });

        let callbacks = Arc::new(Callbacks {
            on_up: self.on_up.lock().unwrap().clone(),
            on_down: Some(on_down),
            on_message: self.on_message.lock().unwrap().clone(),
        });

        let server = Arc::downgrade(self);
        let task = tokio::spawn(accept_loop(server, listener, callbacks));
        *self.accept_task.lock().unwrap() = Some(task);
    }

    /// Stop accepting and shut every live connection down.
    pub fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
        let conns: Vec<ConnectionRef> = self.conns.lock().unwrap().values().cloned().collect();
        for conn in conns {
            conn.shutdown();
        }
    }

    /// Number of connections currently tracked.
    pub fn connection_count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }
}

async fn accept_loop(server: Weak<TcpServer>, listener: TcpListener, callbacks: Arc<Callbacks>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "connection established");
                let conn = conn::spawn(stream, peer, callbacks.clone());
                match server.upgrade() {
                    Some(server) => {
                        server.conns.lock().unwrap().insert(conn.id(), conn);
                    }
                    None => return,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}
