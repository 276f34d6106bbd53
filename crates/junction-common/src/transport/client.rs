//! Dialing side of the transport.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use tokio::net::TcpStream;

use super::conn::{self, ConnectionRef};
use super::Callbacks;
use crate::error::{JunctionError, Result};
use crate::proto::Message;

/// TCP client holding a single outbound connection.
///
/// [`TcpClient::connect`] resolves once the stream is established, so callers
/// can send immediately after it returns.
pub struct TcpClient {
    conn: ConnectionRef,
}

impl TcpClient {
    /// Connect to `addr`, trying each resolved address until one succeeds.
    pub async fn connect(addr: &str, callbacks: Callbacks) -> Result<TcpClient> {
        let resolved = addr
            .to_socket_addrs()
            .map_err(|e| JunctionError::Connection(format!("invalid address '{addr}': {e}")))?;

        let mut last_err = None;
        for candidate in resolved {
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    let peer = stream.peer_addr()?;
                    let conn = conn::spawn(stream, peer, Arc::new(callbacks));
                    return Ok(TcpClient { conn });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(JunctionError::Connection(format!(
            "failed to connect to {addr}: {}",
            last_err.map_or_else(|| "no addresses".to_string(), |e| e.to_string())
        )))
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    pub fn connected(&self) -> bool {
        self.conn.connected()
    }

    pub fn send(&self, msg: &Message) -> bool {
        self.conn.send(msg)
    }

    pub fn shutdown(&self) {
        self.conn.shutdown();
    }
}
