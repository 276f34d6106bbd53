//! TCP transport.
//!
//! One [`Connection`] per socket, backed by two tasks: a writer draining an
//! outbound queue and a reader pumping the framing decoder. Inbound messages
//! and lifecycle events reach the owner through the [`Callbacks`] it installs;
//! callbacks run on the connection's reader task, so long work inside one
//! blocks further delivery on that connection (and only that one).
//!
//! [`TcpServer`] accepts connections and keeps a registry of the live ones;
//! [`TcpClient`] dials out and resolves once the stream is established.

mod client;
mod conn;
mod server;

pub use client::TcpClient;
pub use conn::{Connection, ConnectionRef, SentFrames};
pub use server::TcpServer;

use crate::proto::Message;
use std::sync::Arc;

/// Invoked with the connection when it comes up or goes down.
pub type ConnectionCallback = Arc<dyn Fn(&ConnectionRef) + Send + Sync>;

/// Invoked with each decoded inbound message.
pub type MessageCallback = Arc<dyn Fn(&ConnectionRef, Message) + Send + Sync>;

/// The callbacks an owner installs on a connection.
#[derive(Default, Clone)]
pub struct Callbacks {
    pub on_up: Option<ConnectionCallback>,
    pub on_down: Option<ConnectionCallback>,
    pub on_message: Option<MessageCallback>,
}
