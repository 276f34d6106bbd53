//! Per-endpoint message routing.
//!
//! A [`Dispatcher`] maps message type tags to handlers. Registration is
//! parametric over the variant type: the dispatcher stores a type-erased
//! closure that performs the tag-to-variant conversion and hands the handler
//! the concrete record. A message whose tag has no registered handler means
//! the peer speaks an unsupported dialect, so the connection is shut down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::proto::{
    Message, MsgType, RpcRequest, RpcResponse, ServiceRequest, ServiceResponse, TopicRequest,
    TopicResponse,
};
use crate::transport::ConnectionRef;

/// Conversion from the generic [`Message`] to a concrete variant, used by
/// typed handler registration.
pub trait FromMessage: Sized {
    fn from_message(msg: Message) -> Option<Self>;
}

impl FromMessage for Message {
    fn from_message(msg: Message) -> Option<Self> {
        Some(msg)
    }
}

macro_rules! impl_from_message {
    ($($variant:ident),*) => {
        $(impl FromMessage for $variant {
            fn from_message(msg: Message) -> Option<Self> {
                match msg {
                    Message::$variant(m) => Some(m),
                    _ => None,
                }
            }
        })*
    };
}

impl_from_message!(
    RpcRequest,
    RpcResponse,
    TopicRequest,
    TopicResponse,
    ServiceRequest,
    ServiceResponse
);

type ErasedHandler = Arc<dyn Fn(&ConnectionRef, Message) + Send + Sync>;

/// Tag-keyed handler table shared by one client or server.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<HashMap<MsgType, ErasedHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for messages tagged `mtype`. The handler receives
    /// the concrete variant type; a tag registered against the wrong variant
    /// is a wiring bug and drops the offending connection.
    pub fn register<T>(
        &self,
        mtype: MsgType,
        handler: impl Fn(&ConnectionRef, T) + Send + Sync + 'static,
    ) where
        T: FromMessage + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |conn, msg| match T::from_message(msg) {
            Some(typed) => handler(conn, typed),
            None => {
                tracing::error!(?mtype, "handler registered for a different variant");
                conn.shutdown();
            }
        });
        self.handlers.lock().unwrap().insert(mtype, erased);
    }

    /// Route one inbound message. Invoked from the connection's read loop.
    pub fn dispatch(&self, conn: &ConnectionRef, msg: Message) {
        let handler = self.handlers.lock().unwrap().get(&msg.mtype()).cloned();
        match handler {
            Some(handler) => handler(conn, msg),
            None => {
                tracing::error!(mtype = ?msg.mtype(), peer = %conn.peer(), "unsupported message type");
                conn.shutdown();
            }
        }
    }
}
