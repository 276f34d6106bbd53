//! Request correlation.
//!
//! Servers answer out of order, so a client pairs responses with requests by
//! message id. The [`Requestor`] owns that table: every outbound request
//! leaves a pending entry behind, every inbound response resolves one. Each
//! entry is removed exactly once, either by its response or by the sweep that
//! runs when the owning connection closes.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

use junction_common::error::{JunctionError, Result};
use junction_common::proto::Message;
use junction_common::transport::ConnectionRef;

/// How a pending request wants its response delivered.
enum Completion {
    /// A one-shot slot some task is (or will be) awaiting.
    Slot(oneshot::Sender<Result<Message>>),
    /// A callback run on the dispatch task.
    Callback(Box<dyn FnOnce(Result<Message>) + Send>),
}

struct Pending {
    conn_id: u64,
    completion: Completion,
}

/// Response handle returned by [`Requestor::send`].
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Message>>,
}

impl PendingReply {
    /// Resolve to the response. A connection that dies first resolves to
    /// [`JunctionError::Disconnected`].
    pub async fn wait(self) -> Result<Message> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(JunctionError::Disconnected),
        }
    }
}

/// The correlation table. One per client endpoint; shared between the
/// application tasks that send and the dispatch task that resolves.
#[derive(Default)]
pub struct Requestor {
    pending: Mutex<HashMap<String, Pending>>,
}

impl Requestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `req` and return a handle that resolves to its response.
    pub fn send(&self, conn: &ConnectionRef, req: &Message) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(conn, req, Completion::Slot(tx))?;
        Ok(PendingReply { rx })
    }

    /// Send `req` and block the caller until the response arrives.
    pub async fn send_wait(&self, conn: &ConnectionRef, req: &Message) -> Result<Message> {
        self.send(conn, req)?.wait().await
    }

    /// Send `req`; `callback` runs on the dispatch task when the response
    /// arrives (or the connection dies).
    pub fn send_with(
        &self,
        conn: &ConnectionRef,
        req: &Message,
        callback: impl FnOnce(Result<Message>) + Send + 'static,
    ) -> Result<()> {
        self.enqueue(conn, req, Completion::Callback(Box::new(callback)))
    }

    fn enqueue(&self, conn: &ConnectionRef, req: &Message, completion: Completion) -> Result<()> {
        let id = req.id().to_string();
        {
            let mut pending = self.pending.lock().unwrap();
            let prev = pending.insert(
                id.clone(),
                Pending {
                    conn_id: conn.id(),
                    completion,
                },
            );
            // Ids are process-unique; a collision means a misbehaving caller.
            if prev.is_some() {
                tracing::warn!(id = %id, "replaced pending entry with duplicate id");
            }
        }
        if !conn.send(req) {
            self.pending.lock().unwrap().remove(&id);
            return Err(JunctionError::Disconnected);
        }
        Ok(())
    }

    /// Dispatcher handler for every response tag. Completion runs after the
    /// table lock is released.
    pub fn on_response(&self, _conn: &ConnectionRef, msg: Message) {
        let entry = self.pending.lock().unwrap().remove(msg.id());
        match entry {
            Some(pending) => complete(pending.completion, Ok(msg)),
            None => {
                tracing::warn!(id = %msg.id(), "response matches no pending request, discarding");
            }
        }
    }

    /// Close handler: every request still in flight on this connection
    /// completes as disconnected so no caller waits forever.
    pub fn on_connection_closed(&self, conn: &ConnectionRef) {
        let swept: Vec<Pending> = {
            let mut pending = self.pending.lock().unwrap();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.conn_id == conn.id())
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };
        if !swept.is_empty() {
            tracing::debug!(peer = %conn.peer(), count = swept.len(), "sweeping pending requests");
        }
        for pending in swept {
            complete(pending.completion, Err(JunctionError::Disconnected));
        }
    }

    /// Number of in-flight requests; used by tests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

fn complete(completion: Completion, result: Result<Message>) {
    match completion {
        // A dropped receiver is a completion nobody chose to observe.
        Completion::Slot(tx) => {
            let _ = tx.send(result);
        }
        Completion::Callback(cb) => cb(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_common::proto::{RCode, RpcRequest, RpcResponse};
    use junction_common::transport::Connection;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_response_resolves_pending_reply() {
        let requestor = Requestor::new();
        let (conn, mut sent) = Connection::pipe();

        let req: Message = RpcRequest::new("Add", json!({})).into();
        let reply = requestor.send(&conn, &req).unwrap();
        assert_eq!(requestor.pending_count(), 1);
        assert_eq!(sent.try_next().as_ref().map(Message::id), Some(req.id()));

        let rsp: Message = RpcResponse::new(req.id(), RCode::Ok, json!(33)).into();
        requestor.on_response(&conn, rsp.clone());

        assert_eq!(reply.wait().await.unwrap(), rsp);
        assert_eq!(requestor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_callback_mode() {
        let requestor = Requestor::new();
        let (conn, _sent) = Connection::pipe();
        let hits = Arc::new(AtomicUsize::new(0));

        let req: Message = RpcRequest::new("Add", json!({})).into();
        let seen = hits.clone();
        requestor
            .send_with(&conn, &req, move |result| {
                assert!(result.is_ok());
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        requestor.on_response(&conn, RpcResponse::new(req.id(), RCode::Ok, json!(1)).into());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(requestor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_response_discarded() {
        let requestor = Requestor::new();
        let (conn, _sent) = Connection::pipe();

        requestor.on_response(&conn, RpcResponse::new("nobody", RCode::Ok, json!(1)).into());
        assert_eq!(requestor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_on_dead_connection_leaves_no_entry() {
        let requestor = Requestor::new();
        let (conn, _sent) = Connection::pipe();
        conn.shutdown();

        let req: Message = RpcRequest::new("Add", json!({})).into();
        match requestor.send(&conn, &req) {
            Err(JunctionError::Disconnected) => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert_eq!(requestor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_sweep_completes_with_disconnected() {
        let requestor = Requestor::new();
        let (conn, _sent) = Connection::pipe();
        let (other, _other_sent) = Connection::pipe();

        let req_a: Message = RpcRequest::new("a", json!({})).into();
        let req_b: Message = RpcRequest::new("b", json!({})).into();
        let reply_a = requestor.send(&conn, &req_a).unwrap();
        let reply_b = requestor.send(&other, &req_b).unwrap();

        requestor.on_connection_closed(&conn);

        match reply_a.wait().await {
            Err(JunctionError::Disconnected) => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
        // The other connection's entry survives the sweep.
        assert_eq!(requestor.pending_count(), 1);
        requestor.on_response(&other, RpcResponse::new(req_b.id(), RCode::Ok, json!(1)).into());
        assert!(reply_b.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_reply_handle_is_fine() {
        let requestor = Requestor::new();
        let (conn, _sent) = Connection::pipe();

        let req: Message = RpcRequest::new("Add", json!({})).into();
        drop(requestor.send(&conn, &req).unwrap());

        // Completion lands on a dropped receiver without fuss.
        requestor.on_response(&conn, RpcResponse::new(req.id(), RCode::Ok, json!(1)).into());
        assert_eq!(requestor.pending_count(), 0);
    }
}
