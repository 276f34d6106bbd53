//! Rpc call shapes on top of the requestor.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

use junction_common::error::{JunctionError, Result};
use junction_common::proto::{Message, RCode, RpcRequest};
use junction_common::transport::ConnectionRef;

use crate::requestor::Requestor;

/// Future-style handle to an rpc result.
pub struct RpcReply {
    rx: oneshot::Receiver<Result<Value>>,
}

impl RpcReply {
    /// Resolve to the call result. A non-OK response code or a dead
    /// connection resolves to the matching error.
    pub async fn wait(self) -> Result<Value> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(JunctionError::Disconnected),
        }
    }
}

/// Issues rpc requests over any connection and interprets the responses.
///
/// All three shapes go through the shared [`Requestor`]; the awaiting shape
/// is the future shape waited on.
pub struct RpcCaller {
    requestor: Arc<Requestor>,
}

impl RpcCaller {
    pub fn new(requestor: Arc<Requestor>) -> Self {
        Self { requestor }
    }

    /// Call and wait for the result.
    pub async fn call(&self, conn: &ConnectionRef, method: &str, params: Value) -> Result<Value> {
        let req: Message = RpcRequest::new(method, params).into();
        let rsp = self.requestor.send_wait(conn, &req).await?;
        unwrap_result(rsp)
    }

    /// Call and return a handle resolving to the result.
    pub fn call_future(&self, conn: &ConnectionRef, method: &str, params: Value) -> Result<RpcReply> {
        let req: Message = RpcRequest::new(method, params).into();
        let (tx, rx) = oneshot::channel();
        self.requestor.send_with(conn, &req, move |rsp| {
            let _ = tx.send(rsp.and_then(unwrap_result));
        })?;
        Ok(RpcReply { rx })
    }

    /// Call; `callback` runs with the result on the dispatch task.
    pub fn call_with(
        &self,
        conn: &ConnectionRef,
        method: &str,
        params: Value,
        callback: impl FnOnce(Result<Value>) + Send + 'static,
    ) -> Result<()> {
        let req: Message = RpcRequest::new(method, params).into();
        self.requestor
            .send_with(conn, &req, move |rsp| callback(rsp.and_then(unwrap_result)))
    }
}

fn unwrap_result(msg: Message) -> Result<Value> {
    match msg {
        Message::RpcResponse(rsp) if rsp.rcode == RCode::Ok => Ok(rsp.result),
        Message::RpcResponse(rsp) => Err(JunctionError::Rpc(rsp.rcode)),
        other => Err(JunctionError::Check(format!(
            "expected an rpc response, got {:?}",
            other.mtype()
        ))),
    }
}
