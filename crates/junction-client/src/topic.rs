//! Topic client: drives the broker and routes pushed messages to local
//! subscription callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use junction_common::dispatcher::Dispatcher;
use junction_common::error::{JunctionError, Result};
use junction_common::proto::{Message, MsgType, RCode, TopicOp, TopicRequest};
use junction_common::transport::{ConnectionRef, TcpClient};

use crate::registry::wire;
use crate::requestor::Requestor;

/// Runs on the dispatch task with (topic, payload) for each pushed message.
pub type SubscribeCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct Subscriptions {
    callbacks: Mutex<HashMap<String, SubscribeCallback>>,
}

impl Subscriptions {
    fn add(&self, topic: &str, cb: SubscribeCallback) {
        self.callbacks.lock().unwrap().insert(topic.to_string(), cb);
    }

    fn remove(&self, topic: &str) {
        self.callbacks.lock().unwrap().remove(topic);
    }

    fn get(&self, topic: &str) -> Option<SubscribeCallback> {
        self.callbacks.lock().unwrap().get(topic).cloned()
    }

    /// Dispatcher handler for pushed publish frames.
    fn on_publish(&self, _conn: &ConnectionRef, req: TopicRequest) {
        if req.optype() != Some(TopicOp::Publish) {
            tracing::warn!(optype = req.op, "unexpected topic operation pushed to client");
            return;
        }
        let Some(payload) = &req.payload else {
            // Decode guarantees a payload on publish frames.
            tracing::warn!(topic = %req.topic, "publish frame without payload");
            return;
        };
        match self.get(&req.topic) {
            Some(cb) => cb(&req.topic, payload),
            None => {
                tracing::warn!(topic = %req.topic, "publish for a topic with no local subscription");
            }
        }
    }
}

/// Client for the topic broker.
pub struct TopicClient {
    requestor: Arc<Requestor>,
    subscriptions: Arc<Subscriptions>,
    client: TcpClient,
}

impl TopicClient {
    pub async fn connect(broker_addr: &str) -> Result<Self> {
        let requestor = Arc::new(Requestor::new());
        let subscriptions = Arc::new(Subscriptions::default());

        let dispatcher = Arc::new(Dispatcher::new());
        {
            let requestor = requestor.clone();
            dispatcher.register::<Message>(MsgType::TopicResponse, move |conn, msg| {
                requestor.on_response(conn, msg);
            });
        }
        {
            let subscriptions = subscriptions.clone();
            dispatcher.register(MsgType::TopicRequest, move |conn: &ConnectionRef, req| {
                subscriptions.on_publish(conn, req);
            });
        }

        let client = TcpClient::connect(broker_addr, wire(dispatcher, requestor.clone())).await?;
        Ok(Self {
            requestor,
            subscriptions,
            client,
        })
    }

    /// Create the topic at the broker. Idempotent.
    pub async fn create(&self, topic: &str) -> Result<()> {
        self.request(topic, TopicOp::Create, None).await
    }

    /// Remove the topic; every subscriber loses it.
    pub async fn remove(&self, topic: &str) -> Result<()> {
        self.request(topic, TopicOp::Remove, None).await
    }

    /// Subscribe and route pushed messages for `topic` into `callback`.
    pub async fn subscribe(
        &self,
        topic: &str,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Result<()> {
        // Install before asking the broker: the first push may beat the ack.
        self.subscriptions.add(topic, Arc::new(callback));
        match self.request(topic, TopicOp::Subscribe, None).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.subscriptions.remove(topic);
                Err(e)
            }
        }
    }

    pub async fn cancel(&self, topic: &str) -> Result<()> {
        self.subscriptions.remove(topic);
        self.request(topic, TopicOp::Cancel, None).await
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.request(topic, TopicOp::Publish, Some(payload.to_string()))
            .await
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }

    async fn request(&self, topic: &str, op: TopicOp, payload: Option<String>) -> Result<()> {
        let req: Message = TopicRequest::new(topic, op, payload).into();
        let rsp = self
            .requestor
            .send_wait(self.client.connection(), &req)
            .await?;
        match rsp {
            Message::TopicResponse(rsp) if rsp.rcode == RCode::Ok => Ok(()),
            Message::TopicResponse(rsp) => Err(JunctionError::Rpc(rsp.rcode)),
            other => Err(JunctionError::Check(format!(
                "expected a topic response, got {:?}",
                other.mtype()
            ))),
        }
    }
}
