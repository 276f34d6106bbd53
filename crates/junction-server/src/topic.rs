//! The topic broker: topic and subscriber bookkeeping plus publish fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use junction_common::proto::{Message, RCode, TopicOp, TopicRequest, TopicResponse};
use junction_common::transport::ConnectionRef;

struct Subscriber {
    conn: ConnectionRef,
    topics: Mutex<HashSet<String>>,
}

impl Subscriber {
    fn new(conn: &ConnectionRef) -> Arc<Self> {
        Arc::new(Subscriber {
            conn: conn.clone(),
            topics: Mutex::new(HashSet::new()),
        })
    }
}

struct Topic {
    name: String,
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
}

impl Topic {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Topic {
            name: name.to_string(),
            subscribers: Mutex::new(HashMap::new()),
        })
    }
}

/// Broker state: `topics` and `subscribers` indices, each behind its own
/// mutex, with per-entry mutexes over the cross-link sets. Index locks are
/// never held across a send and never nested with each other.
#[derive(Default)]
pub struct TopicBroker {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
}

impl TopicBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher handler for topic requests.
    pub fn on_topic_request(&self, conn: &ConnectionRef, req: TopicRequest) {
        let rcode = match req.optype() {
            Some(TopicOp::Create) => {
                self.create(&req.topic);
                RCode::Ok
            }
            Some(TopicOp::Remove) => {
                self.remove(&req.topic);
                RCode::Ok
            }
            Some(TopicOp::Subscribe) => {
                if self.subscribe(conn, &req.topic) {
                    RCode::Ok
                } else {
                    RCode::NotFoundTopic
                }
            }
            Some(TopicOp::Cancel) => {
                self.cancel(conn, &req.topic);
                RCode::Ok
            }
            Some(TopicOp::Publish) => {
                if self.publish(&req) {
                    RCode::Ok
                } else {
                    RCode::NotFoundTopic
                }
            }
            None => {
                tracing::warn!(optype = req.op, topic = %req.topic, "topic request with invalid optype");
                RCode::InvalidOptype
            }
        };
        conn.send(&TopicResponse::new(req.id, rcode).into());
    }

    /// Close handler: unlink the subscriber from every topic it held.
    /// A publisher that never subscribed has nothing to clean up.
    pub fn on_connection_closed(&self, conn: &ConnectionRef) {
        let Some(subscriber) = self.subscribers.lock().unwrap().remove(&conn.id()) else {
            return;
        };
        let affected: Vec<Arc<Topic>> = {
            let topics = self.topics.lock().unwrap();
            subscriber
                .topics
                .lock()
                .unwrap()
                .iter()
                .filter_map(|name| topics.get(name).cloned())
                .collect()
        };
        for topic in affected {
            topic.subscribers.lock().unwrap().remove(&conn.id());
        }
    }

    /// Idempotent topic allocation.
    fn create(&self, name: &str) {
        self.topics
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| Topic::new(name));
    }

    fn remove(&self, name: &str) {
        let Some(topic) = self.topics.lock().unwrap().remove(name) else {
            return;
        };
        let subscribers: Vec<Arc<Subscriber>> =
            topic.subscribers.lock().unwrap().values().cloned().collect();
        for subscriber in subscribers {
            subscriber.topics.lock().unwrap().remove(name);
            self.gc_subscriber(&subscriber);
        }
    }

    fn subscribe(&self, conn: &ConnectionRef, name: &str) -> bool {
        let Some(topic) = self.topics.lock().unwrap().get(name).cloned() else {
            return false;
        };
        let subscriber = self
            .subscribers
            .lock()
            .unwrap()
            .entry(conn.id())
            .or_insert_with(|| Subscriber::new(conn))
            .clone();
        topic
            .subscribers
            .lock()
            .unwrap()
            .insert(conn.id(), subscriber.clone());
        subscriber.topics.lock().unwrap().insert(name.to_string());
        true
    }

    /// Unlink if present; no error when the subscription never existed.
    fn cancel(&self, conn: &ConnectionRef, name: &str) {
        let topic = self.topics.lock().unwrap().get(name).cloned();
        let subscriber = self.subscribers.lock().unwrap().get(&conn.id()).cloned();

        if let Some(subscriber) = &subscriber {
            subscriber.topics.lock().unwrap().remove(name);
        }
        if let (Some(topic), Some(_)) = (topic, &subscriber) {
            topic.subscribers.lock().unwrap().remove(&conn.id());
        }
        if let Some(subscriber) = &subscriber {
            self.gc_subscriber(subscriber);
        }
    }

    fn publish(&self, req: &TopicRequest) -> bool {
        let Some(topic) = self.topics.lock().unwrap().get(&req.topic).cloned() else {
            return false;
        };
        // Snapshot, then fan out with no lock held. The forwarded message is
        // the publisher's request verbatim, id included.
        let targets: Vec<ConnectionRef> = topic
            .subscribers
            .lock()
            .unwrap()
            .values()
            .map(|s| s.conn.clone())
            .collect();
        tracing::debug!(topic = %topic.name, subscribers = targets.len(), "publishing");
        let msg = Message::from(req.clone());
        for conn in targets {
            conn.send(&msg);
        }
        true
    }

    /// Drop the subscriber entry once its last subscription is gone.
    fn gc_subscriber(&self, subscriber: &Arc<Subscriber>) {
        if subscriber.topics.lock().unwrap().is_empty() {
            self.subscribers
                .lock()
                .unwrap()
                .remove(&subscriber.conn.id());
        }
    }

    /// True while `name` exists; used by tests and tooling.
    pub fn has_topic(&self, name: &str) -> bool {
        self.topics.lock().unwrap().contains_key(name)
    }

    /// True while `conn` has at least one subscription.
    pub fn is_subscriber(&self, conn: &ConnectionRef) -> bool {
        self.subscribers.lock().unwrap().contains_key(&conn.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_common::transport::{Connection, SentFrames};

    fn req(topic: &str, op: TopicOp, payload: Option<&str>) -> TopicRequest {
        TopicRequest::new(topic, op, payload.map(str::to_owned))
    }

    fn expect_rcode(sent: &mut SentFrames, rcode: RCode) {
        match sent.try_next().expect("no response sent") {
            Message::TopicResponse(rsp) => assert_eq!(rsp.rcode, rcode),
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn expect_publish(sent: &mut SentFrames, topic: &str, payload: &str) {
        match sent.try_next().expect("no publish delivered") {
            Message::TopicRequest(req) => {
                assert_eq!(req.optype(), Some(TopicOp::Publish));
                assert_eq!(req.topic, topic);
                assert_eq!(req.payload.as_deref(), Some(payload));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_create_is_idempotent() {
        let broker = TopicBroker::new();
        let (conn, mut sent) = Connection::pipe();

        broker.on_topic_request(&conn, req("chat", TopicOp::Create, None));
        expect_rcode(&mut sent, RCode::Ok);
        broker.on_topic_request(&conn, req("chat", TopicOp::Create, None));
        expect_rcode(&mut sent, RCode::Ok);
        assert!(broker.has_topic("chat"));
    }

    #[test]
    fn test_subscribe_requires_topic() {
        let broker = TopicBroker::new();
        let (conn, mut sent) = Connection::pipe();

        broker.on_topic_request(&conn, req("chat", TopicOp::Subscribe, None));
        expect_rcode(&mut sent, RCode::NotFoundTopic);
        assert!(!broker.is_subscriber(&conn));
    }

    #[test]
    fn test_publish_fans_out_to_all_subscribers() {
        let broker = TopicBroker::new();
        let (s1, mut s1_sent) = Connection::pipe();
        let (s2, mut s2_sent) = Connection::pipe();
        let (publisher, mut pub_sent) = Connection::pipe();

        broker.on_topic_request(&s1, req("chat", TopicOp::Create, None));
        broker.on_topic_request(&s1, req("chat", TopicOp::Subscribe, None));
        broker.on_topic_request(&s2, req("chat", TopicOp::Subscribe, None));
        let _ = s1_sent.try_next();
        let _ = s1_sent.try_next();
        let _ = s2_sent.try_next();

        broker.on_topic_request(&publisher, req("chat", TopicOp::Publish, Some("hello")));
        expect_publish(&mut s1_sent, "chat", "hello");
        expect_publish(&mut s2_sent, "chat", "hello");
        expect_rcode(&mut pub_sent, RCode::Ok);
    }

    #[test]
    fn test_publish_to_missing_topic() {
        let broker = TopicBroker::new();
        let (publisher, mut sent) = Connection::pipe();

        broker.on_topic_request(&publisher, req("ghost", TopicOp::Publish, Some("x")));
        expect_rcode(&mut sent, RCode::NotFoundTopic);
    }

    #[test]
    fn test_publish_preserves_publisher_id() {
        let broker = TopicBroker::new();
        let (s1, mut s1_sent) = Connection::pipe();
        let (publisher, _pub_sent) = Connection::pipe();

        broker.on_topic_request(&s1, req("chat", TopicOp::Create, None));
        broker.on_topic_request(&s1, req("chat", TopicOp::Subscribe, None));
        let _ = s1_sent.try_next();
        let _ = s1_sent.try_next();

        let publish = req("chat", TopicOp::Publish, Some("hi"));
        let publish_id = publish.id.clone();
        broker.on_topic_request(&publisher, publish);

        match s1_sent.try_next().unwrap() {
            Message::TopicRequest(delivered) => assert_eq!(delivered.id, publish_id),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_remove_detaches_subscribers() {
        let broker = TopicBroker::new();
        let (s1, mut s1_sent) = Connection::pipe();
        let (publisher, mut pub_sent) = Connection::pipe();

        broker.on_topic_request(&s1, req("chat", TopicOp::Create, None));
        broker.on_topic_request(&s1, req("chat", TopicOp::Subscribe, None));
        broker.on_topic_request(&s1, req("chat", TopicOp::Remove, None));
        let _ = s1_sent.try_next();
        let _ = s1_sent.try_next();
        let _ = s1_sent.try_next();

        assert!(!broker.has_topic("chat"));
        // The only subscription died with the topic.
        assert!(!broker.is_subscriber(&s1));

        broker.on_topic_request(&publisher, req("chat", TopicOp::Publish, Some("x")));
        expect_rcode(&mut pub_sent, RCode::NotFoundTopic);
        assert!(s1_sent.try_next().is_none());
    }

    #[test]
    fn test_cancel_then_publish_skips_former_subscriber() {
        let broker = TopicBroker::new();
        let (s1, mut s1_sent) = Connection::pipe();
        let (s2, mut s2_sent) = Connection::pipe();
        let (publisher, _pub) = Connection::pipe();

        broker.on_topic_request(&s1, req("chat", TopicOp::Create, None));
        broker.on_topic_request(&s1, req("chat", TopicOp::Subscribe, None));
        broker.on_topic_request(&s2, req("chat", TopicOp::Subscribe, None));
        broker.on_topic_request(&s1, req("chat", TopicOp::Cancel, None));
        while s1_sent.try_next().is_some() {}
        let _ = s2_sent.try_next();

        broker.on_topic_request(&publisher, req("chat", TopicOp::Publish, Some("bye")));
        assert!(s1_sent.try_next().is_none());
        expect_publish(&mut s2_sent, "chat", "bye");
        assert!(!broker.is_subscriber(&s1));
    }

    #[test]
    fn test_cancel_without_subscription_is_quiet() {
        let broker = TopicBroker::new();
        let (conn, mut sent) = Connection::pipe();

        broker.on_topic_request(&conn, req("chat", TopicOp::Cancel, None));
        expect_rcode(&mut sent, RCode::Ok);
    }

    #[test]
    fn test_connection_close_cleans_up() {
        let broker = TopicBroker::new();
        let (s1, mut s1_sent) = Connection::pipe();
        let (s2, mut s2_sent) = Connection::pipe();
        let (publisher, _pub) = Connection::pipe();

        broker.on_topic_request(&s1, req("chat", TopicOp::Create, None));
        broker.on_topic_request(&s1, req("chat", TopicOp::Subscribe, None));
        broker.on_topic_request(&s2, req("chat", TopicOp::Subscribe, None));
        while s1_sent.try_next().is_some() {}
        let _ = s2_sent.try_next();

        broker.on_connection_closed(&s1);
        assert!(!broker.is_subscriber(&s1));

        broker.on_topic_request(&publisher, req("chat", TopicOp::Publish, Some("bye")));
        assert!(s1_sent.try_next().is_none());
        expect_publish(&mut s2_sent, "chat", "bye");
    }

    #[test]
    fn test_invalid_optype_answered() {
        let broker = TopicBroker::new();
        let (conn, mut sent) = Connection::pipe();

        let mut bad = req("chat", TopicOp::Create, None);
        bad.op = 42;
        broker.on_topic_request(&conn, bad);
        expect_rcode(&mut sent, RCode::InvalidOptype);
        assert!(conn.connected());
    }

    #[test]
    fn test_publish_order_preserved_per_subscriber() {
        let broker = TopicBroker::new();
        let (s1, mut s1_sent) = Connection::pipe();
        let (publisher, _pub) = Connection::pipe();

        broker.on_topic_request(&s1, req("chat", TopicOp::Create, None));
        broker.on_topic_request(&s1, req("chat", TopicOp::Subscribe, None));
        while s1_sent.try_next().is_some() {}

        for i in 0..5 {
            broker.on_topic_request(&publisher, req("chat", TopicOp::Publish, Some(&format!("m{i}"))));
        }
        for i in 0..5 {
            expect_publish(&mut s1_sent, "chat", &format!("m{i}"));
        }
    }
}
