//! The service registry: provider and discoverer bookkeeping plus
//! online/offline notification fan-out.
//!
//! Two symmetric indices, each behind its own mutex, with a per-entry mutex
//! over the entry's method list. Fan-out snapshots the recipient connections
//! under the index lock and sends strictly outside every lock, so a send
//! callback racing a close callback can never re-enter a held lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use junction_common::proto::{
    HostAddr, Message, RCode, ServiceOp, ServiceRequest, ServiceResponse,
};
use junction_common::transport::ConnectionRef;

/// One provider: its connection, advertised host and offered methods.
pub struct ProviderEntry {
    pub conn: ConnectionRef,
    pub host: HostAddr,
    methods: Mutex<Vec<String>>,
}

impl ProviderEntry {
    fn append_method(&self, method: &str) {
        self.methods.lock().unwrap().push(method.to_string());
    }

    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }
}

/// method -> providers and connection -> provider indices.
#[derive(Default)]
struct ProviderIndex {
    inner: Mutex<ProviderMaps>,
}

#[derive(Default)]
struct ProviderMaps {
    by_method: HashMap<String, HashMap<u64, Arc<ProviderEntry>>>,
    by_conn: HashMap<u64, Arc<ProviderEntry>>,
}

impl ProviderIndex {
    fn add(&self, conn: &ConnectionRef, host: &HostAddr, method: &str) {
        let entry = {
            let mut maps = self.inner.lock().unwrap();
            let entry = maps
                .by_conn
                .entry(conn.id())
                .or_insert_with(|| {
                    Arc::new(ProviderEntry {
                        conn: conn.clone(),
                        host: host.clone(),
                        methods: Mutex::new(Vec::new()),
                    })
                })
                .clone();
            maps.by_method
                .entry(method.to_string())
                .or_default()
                .insert(conn.id(), entry.clone());
            entry
        };
        entry.append_method(method);
    }

    fn get(&self, conn: &ConnectionRef) -> Option<Arc<ProviderEntry>> {
        self.inner.lock().unwrap().by_conn.get(&conn.id()).cloned()
    }

    fn remove(&self, conn: &ConnectionRef) {
        let mut maps = self.inner.lock().unwrap();
        let Some(entry) = maps.by_conn.remove(&conn.id()) else {
            return;
        };
        for method in entry.methods() {
            if let Some(providers) = maps.by_method.get_mut(&method) {
                providers.remove(&conn.id());
                if providers.is_empty() {
                    maps.by_method.remove(&method);
                }
            }
        }
    }

    /// Hosts currently offering `method`.
    fn method_hosts(&self, method: &str) -> Vec<HostAddr> {
        self.inner
            .lock()
            .unwrap()
            .by_method
            .get(method)
            .map(|providers| providers.values().map(|p| p.host.clone()).collect())
            .unwrap_or_default()
    }
}

struct DiscovererEntry {
    conn: ConnectionRef,
    methods: Mutex<Vec<String>>,
}

/// method -> discoverers and connection -> discoverer indices.
#[derive(Default)]
struct DiscovererIndex {
    inner: Mutex<DiscovererMaps>,
}

#[derive(Default)]
struct DiscovererMaps {
    by_method: HashMap<String, HashMap<u64, Arc<DiscovererEntry>>>,
    by_conn: HashMap<u64, Arc<DiscovererEntry>>,
}

impl DiscovererIndex {
    fn add(&self, conn: &ConnectionRef, method: &str) {
        let entry = {
            let mut maps = self.inner.lock().unwrap();
            let entry = maps
                .by_conn
                .entry(conn.id())
                .or_insert_with(|| {
                    Arc::new(DiscovererEntry {
                        conn: conn.clone(),
                        methods: Mutex::new(Vec::new()),
                    })
                })
                .clone();
            maps.by_method
                .entry(method.to_string())
                .or_default()
                .insert(conn.id(), entry.clone());
            entry
        };
        entry.methods.lock().unwrap().push(method.to_string());
    }

    fn remove(&self, conn: &ConnectionRef) {
        let mut maps = self.inner.lock().unwrap();
        let Some(entry) = maps.by_conn.remove(&conn.id()) else {
            return;
        };
        let methods = entry.methods.lock().unwrap().clone();
        for method in methods {
            if let Some(discoverers) = maps.by_method.get_mut(&method) {
                discoverers.remove(&conn.id());
                if discoverers.is_empty() {
                    maps.by_method.remove(&method);
                }
            }
        }
    }

    /// Push one online/offline event to every discoverer of `method`.
    fn notify(&self, method: &str, host: &HostAddr, op: ServiceOp) {
        // Snapshot under the lock, send outside it.
        let targets: Vec<ConnectionRef> = {
            let maps = self.inner.lock().unwrap();
            match maps.by_method.get(method) {
                Some(discoverers) => discoverers.values().map(|d| d.conn.clone()).collect(),
                None => return,
            }
        };

        let notice = Message::from(ServiceRequest::new(method, op, Some(host.clone())));
        for conn in targets {
            conn.send(&notice);
        }
    }
}

/// The registry service: handles service requests and connection teardown.
#[derive(Default)]
pub struct Registry {
    providers: ProviderIndex,
    discoverers: DiscovererIndex,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher handler for service requests.
    pub fn on_service_request(&self, conn: &ConnectionRef, req: ServiceRequest) {
        match req.optype() {
            Some(ServiceOp::Registry) => {
                let Some(host) = req.host.clone() else {
                    // Decode guarantees the host for registry ops.
                    tracing::warn!(method = %req.method, "registry request without host");
                    return;
                };
                tracing::info!(method = %req.method, host = %host, "service registered");
                self.providers.add(conn, &host, &req.method);
                self.discoverers.notify(&req.method, &host, ServiceOp::Online);
                conn.send(&ServiceResponse::ack(req.id, RCode::Ok, ServiceOp::Registry).into());
            }
            Some(ServiceOp::Discovery) => {
                tracing::info!(method = %req.method, peer = %conn.peer(), "service discovery");
                self.discoverers.add(conn, &req.method);
                let hosts = self.providers.method_hosts(&req.method);
                let rsp = if hosts.is_empty() {
                    ServiceResponse::ack(req.id, RCode::NotFoundService, ServiceOp::Discovery)
                } else {
                    ServiceResponse::discovery(req.id, req.method, hosts)
                };
                conn.send(&rsp.into());
            }
            _ => {
                tracing::warn!(optype = req.op, "service request with invalid optype");
                conn.send(
                    &ServiceResponse::ack(req.id, RCode::InvalidOptype, ServiceOp::Unknown).into(),
                );
            }
        }
    }

    /// Close handler: unindex a closing provider, then offline-notify for
    /// each method it offered; a discoverer is just dropped. Unindexing
    /// first keeps the dead host out of any discovery answer that races
    /// the notifications.
    pub fn on_connection_closed(&self, conn: &ConnectionRef) {
        if let Some(provider) = self.providers.get(conn) {
            self.providers.remove(conn);
            for method in provider.methods() {
                self.discoverers.notify(&method, &provider.host, ServiceOp::Offline);
            }
        }
        self.discoverers.remove(conn);
    }

    /// Providers currently offering `method`; used by tests and tooling.
    pub fn method_hosts(&self, method: &str) -> Vec<HostAddr> {
        self.providers.method_hosts(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_common::transport::Connection;

    fn registry_req(method: &str, op: ServiceOp, host: Option<HostAddr>) -> ServiceRequest {
        ServiceRequest::new(method, op, host)
    }

    #[test]
    fn test_register_then_discover() {
        let registry = Registry::new();
        let (provider, mut provider_sent) = Connection::pipe();
        let (discoverer, mut discoverer_sent) = Connection::pipe();

        let host = HostAddr::new("1.1.1.1", 9001);
        registry.on_service_request(
            &provider,
            registry_req("Add", ServiceOp::Registry, Some(host.clone())),
        );
        match provider_sent.try_next().unwrap() {
            Message::ServiceResponse(rsp) => {
                assert_eq!(rsp.rcode, RCode::Ok);
                assert_eq!(rsp.optype(), Some(ServiceOp::Registry));
            }
            other => panic!("unexpected: {other:?}"),
        }

        registry.on_service_request(&discoverer, registry_req("Add", ServiceOp::Discovery, None));
        match discoverer_sent.try_next().unwrap() {
            Message::ServiceResponse(rsp) => {
                assert_eq!(rsp.rcode, RCode::Ok);
                assert_eq!(rsp.method.as_deref(), Some("Add"));
                assert_eq!(rsp.hosts, Some(vec![host]));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_discover_unknown_method() {
        let registry = Registry::new();
        let (discoverer, mut sent) = Connection::pipe();

        registry.on_service_request(&discoverer, registry_req("Add", ServiceOp::Discovery, None));
        match sent.try_next().unwrap() {
            Message::ServiceResponse(rsp) => assert_eq!(rsp.rcode, RCode::NotFoundService),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_online_notification_reaches_interested_discoverer() {
        let registry = Registry::new();
        let (provider, _provider_sent) = Connection::pipe();
        let (discoverer, mut discoverer_sent) = Connection::pipe();

        registry.on_service_request(&discoverer, registry_req("Add", ServiceOp::Discovery, None));
        let _ = discoverer_sent.try_next();

        let host = HostAddr::new("1.1.1.1", 9001);
        registry.on_service_request(
            &provider,
            registry_req("Add", ServiceOp::Registry, Some(host.clone())),
        );

        match discoverer_sent.try_next().unwrap() {
            Message::ServiceRequest(req) => {
                assert_eq!(req.optype(), Some(ServiceOp::Online));
                assert_eq!(req.method, "Add");
                assert_eq!(req.host, Some(host));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_provider_close_sends_offline_and_unindexes() {
        let registry = Registry::new();
        let (provider, _provider_sent) = Connection::pipe();
        let (discoverer, mut discoverer_sent) = Connection::pipe();

        registry.on_service_request(&discoverer, registry_req("Add", ServiceOp::Discovery, None));
        let _ = discoverer_sent.try_next();

        let host = HostAddr::new("1.1.1.1", 9001);
        registry.on_service_request(
            &provider,
            registry_req("Add", ServiceOp::Registry, Some(host.clone())),
        );
        let _ = discoverer_sent.try_next(); // online notice

        registry.on_connection_closed(&provider);
        match discoverer_sent.try_next().unwrap() {
            Message::ServiceRequest(req) => {
                assert_eq!(req.optype(), Some(ServiceOp::Offline));
                assert_eq!(req.host, Some(host));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(registry.method_hosts("Add").is_empty());
    }

    #[test]
    fn test_uninterested_discoverer_not_notified() {
        let registry = Registry::new();
        let (provider, _provider_sent) = Connection::pipe();
        let (discoverer, mut discoverer_sent) = Connection::pipe();

        registry.on_service_request(&discoverer, registry_req("Mul", ServiceOp::Discovery, None));
        let _ = discoverer_sent.try_next();

        registry.on_service_request(
            &provider,
            registry_req("Add", ServiceOp::Registry, Some(HostAddr::new("1.1.1.1", 9001))),
        );
        assert!(discoverer_sent.try_next().is_none());
    }

    #[test]
    fn test_invalid_optype_answered_not_dropped() {
        let registry = Registry::new();
        let (conn, mut sent) = Connection::pipe();

        let mut req = registry_req("Add", ServiceOp::Unknown, None);
        req.op = 9;
        registry.on_service_request(&conn, req);

        match sent.try_next().unwrap() {
            Message::ServiceResponse(rsp) => {
                assert_eq!(rsp.rcode, RCode::InvalidOptype);
                assert_eq!(rsp.optype(), Some(ServiceOp::Unknown));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(conn.connected());
    }

    #[test]
    fn test_multi_method_provider_offline_covers_all() {
        let registry = Registry::new();
        let (provider, _p) = Connection::pipe();
        let (discoverer, mut sent) = Connection::pipe();

        registry.on_service_request(&discoverer, registry_req("Add", ServiceOp::Discovery, None));
        let _ = sent.try_next();
        registry.on_service_request(&discoverer, registry_req("Mul", ServiceOp::Discovery, None));
        let _ = sent.try_next();

        let host = HostAddr::new("1.1.1.1", 9001);
        registry.on_service_request(
            &provider,
            registry_req("Add", ServiceOp::Registry, Some(host.clone())),
        );
        registry.on_service_request(
            &provider,
            registry_req("Mul", ServiceOp::Registry, Some(host.clone())),
        );
        let _ = sent.try_next();
        let _ = sent.try_next();

        registry.on_connection_closed(&provider);
        let mut offline_methods = Vec::new();
        while let Some(Message::ServiceRequest(req)) = sent.try_next() {
            assert_eq!(req.optype(), Some(ServiceOp::Offline));
            offline_methods.push(req.method);
        }
        offline_methods.sort();
        assert_eq!(offline_methods, vec!["Add", "Mul"]);
    }
}
