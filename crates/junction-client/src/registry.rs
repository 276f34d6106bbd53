//! Registry-side clients: method registration for providers, discovery with
//! a host cache and round-robin selection for consumers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use junction_common::dispatcher::Dispatcher;
use junction_common::error::{JunctionError, Result};
use junction_common::proto::{
    HostAddr, Message, MsgType, RCode, ServiceOp, ServiceRequest,
};
use junction_common::transport::{Callbacks, ConnectionRef, TcpClient};

use crate::requestor::Requestor;

/// Provider half: registers methods at the registry.
pub struct Provider {
    requestor: Arc<Requestor>,
}

impl Provider {
    pub fn new(requestor: Arc<Requestor>) -> Self {
        Self { requestor }
    }

    pub async fn register_method(
        &self,
        conn: &ConnectionRef,
        method: &str,
        host: &HostAddr,
    ) -> Result<()> {
        let req: Message =
            ServiceRequest::new(method, ServiceOp::Registry, Some(host.clone())).into();
        let rsp = self.requestor.send_wait(conn, &req).await?;
        match rsp {
            Message::ServiceResponse(rsp) if rsp.rcode == RCode::Ok => Ok(()),
            Message::ServiceResponse(rsp) => Err(JunctionError::Rpc(rsp.rcode)),
            other => Err(JunctionError::Check(format!(
                "expected a service response, got {:?}",
                other.mtype()
            ))),
        }
    }
}

/// Provider host list for one method with its round-robin cursor.
///
/// The cursor is taken modulo the live host count under the lock, so a list
/// that shrank since the last call still yields a valid index.
pub struct MethodHosts {
    inner: Mutex<HostRing>,
}

struct HostRing {
    hosts: Vec<HostAddr>,
    cursor: usize,
}

impl MethodHosts {
    pub fn new(hosts: Vec<HostAddr>) -> Self {
        Self {
            inner: Mutex::new(HostRing { hosts, cursor: 0 }),
        }
    }

    /// Next host in rotation, `None` when no provider is left.
    pub fn choose(&self) -> Option<HostAddr> {
        let mut ring = self.inner.lock().unwrap();
        if ring.hosts.is_empty() {
            return None;
        }
        let idx = ring.cursor % ring.hosts.len();
        ring.cursor = ring.cursor.wrapping_add(1);
        Some(ring.hosts[idx].clone())
    }

    pub fn append(&self, host: HostAddr) {
        self.inner.lock().unwrap().hosts.push(host);
    }

    pub fn remove(&self, host: &HostAddr) {
        self.inner.lock().unwrap().hosts.retain(|h| h != host);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().hosts.is_empty()
    }
}

/// Runs when an offline notice removes a host; the pooled rpc client uses it
/// to evict the host's cached connection.
pub type OfflineCallback = Arc<dyn Fn(&HostAddr) + Send + Sync>;

/// Discoverer half: resolves method names to provider hosts.
///
/// Lookups hit the local cache first; the cache is kept current by the
/// online/offline notices the registry pushes.
pub struct Discoverer {
    requestor: Arc<Requestor>,
    method_hosts: Mutex<HashMap<String, Arc<MethodHosts>>>,
    on_offline: OfflineCallback,
}

impl Discoverer {
    pub fn new(requestor: Arc<Requestor>, on_offline: OfflineCallback) -> Self {
        Self {
            requestor,
            method_hosts: Mutex::new(HashMap::new()),
            on_offline,
        }
    }

    /// Resolve one provider host for `method`, querying the registry when
    /// the cache has nothing usable.
    pub async fn discover(&self, conn: &ConnectionRef, method: &str) -> Result<HostAddr> {
        if let Some(ring) = self.method_hosts.lock().unwrap().get(method).cloned() {
            if let Some(host) = ring.choose() {
                return Ok(host);
            }
        }

        let req: Message = ServiceRequest::new(method, ServiceOp::Discovery, None).into();
        let rsp = self.requestor.send_wait(conn, &req).await?;
        let rsp = match rsp {
            Message::ServiceResponse(rsp) => rsp,
            other => {
                return Err(JunctionError::Check(format!(
                    "expected a service response, got {:?}",
                    other.mtype()
                )))
            }
        };
        if rsp.rcode != RCode::Ok {
            tracing::warn!(method, rcode = ?rsp.rcode, "discovery failed");
            return Err(JunctionError::Rpc(rsp.rcode));
        }

        let ring = Arc::new(MethodHosts::new(rsp.hosts.unwrap_or_default()));
        let host = ring
            .choose()
            .ok_or_else(|| JunctionError::NoProvider(method.to_string()))?;
        self.method_hosts
            .lock()
            .unwrap()
            .insert(method.to_string(), ring);
        Ok(host)
    }

    /// Dispatcher handler for the registry's online/offline notices.
    pub fn on_service_request(&self, _conn: &ConnectionRef, req: ServiceRequest) {
        let Some(host) = req.host.clone() else {
            tracing::warn!(method = %req.method, "service notice without host");
            return;
        };
        match req.optype() {
            Some(ServiceOp::Online) => {
                tracing::info!(method = %req.method, host = %host, "provider online");
                self.method_hosts
                    .lock()
                    .unwrap()
                    .entry(req.method.clone())
                    .or_insert_with(|| Arc::new(MethodHosts::new(Vec::new())))
                    .append(host);
            }
            Some(ServiceOp::Offline) => {
                tracing::info!(method = %req.method, host = %host, "provider offline");
                let known = {
                    let cache = self.method_hosts.lock().unwrap();
                    cache.get(&req.method).cloned()
                };
                let Some(ring) = known else { return };
                ring.remove(&host);
                (self.on_offline)(&host);
            }
            _ => {
                tracing::warn!(optype = req.op, "ignoring service notice with unexpected optype");
            }
        }
    }
}

/// Client a provider uses to talk to the registry.
pub struct RegistryClient {
    provider: Provider,
    client: TcpClient,
}

impl RegistryClient {
    pub async fn connect(registry_addr: &str) -> Result<Self> {
        let requestor = Arc::new(Requestor::new());
        let dispatcher = Arc::new(Dispatcher::new());
        {
            let requestor = requestor.clone();
            dispatcher.register::<Message>(MsgType::ServiceResponse, move |conn, msg| {
                requestor.on_response(conn, msg);
            });
        }

        let client = TcpClient::connect(registry_addr, wire(dispatcher, requestor.clone())).await?;
        Ok(Self {
            provider: Provider::new(requestor),
            client,
        })
    }

    pub async fn register_method(&self, method: &str, host: &HostAddr) -> Result<()> {
        self.provider
            .register_method(self.client.connection(), method, host)
            .await
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

/// Client a consumer uses for discovery and offline tracking.
pub struct DiscoveryClient {
    discoverer: Arc<Discoverer>,
    client: TcpClient,
}

impl DiscoveryClient {
    pub async fn connect(registry_addr: &str, on_offline: OfflineCallback) -> Result<Self> {
        let requestor = Arc::new(Requestor::new());
        let discoverer = Arc::new(Discoverer::new(requestor.clone(), on_offline));

        let dispatcher = Arc::new(Dispatcher::new());
        {
            let requestor = requestor.clone();
            dispatcher.register::<Message>(MsgType::ServiceResponse, move |conn, msg| {
                requestor.on_response(conn, msg);
            });
        }
        {
            let discoverer = discoverer.clone();
            dispatcher.register(MsgType::ServiceRequest, move |conn: &ConnectionRef, req| {
                discoverer.on_service_request(conn, req);
            });
        }

        let client = TcpClient::connect(registry_addr, wire(dispatcher, requestor)).await?;
        Ok(Self { discoverer, client })
    }

    pub async fn discover(&self, method: &str) -> Result<HostAddr> {
        self.discoverer
            .discover(self.client.connection(), method)
            .await
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

/// Standard client wiring: messages go through the dispatcher, a closing
/// connection sweeps the requestor.
pub(crate) fn wire(dispatcher: Arc<Dispatcher>, requestor: Arc<Requestor>) -> Callbacks {
    Callbacks {
        on_up: None,
        on_down: Some(Arc::new(move |conn| requestor.on_connection_closed(conn))),
        on_message: Some(Arc::new(move |conn, msg| dispatcher.dispatch(conn, msg))),
    }
}
