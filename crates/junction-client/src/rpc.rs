//! The rpc client: direct or discovery mode, with a per-host connection pool.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use junction_common::dispatcher::Dispatcher;
use junction_common::error::Result;
use junction_common::proto::{HostAddr, Message, MsgType};
use junction_common::transport::TcpClient;

use crate::caller::{RpcCaller, RpcReply};
use crate::registry::{wire, DiscoveryClient};
use crate::requestor::Requestor;

/// Cache of established provider connections keyed by host.
#[derive(Default)]
struct Pool {
    conns: Mutex<HashMap<HostAddr, Arc<TcpClient>>>,
}

impl Pool {
    fn get(&self, host: &HostAddr) -> Option<Arc<TcpClient>> {
        self.conns.lock().unwrap().get(host).cloned()
    }

    fn put(&self, host: HostAddr, client: Arc<TcpClient>) {
        self.conns.lock().unwrap().insert(host, client);
    }

    fn evict(&self, host: &HostAddr) -> Option<Arc<TcpClient>> {
        self.conns.lock().unwrap().remove(host)
    }
}

enum Target {
    /// Fixed provider; every call goes over one connection.
    Direct(Arc<TcpClient>),
    /// Resolve method to host through the registry, pool per host.
    Discovery {
        registry: DiscoveryClient,
        pool: Arc<Pool>,
    },
}

/// Client for calling rpc methods.
///
/// Construct with [`RpcClient::connect`] against a known provider, or with
/// [`RpcClient::with_discovery`] against a registry. In discovery mode host
/// selection is round-robin across the method's providers and an offline
/// notice evicts the host's pooled connection.
pub struct RpcClient {
    requestor: Arc<Requestor>,
    caller: RpcCaller,
    dispatcher: Arc<Dispatcher>,
    target: Target,
}

impl RpcClient {
    /// Direct mode: `provider_addr` is the rpc server itself.
    pub async fn connect(provider_addr: &str) -> Result<Self> {
        let (requestor, dispatcher) = plumbing();
        let client = Arc::new(
            TcpClient::connect(provider_addr, wire(dispatcher.clone(), requestor.clone())).await?,
        );
        Ok(Self {
            caller: RpcCaller::new(requestor.clone()),
            requestor,
            dispatcher,
            target: Target::Direct(client),
        })
    }

    /// Discovery mode: `registry_addr` is the registry; providers are
    /// resolved per call.
    pub async fn with_discovery(registry_addr: &str) -> Result<Self> {
        let (requestor, dispatcher) = plumbing();
        let pool = Arc::new(Pool::default());

        let on_offline = {
            let pool = pool.clone();
            Arc::new(move |host: &HostAddr| {
                if let Some(client) = pool.evict(host) {
                    tracing::info!(%host, "evicting connection to offline provider");
                    client.shutdown();
                }
            })
        };
        let registry = DiscoveryClient::connect(registry_addr, on_offline).await?;

        Ok(Self {
            caller: RpcCaller::new(requestor.clone()),
            requestor,
            dispatcher,
            target: Target::Discovery { registry, pool },
        })
    }

    /// Call and wait for the result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let client = self.client_for(method).await?;
        self.caller.call(client.connection(), method, params).await
    }

    /// Call and get a handle resolving to the result.
    pub async fn call_future(&self, method: &str, params: Value) -> Result<RpcReply> {
        let client = self.client_for(method).await?;
        self.caller.call_future(client.connection(), method, params)
    }

    /// Call; `callback` runs with the result on the dispatch task.
    pub async fn call_with(
        &self,
        method: &str,
        params: Value,
        callback: impl FnOnce(Result<Value>) + Send + 'static,
    ) -> Result<()> {
        let client = self.client_for(method).await?;
        self.caller
            .call_with(client.connection(), method, params, callback)
    }

    pub fn shutdown(&self) {
        match &self.target {
            Target::Direct(client) => client.shutdown(),
            Target::Discovery { registry, pool } => {
                registry.shutdown();
                let clients: Vec<Arc<TcpClient>> =
                    pool.conns.lock().unwrap().drain().map(|(_, c)| c).collect();
                for client in clients {
                    client.shutdown();
                }
            }
        }
    }

    /// Resolve the connection a call for `method` should use.
    async fn client_for(&self, method: &str) -> Result<Arc<TcpClient>> {
        match &self.target {
            Target::Direct(client) => Ok(client.clone()),
            Target::Discovery { registry, pool } => {
                let host = registry.discover(method).await?;
                if let Some(client) = pool.get(&host) {
                    if client.connected() {
                        return Ok(client);
                    }
                    pool.evict(&host);
                }
                tracing::debug!(%host, "opening provider connection");
                let client = Arc::new(
                    TcpClient::connect(
                        &host.to_string(),
                        wire(self.dispatcher.clone(), self.requestor.clone()),
                    )
                    .await?,
                );
                pool.put(host, client.clone());
                Ok(client)
            }
        }
    }
}

/// Requestor plus a dispatcher routing rpc responses back into it; shared by
/// every provider connection this client opens.
fn plumbing() -> (Arc<Requestor>, Arc<Dispatcher>) {
    let requestor = Arc::new(Requestor::new());
    let dispatcher = Arc::new(Dispatcher::new());
    {
        let requestor = requestor.clone();
        dispatcher.register::<Message>(MsgType::RpcResponse, move |conn, msg| {
            requestor.on_response(conn, msg);
        });
    }
    (requestor, dispatcher)
}
