//! The three server assemblies: rpc provider, registry, topic broker.
//!
//! Each one wires its service into a dispatcher, hands the dispatcher to a
//! [`TcpServer`], and exposes bind / start / shutdown plus whatever the role
//! needs on top (method registration for the rpc server).

use std::sync::Arc;

use junction_client::RegistryClient;
use junction_common::dispatcher::Dispatcher;
use junction_common::error::Result;
use junction_common::proto::{HostAddr, MsgType};
use junction_common::transport::{ConnectionRef, TcpServer};

use crate::registry::Registry;
use crate::router::{RpcRouter, ServiceDescribe};
use crate::topic::TopicBroker;

/// Serves rpc calls; optionally registers its methods at a registry.
pub struct RpcServer {
    router: Arc<RpcRouter>,
    server: Arc<TcpServer>,
    advertised: HostAddr,
    registry: Option<RegistryClient>,
}

impl RpcServer {
    /// Stand-alone provider bound to `addr`.
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::assemble(addr).await
    }

    /// Provider that also registers each method at `registry_addr`. The
    /// advertised address defaults to the bound one; behind a NAT, override
    /// it with [`RpcServer::advertise`] before registering methods.
    pub async fn with_registry(addr: &str, registry_addr: &str) -> Result<Self> {
        let mut server = Self::assemble(addr).await?;
        server.registry = Some(RegistryClient::connect(registry_addr).await?);
        Ok(server)
    }

    /// Override the address handed to the registry on registration.
    pub fn advertise(&mut self, host: HostAddr) {
        self.advertised = host;
    }

    async fn assemble(addr: &str) -> Result<Self> {
        let router = Arc::new(RpcRouter::new());
        let dispatcher = Arc::new(Dispatcher::new());
        {
            let router = router.clone();
            dispatcher.register(MsgType::RpcRequest, move |conn: &ConnectionRef, req| {
                router.on_rpc_request(conn, req);
            });
        }

        let server = TcpServer::bind(addr).await?;
        server.set_message_callback(Arc::new(move |conn, msg| dispatcher.dispatch(conn, msg)));

        let local = server.local_addr();
        Ok(Self {
            router,
            server,
            advertised: HostAddr::new(local.ip().to_string(), local.port()),
            registry: None,
        })
    }

    /// Install a method; with a registry attached the method is registered
    /// there first.
    pub async fn register_method(&self, service: ServiceDescribe) -> Result<()> {
        if let Some(registry) = &self.registry {
            registry
                .register_method(service.method(), &self.advertised)
                .await?;
        }
        self.router.register(service);
        Ok(())
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }

    /// Live inbound connections; the link to the registry is not one of them.
    pub fn connection_count(&self) -> usize {
        self.server.connection_count()
    }

    pub fn start(&self) {
        self.server.start();
    }

    pub fn shutdown(&self) {
        if let Some(registry) = &self.registry {
            registry.shutdown();
        }
        self.server.shutdown();
    }
}

/// The registry tier: provider/discoverer bookkeeping and notifications.
pub struct RegistryServer {
    server: Arc<TcpServer>,
}

impl RegistryServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let dispatcher = Arc::new(Dispatcher::new());
        {
            let registry = registry.clone();
            dispatcher.register(MsgType::ServiceRequest, move |conn: &ConnectionRef, req| {
                registry.on_service_request(conn, req);
            });
        }

        let server = TcpServer::bind(addr).await?;
        server.set_message_callback(Arc::new(move |conn, msg| dispatcher.dispatch(conn, msg)));
        server.set_close_callback(Arc::new(move |conn| registry.on_connection_closed(conn)));

        Ok(Self { server })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }

    pub fn start(&self) {
        self.server.start();
    }

    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}

/// The broker tier: topics, subscribers, fan-out.
pub struct TopicServer {
    server: Arc<TcpServer>,
}

impl TopicServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let broker = Arc::new(TopicBroker::new());

        let dispatcher = Arc::new(Dispatcher::new());
        {
            let broker = broker.clone();
            dispatcher.register(MsgType::TopicRequest, move |conn: &ConnectionRef, req| {
                broker.on_topic_request(conn, req);
            });
        }

        let server = TcpServer::bind(addr).await?;
        server.set_message_callback(Arc::new(move |conn, msg| dispatcher.dispatch(conn, msg)));
        server.set_close_callback(Arc::new(move |conn| broker.on_connection_closed(conn)));

        Ok(Self { server })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }

    pub fn start(&self) {
        self.server.start();
    }

    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}
