//! End-to-end registry tests: registration, discovery, online/offline.

use junction_client::{DiscoveryClient, RegistryClient};
use junction_common::error::JunctionError;
use junction_common::proto::{HostAddr, RCode};
use junction_server::RegistryServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn test_discovery_of_unregistered_method_fails() {
    let registry = RegistryServer::bind("127.0.0.1:0").await.unwrap();
    registry.start();

    let discovery = DiscoveryClient::connect(&registry.local_addr().to_string(), Arc::new(|_| {}))
        .await
        .unwrap();

    match discovery.discover("Add").await {
        Err(JunctionError::Rpc(RCode::NotFoundService)) => {}
        other => panic!("expected NotFoundService, got {other:?}"),
    }

    discovery.shutdown();
    registry.shutdown();
}

#[tokio::test]
async fn test_register_then_discover() {
    let registry = RegistryServer::bind("127.0.0.1:0").await.unwrap();
    registry.start();
    let registry_addr = registry.local_addr().to_string();

    let provider = RegistryClient::connect(&registry_addr).await.unwrap();
    let host = HostAddr::new("1.1.1.1", 9001);
    provider.register_method("Add", &host).await.unwrap();

    let discovery = DiscoveryClient::connect(&registry_addr, Arc::new(|_| {}))
        .await
        .unwrap();
    assert_eq!(discovery.discover("Add").await.unwrap(), host);

    provider.shutdown();
    discovery.shutdown();
    registry.shutdown();
}

#[tokio::test]
async fn test_online_and_offline_notifications() {
    let registry = RegistryServer::bind("127.0.0.1:0").await.unwrap();
    registry.start();
    let registry_addr = registry.local_addr().to_string();

    // Discoverer first, so the registry knows who cares about "Add".
    let (offline_tx, mut offline_rx) = mpsc::unbounded_channel();
    let discovery = DiscoveryClient::connect(
        &registry_addr,
        Arc::new(move |host: &HostAddr| {
            let _ = offline_tx.send(host.clone());
        }),
    )
    .await
    .unwrap();
    match discovery.discover("Add").await {
        Err(JunctionError::Rpc(RCode::NotFoundService)) => {}
        other => panic!("expected NotFoundService, got {other:?}"),
    }

    // Provider comes online; the discoverer learns the host.
    let provider = RegistryClient::connect(&registry_addr).await.unwrap();
    let host = HostAddr::new("1.1.1.1", 9001);
    provider.register_method("Add", &host).await.unwrap();

    let resolved = timeout(Duration::from_secs(2), async {
        loop {
            match discovery.discover("Add").await {
                Ok(resolved) => return resolved,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(resolved, host);

    // Provider disconnects; the discoverer is told which host went away.
    provider.shutdown();
    let gone = timeout(Duration::from_secs(2), offline_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gone, host);

    // And the host never shows up in a discovery answer again.
    match discovery.discover("Add").await {
        Err(JunctionError::Rpc(RCode::NotFoundService)) => {}
        other => panic!("expected NotFoundService after offline, got {other:?}"),
    }

    discovery.shutdown();
    registry.shutdown();
}

#[tokio::test]
async fn test_discovery_lists_every_provider() {
    let registry = RegistryServer::bind("127.0.0.1:0").await.unwrap();
    registry.start();
    let registry_addr = registry.local_addr().to_string();

    let p1 = RegistryClient::connect(&registry_addr).await.unwrap();
    let p2 = RegistryClient::connect(&registry_addr).await.unwrap();
    let h1 = HostAddr::new("1.1.1.1", 9001);
    let h2 = HostAddr::new("2.2.2.2", 9002);
    p1.register_method("Add", &h1).await.unwrap();
    p2.register_method("Add", &h2).await.unwrap();

    let discovery = DiscoveryClient::connect(&registry_addr, Arc::new(|_| {}))
        .await
        .unwrap();
    // Round-robin across the answer set must reach both hosts.
    let a = discovery.discover("Add").await.unwrap();
    let b = discovery.discover("Add").await.unwrap();
    assert_ne!(a, b);
    assert!(a == h1 || a == h2);
    assert!(b == h1 || b == h2);

    p1.shutdown();
    p2.shutdown();
    discovery.shutdown();
    registry.shutdown();
}
