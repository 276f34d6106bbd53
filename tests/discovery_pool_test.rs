//! End-to-end discovery-mode rpc: round-robin across providers, pool reuse,
//! and eviction when a provider goes offline.

mod support;

use junction_client::RpcClient;
use junction_server::{RegistryServer, RpcServer, ServiceDescribe, VType};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;

/// Provider whose "Which" method answers with its own index.
async fn provider(registry_addr: &str, index: i64) -> RpcServer {
    support::init_logging();
    let server = RpcServer::with_registry("127.0.0.1:0", registry_addr)
        .await
        .unwrap();
    server
        .register_method(
            ServiceDescribe::builder("Which", move |_| json!(index))
                .returns(VType::Integral)
                .build(),
        )
        .await
        .unwrap();
    server.start();
    server
}

#[tokio::test]
async fn test_round_robin_across_providers() {
    let registry = RegistryServer::bind("127.0.0.1:0").await.unwrap();
    registry.start();
    let registry_addr = registry.local_addr().to_string();

    let providers = vec![
        provider(&registry_addr, 0).await,
        provider(&registry_addr, 1).await,
        provider(&registry_addr, 2).await,
    ];

    let client = RpcClient::with_discovery(&registry_addr).await.unwrap();

    let mut answers = Vec::new();
    for _ in 0..5 {
        answers.push(
            client
                .call("Which", json!({}))
                .await
                .unwrap()
                .as_i64()
                .unwrap(),
        );
    }

    // One full rotation visits each provider exactly once, then repeats in
    // the same order.
    let first_cycle: HashSet<i64> = answers[..3].iter().copied().collect();
    assert_eq!(first_cycle, HashSet::from([0, 1, 2]));
    assert_eq!(answers[3], answers[0]);
    assert_eq!(answers[4], answers[1]);

    client.shutdown();
    for p in &providers {
        p.shutdown();
    }
    registry.shutdown();
}

#[tokio::test]
async fn test_offline_provider_leaves_rotation() {
    let registry = RegistryServer::bind("127.0.0.1:0").await.unwrap();
    registry.start();
    let registry_addr = registry.local_addr().to_string();

    let mut providers = vec![
        provider(&registry_addr, 0).await,
        provider(&registry_addr, 1).await,
        provider(&registry_addr, 2).await,
    ];

    let client = RpcClient::with_discovery(&registry_addr).await.unwrap();

    // Identify the rotation, then kill the provider answering second.
    let mut rotation = Vec::new();
    for _ in 0..3 {
        rotation.push(
            client
                .call("Which", json!({}))
                .await
                .unwrap()
                .as_i64()
                .unwrap(),
        );
    }
    let victim = rotation[1];
    providers.remove(victim as usize).shutdown();

    // The offline notice races the next calls; tolerate transient failures
    // until the victim has been out of the answers for a full window.
    let survivors: HashSet<i64> = rotation.iter().copied().filter(|v| *v != victim).collect();
    let stable = timeout(Duration::from_secs(5), async {
        let mut streak: Vec<i64> = Vec::new();
        loop {
            match client.call("Which", json!({})).await {
                Ok(v) => {
                    let v = v.as_i64().unwrap();
                    if v == victim {
                        streak.clear();
                    } else {
                        streak.push(v);
                        if streak.len() >= 6 {
                            return streak;
                        }
                    }
                }
                Err(_) => {
                    streak.clear();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
    })
    .await
    .expect("rotation never stabilized after provider went offline");

    // Only the survivors answer, and both still take turns.
    let seen: HashSet<i64> = stable.iter().copied().collect();
    assert_eq!(seen, survivors);
    for pair in stable.windows(2) {
        assert_ne!(pair[0], pair[1], "round-robin stopped alternating: {stable:?}");
    }

    client.shutdown();
    for p in &providers {
        p.shutdown();
    }
    registry.shutdown();
}

#[tokio::test]
async fn test_pool_reuses_connections() {
    let registry = RegistryServer::bind("127.0.0.1:0").await.unwrap();
    registry.start();
    let registry_addr = registry.local_addr().to_string();

    let p = provider(&registry_addr, 7).await;
    let client = RpcClient::with_discovery(&registry_addr).await.unwrap();

    for _ in 0..10 {
        assert_eq!(client.call("Which", json!({})).await.unwrap(), json!(7));
    }
    // Ten calls ride one pooled connection.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(p.connection_count(), 1);

    client.shutdown();
    p.shutdown();
    registry.shutdown();
}
