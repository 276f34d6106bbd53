//! Junction client layer.
//!
//! Client-side pieces of the three services, all built on the shared
//! [`Requestor`] correlation table:
//!
//! - [`RpcClient`]: calls methods on a fixed provider or, in discovery mode,
//!   on providers resolved through the registry with round-robin selection
//!   and a per-host connection pool.
//! - [`RegistryClient`] / [`DiscoveryClient`]: the provider and consumer
//!   halves of the service registry.
//! - [`TopicClient`]: topic lifecycle, publish, and subscription callbacks.
//!
//! Every call shape exists three ways: awaited, future-style
//! ([`caller::RpcReply`]) and callback. All of them resolve with an error
//! rather than hanging when the underlying connection dies.

pub mod caller;
pub mod registry;
pub mod requestor;
pub mod rpc;
pub mod topic;

pub use caller::{RpcCaller, RpcReply};
pub use registry::{DiscoveryClient, Discoverer, MethodHosts, OfflineCallback, Provider, RegistryClient};
pub use requestor::{PendingReply, Requestor};
pub use rpc::RpcClient;
pub use topic::{SubscribeCallback, TopicClient};
