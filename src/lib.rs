//! Junction: a unified RPC, service-discovery and topic pub/sub framework
//! over a length-prefixed, JSON-bodied TCP protocol.
//!
//! This crate just stitches the workspace together:
//!
//! - [`common`]: protocol, framing, transport, dispatcher.
//! - [`client`]: requestor, rpc caller, registry and topic clients, the
//!   pooled discovery-mode rpc client.
//! - [`server`]: rpc router, service registry, topic broker and the three
//!   server assemblies.

pub use junction_client as client;
pub use junction_common as common;
pub use junction_server as server;
