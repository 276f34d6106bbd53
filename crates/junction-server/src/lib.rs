//! Junction server layer.
//!
//! The three server roles of the framework:
//!
//! - [`RpcServer`]: routes rpc requests through a [`RpcRouter`] of typed
//!   method descriptions, validating parameters before invoking handlers.
//! - [`RegistryServer`]: tracks providers and discoverers and pushes
//!   online/offline notices.
//! - [`TopicServer`]: manages topics and subscribers and fans published
//!   messages out.
//!
//! All three share the locking discipline of the underlying services:
//! index locks guard the maps, per-entry locks guard the cross-link sets,
//! and no network send ever happens under a lock.
//!
//! # Example
//!
//! ```no_run
//! use junction_server::{RpcServer, ServiceDescribe, VType};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> junction_common::Result<()> {
//! let server = RpcServer::bind("0.0.0.0:8080").await?;
//! server
//!     .register_method(
//!         ServiceDescribe::builder("Add", |params| {
//!             let a = params["num1"].as_i64().unwrap_or(0);
//!             let b = params["num2"].as_i64().unwrap_or(0);
//!             json!(a + b)
//!         })
//!         .param("num1", VType::Integral)
//!         .param("num2", VType::Integral)
//!         .returns(VType::Integral)
//!         .build(),
//!     )
//!     .await?;
//! server.start();
//! # Ok(())
//! # }
//! ```

pub mod registry;
pub mod router;
pub mod server;
pub mod topic;

pub use registry::Registry;
pub use router::{RpcRouter, ServiceDescribe, ServiceDescribeBuilder, VType};
pub use server::{RegistryServer, RpcServer, TopicServer};
pub use topic::TopicBroker;
