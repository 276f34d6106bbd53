//! Protocol definitions: wire enums, the message model and framing.
//!
//! The application protocol is length-prefixed frames carrying a type tag,
//! an ASCII message id and a JSON object body. Six message variants cover
//! the three services built on top of it:
//!
//! - **Rpc**: [`RpcRequest`] / [`RpcResponse`]
//! - **Topic pub/sub**: [`TopicRequest`] / [`TopicResponse`]
//! - **Service registry**: [`ServiceRequest`] / [`ServiceResponse`]
//!
//! Requests and responses are correlated by id, never by order.

pub mod fields;
pub mod frame;
pub mod message;

pub use fields::*;
pub use message::{
    HostAddr, Message, RpcRequest, RpcResponse, ServiceRequest, ServiceResponse, TopicRequest,
    TopicResponse,
};
