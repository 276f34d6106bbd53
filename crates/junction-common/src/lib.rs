//! Junction common layer.
//!
//! Everything the rpc, registry and topic services share: the wire protocol
//! ([`proto`]), the TCP transport with its connection callbacks
//! ([`transport`]), the per-endpoint message [`Dispatcher`], message id
//! generation and the crate-wide error type.
//!
//! # Wire format
//!
//! ```text
//! +-----+-------+-------+----+------+
//! | LEN | MTYPE | IDLEN | ID | BODY |
//! +-----+-------+-------+----+------+
//!   4B     4B      4B    var   var
//! ```
//!
//! All integers big-endian; `BODY` is a UTF-8 JSON object. See
//! [`proto::frame`] for the codec and [`proto::message`] for the per-variant
//! schemas.
//!
//! # Example
//!
//! ```
//! use junction_common::proto::{frame, Message, RpcRequest};
//! use serde_json::json;
//!
//! let msg: Message = RpcRequest::new("Add", json!({"num1": 11, "num2": 22})).into();
//! let bytes = frame::encode(&msg).unwrap();
//!
//! let mut buf = bytes::BytesMut::from(&bytes[..]);
//! assert!(frame::can_decode(&buf));
//! assert_eq!(frame::decode(&mut buf).unwrap(), msg);
//! ```

pub mod dispatcher;
pub mod error;
pub mod id;
pub mod proto;
pub mod transport;

pub use dispatcher::{Dispatcher, FromMessage};
pub use error::{JunctionError, Result};
pub use id::message_id;
