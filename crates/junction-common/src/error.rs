use thiserror::Error;

use crate::proto::RCode;

/// Errors surfaced by the framework.
///
/// Wire-level response codes ([`RCode`]) are a separate taxonomy carried
/// inside response bodies; a non-OK code observed by a caller is bridged into
/// [`JunctionError::Rpc`].
#[derive(Error, Debug)]
pub enum JunctionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection is down")]
    Disconnected,

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("unknown message type tag {0}")]
    MsgType(i32),

    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("message failed schema check: {0}")]
    Check(String),

    #[error("call failed: {}", .0.reason())]
    Rpc(RCode),

    #[error("no provider found for method '{0}'")]
    NoProvider(String),
}

pub type Result<T> = std::result::Result<T, JunctionError>;
