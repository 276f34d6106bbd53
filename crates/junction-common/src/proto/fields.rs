//! Wire-level enumerations and JSON body keys.
//!
//! Every value here is part of the wire contract: message type tags, response
//! codes, topic/service operation codes and the key names used inside JSON
//! bodies. Operation codes travel as plain integers; decoding keeps unknown
//! values around (see [`TopicOp::from_wire`]) so the semantic layer can answer
//! `INVALID_OPTYPE` instead of tearing the connection down.

/// Message type tag, the `MTYPE` field of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    RpcRequest = 0,
    RpcResponse = 1,
    TopicRequest = 2,
    TopicResponse = 3,
    ServiceRequest = 4,
    ServiceResponse = 5,
}

impl MsgType {
    pub fn from_wire(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(MsgType::RpcRequest),
            1 => Some(MsgType::RpcResponse),
            2 => Some(MsgType::TopicRequest),
            3 => Some(MsgType::TopicResponse),
            4 => Some(MsgType::ServiceRequest),
            5 => Some(MsgType::ServiceResponse),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

/// Response code carried in the `rcode` field of every response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RCode {
    Ok = 0,
    ParseFailed = 1,
    ErrorMsgType = 2,
    InvalidMsg = 3,
    Disconnected = 4,
    InvalidParams = 5,
    NotFoundService = 6,
    InvalidOptype = 7,
    NotFoundTopic = 8,
    InternalError = 9,
}

impl RCode {
    pub fn from_wire(code: i32) -> Option<Self> {
        match code {
            0 => Some(RCode::Ok),
            1 => Some(RCode::ParseFailed),
            2 => Some(RCode::ErrorMsgType),
            3 => Some(RCode::InvalidMsg),
            4 => Some(RCode::Disconnected),
            5 => Some(RCode::InvalidParams),
            6 => Some(RCode::NotFoundService),
            7 => Some(RCode::InvalidOptype),
            8 => Some(RCode::NotFoundTopic),
            9 => Some(RCode::InternalError),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }

    /// Human-readable reason for logs and error display.
    pub fn reason(self) -> &'static str {
        match self {
            RCode::Ok => "ok",
            RCode::ParseFailed => "message parse failed",
            RCode::ErrorMsgType => "wrong message type",
            RCode::InvalidMsg => "invalid message",
            RCode::Disconnected => "connection is down",
            RCode::InvalidParams => "invalid rpc parameters",
            RCode::NotFoundService => "service not found",
            RCode::InvalidOptype => "invalid operation type",
            RCode::NotFoundTopic => "topic not found",
            RCode::InternalError => "internal error",
        }
    }
}

/// Topic operation carried in `optype` of a topic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicOp {
    Create = 0,
    Remove = 1,
    Subscribe = 2,
    Cancel = 3,
    Publish = 4,
}

impl TopicOp {
    pub fn from_wire(op: i32) -> Option<Self> {
        match op {
            0 => Some(TopicOp::Create),
            1 => Some(TopicOp::Remove),
            2 => Some(TopicOp::Subscribe),
            3 => Some(TopicOp::Cancel),
            4 => Some(TopicOp::Publish),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

/// Service operation carried in `optype` of a service request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOp {
    Registry = 0,
    Discovery = 1,
    Online = 2,
    Offline = 3,
    Unknown = 4,
}

impl ServiceOp {
    pub fn from_wire(op: i32) -> Option<Self> {
        match op {
            0 => Some(ServiceOp::Registry),
            1 => Some(ServiceOp::Discovery),
            2 => Some(ServiceOp::Online),
            3 => Some(ServiceOp::Offline),
            4 => Some(ServiceOp::Unknown),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

// JSON body keys.
pub const KEY_METHOD: &str = "method";
pub const KEY_PARAMETERS: &str = "parameters";
pub const KEY_TOPIC_KEY: &str = "topic_key";
pub const KEY_TOPIC_MSG: &str = "topic_msg";
pub const KEY_OPTYPE: &str = "optype";
pub const KEY_HOST: &str = "host";
pub const KEY_HOST_IP: &str = "ip";
pub const KEY_HOST_PORT: &str = "port";
pub const KEY_RCODE: &str = "rcode";
pub const KEY_RESULT: &str = "result";

// Default demo ports; real deployments supply their own.
pub const DEFAULT_TOPIC_PORT: u16 = 7070;
pub const DEFAULT_RPC_PORT: u16 = 8080;
pub const DEFAULT_REGISTRY_PORT: u16 = 8899;
