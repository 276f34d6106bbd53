//! The six-variant message model.
//!
//! Every message shares an envelope (id + type tag) and carries a JSON object
//! body. The variants are a flat enum of records; [`Message::decode`] is the
//! factory that picks the record type from the wire tag and then validates the
//! body field-by-field. Validation is deliberately hand-rolled: several rules
//! are conditional (a publish needs `topic_msg`, a discovery request omits
//! `host`) and cannot be expressed by derive alone.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{JunctionError, Result};
use crate::id::message_id;
use crate::proto::fields::*;

/// Address of a host that provides or consumes services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAddr {
    pub ip: String,
    pub port: u16,
}

impl HostAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Rpc call request: `method` plus a `parameters` object.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    /// Always a JSON object; guaranteed by the constructor and by decode.
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: message_id(),
            method: method.into(),
            params,
        }
    }
}

/// Rpc call response: `rcode` plus the call result.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: String,
    pub rcode: RCode,
    pub result: Value,
}

impl RpcResponse {
    pub fn new(id: impl Into<String>, rcode: RCode, result: Value) -> Self {
        Self {
            id: id.into(),
            rcode,
            result,
        }
    }
}

/// Topic operation request. `payload` carries the published message and is
/// mandatory exactly when the operation is [`TopicOp::Publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRequest {
    pub id: String,
    pub topic: String,
    /// Raw wire value; see [`TopicRequest::optype`].
    pub op: i32,
    pub payload: Option<String>,
}

impl TopicRequest {
    pub fn new(topic: impl Into<String>, op: TopicOp, payload: Option<String>) -> Self {
        Self {
            id: message_id(),
            topic: topic.into(),
            op: op.to_wire(),
            payload,
        }
    }

    /// Decoded operation, `None` when the peer sent a value outside the
    /// known set.
    pub fn optype(&self) -> Option<TopicOp> {
        TopicOp::from_wire(self.op)
    }
}

/// Topic operation response; a bare `rcode`.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicResponse {
    pub id: String,
    pub rcode: RCode,
}

impl TopicResponse {
    pub fn new(id: impl Into<String>, rcode: RCode) -> Self {
        Self { id: id.into(), rcode }
    }
}

/// Service operation request. `host` identifies the provider and is required
/// for every operation that names one (registry, online, offline); a
/// discovery request carries only the method.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub id: String,
    pub method: String,
    /// Raw wire value; see [`ServiceRequest::optype`].
    pub op: i32,
    pub host: Option<HostAddr>,
}

impl ServiceRequest {
    pub fn new(method: impl Into<String>, op: ServiceOp, host: Option<HostAddr>) -> Self {
        Self {
            id: message_id(),
            method: method.into(),
            op: op.to_wire(),
            host,
        }
    }

    pub fn optype(&self) -> Option<ServiceOp> {
        ServiceOp::from_wire(self.op)
    }
}

/// Service operation response. Discovery results additionally carry the
/// queried method and the current provider host list.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub id: String,
    pub rcode: RCode,
    pub op: i32,
    pub method: Option<String>,
    pub hosts: Option<Vec<HostAddr>>,
}

impl ServiceResponse {
    /// Plain acknowledgement (registry ack, error reply).
    pub fn ack(id: impl Into<String>, rcode: RCode, op: ServiceOp) -> Self {
        Self {
            id: id.into(),
            rcode,
            op: op.to_wire(),
            method: None,
            hosts: None,
        }
    }

    /// Successful discovery reply listing the providers of `method`.
    pub fn discovery(id: impl Into<String>, method: impl Into<String>, hosts: Vec<HostAddr>) -> Self {
        Self {
            id: id.into(),
            rcode: RCode::Ok,
            op: ServiceOp::Discovery.to_wire(),
            method: Some(method.into()),
            hosts: Some(hosts),
        }
    }

    pub fn optype(&self) -> Option<ServiceOp> {
        ServiceOp::from_wire(self.op)
    }
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RpcRequest(RpcRequest),
    RpcResponse(RpcResponse),
    TopicRequest(TopicRequest),
    TopicResponse(TopicResponse),
    ServiceRequest(ServiceRequest),
    ServiceResponse(ServiceResponse),
}

impl Message {
    pub fn mtype(&self) -> MsgType {
        match self {
            Message::RpcRequest(_) => MsgType::RpcRequest,
            Message::RpcResponse(_) => MsgType::RpcResponse,
            Message::TopicRequest(_) => MsgType::TopicRequest,
            Message::TopicResponse(_) => MsgType::TopicResponse,
            Message::ServiceRequest(_) => MsgType::ServiceRequest,
            Message::ServiceResponse(_) => MsgType::ServiceResponse,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::RpcRequest(m) => &m.id,
            Message::RpcResponse(m) => &m.id,
            Message::TopicRequest(m) => &m.id,
            Message::TopicResponse(m) => &m.id,
            Message::ServiceRequest(m) => &m.id,
            Message::ServiceResponse(m) => &m.id,
        }
    }

    /// Assemble the JSON body for this message.
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        match self {
            Message::RpcRequest(m) => {
                body.insert(KEY_METHOD.into(), Value::String(m.method.clone()));
                body.insert(KEY_PARAMETERS.into(), m.params.clone());
            }
            Message::RpcResponse(m) => {
                body.insert(KEY_RCODE.into(), m.rcode.to_wire().into());
                body.insert(KEY_RESULT.into(), m.result.clone());
            }
            Message::TopicRequest(m) => {
                body.insert(KEY_TOPIC_KEY.into(), Value::String(m.topic.clone()));
                body.insert(KEY_OPTYPE.into(), m.op.into());
                if let Some(payload) = &m.payload {
                    body.insert(KEY_TOPIC_MSG.into(), Value::String(payload.clone()));
                }
            }
            Message::TopicResponse(m) => {
                body.insert(KEY_RCODE.into(), m.rcode.to_wire().into());
            }
            Message::ServiceRequest(m) => {
                body.insert(KEY_METHOD.into(), Value::String(m.method.clone()));
                body.insert(KEY_OPTYPE.into(), m.op.into());
                if let Some(host) = &m.host {
                    body.insert(KEY_HOST.into(), host_to_value(host));
                }
            }
            Message::ServiceResponse(m) => {
                body.insert(KEY_RCODE.into(), m.rcode.to_wire().into());
                body.insert(KEY_OPTYPE.into(), m.op.into());
                if let Some(method) = &m.method {
                    body.insert(KEY_METHOD.into(), Value::String(method.clone()));
                }
                if let Some(hosts) = &m.hosts {
                    body.insert(
                        KEY_HOST.into(),
                        Value::Array(hosts.iter().map(host_to_value).collect()),
                    );
                }
            }
        }
        Value::Object(body)
    }

    /// Factory: construct the variant selected by `mtype` from a decoded
    /// body, enforcing the variant's schema.
    pub fn decode(mtype: MsgType, id: String, body: &Value) -> Result<Message> {
        let body = as_object(body)?;
        match mtype {
            MsgType::RpcRequest => {
                let method = req_string(body, KEY_METHOD)?;
                let params = body
                    .get(KEY_PARAMETERS)
                    .filter(|v| v.is_object())
                    .cloned()
                    .ok_or_else(|| check_failed(KEY_PARAMETERS, "object"))?;
                Ok(Message::RpcRequest(RpcRequest { id, method, params }))
            }
            MsgType::RpcResponse => {
                let rcode = req_rcode(body)?;
                // The result key must exist; JSON null is what error replies carry.
                if !body.contains_key(KEY_RESULT) {
                    return Err(check_failed(KEY_RESULT, "any"));
                }
                let result = body[KEY_RESULT].clone();
                Ok(Message::RpcResponse(RpcResponse { id, rcode, result }))
            }
            MsgType::TopicRequest => {
                let topic = req_string(body, KEY_TOPIC_KEY)?;
                let op = req_integral(body, KEY_OPTYPE)? as i32;
                let payload = opt_string(body, KEY_TOPIC_MSG)?;
                if op == TopicOp::Publish.to_wire() && payload.is_none() {
                    return Err(check_failed(KEY_TOPIC_MSG, "string"));
                }
                Ok(Message::TopicRequest(TopicRequest { id, topic, op, payload }))
            }
            MsgType::TopicResponse => {
                let rcode = req_rcode(body)?;
                Ok(Message::TopicResponse(TopicResponse { id, rcode }))
            }
            MsgType::ServiceRequest => {
                let method = req_string(body, KEY_METHOD)?;
                let op = req_integral(body, KEY_OPTYPE)? as i32;
                let host = opt_host(body)?;
                let host_required = matches!(
                    ServiceOp::from_wire(op),
                    Some(ServiceOp::Registry) | Some(ServiceOp::Online) | Some(ServiceOp::Offline)
                );
                if host_required && host.is_none() {
                    return Err(check_failed(KEY_HOST, "object"));
                }
                Ok(Message::ServiceRequest(ServiceRequest { id, method, op, host }))
            }
            MsgType::ServiceResponse => {
                let rcode = req_rcode(body)?;
                let op = req_integral(body, KEY_OPTYPE)? as i32;
                let method = opt_string(body, KEY_METHOD)?;
                let hosts = match body.get(KEY_HOST) {
                    None => None,
                    Some(Value::Array(items)) => Some(
                        items
                            .iter()
                            .map(value_to_host)
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    Some(_) => return Err(check_failed(KEY_HOST, "array")),
                };
                // A successful discovery reply must name the method and list hosts.
                if op == ServiceOp::Discovery.to_wire()
                    && rcode == RCode::Ok
                    && (method.is_none() || hosts.is_none())
                {
                    return Err(check_failed(KEY_HOST, "discovery result"));
                }
                Ok(Message::ServiceResponse(ServiceResponse {
                    id,
                    rcode,
                    op,
                    method,
                    hosts,
                }))
            }
        }
    }
}

impl From<RpcRequest> for Message {
    fn from(m: RpcRequest) -> Self {
        Message::RpcRequest(m)
    }
}

impl From<RpcResponse> for Message {
    fn from(m: RpcResponse) -> Self {
        Message::RpcResponse(m)
    }
}

impl From<TopicRequest> for Message {
    fn from(m: TopicRequest) -> Self {
        Message::TopicRequest(m)
    }
}

impl From<TopicResponse> for Message {
    fn from(m: TopicResponse) -> Self {
        Message::TopicResponse(m)
    }
}

impl From<ServiceRequest> for Message {
    fn from(m: ServiceRequest) -> Self {
        Message::ServiceRequest(m)
    }
}

impl From<ServiceResponse> for Message {
    fn from(m: ServiceResponse) -> Self {
        Message::ServiceResponse(m)
    }
}

fn host_to_value(host: &HostAddr) -> Value {
    let mut map = Map::new();
    map.insert(KEY_HOST_IP.into(), Value::String(host.ip.clone()));
    map.insert(KEY_HOST_PORT.into(), host.port.into());
    Value::Object(map)
}

fn value_to_host(value: &Value) -> Result<HostAddr> {
    serde_json::from_value(value.clone())
        .map_err(|_| check_failed(KEY_HOST, "{ip, port} object"))
}

fn as_object(body: &Value) -> Result<&Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| JunctionError::Check("message body is not a JSON object".into()))
}

fn check_failed(key: &str, expected: &str) -> JunctionError {
    JunctionError::Check(format!("field '{key}' missing or not a {expected}"))
}

fn req_string(body: &Map<String, Value>, key: &str) -> Result<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| check_failed(key, "string"))
}

fn opt_string(body: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match body.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(check_failed(key, "string")),
    }
}

fn req_integral(body: &Map<String, Value>, key: &str) -> Result<i64> {
    body.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| check_failed(key, "integer"))
}

fn req_rcode(body: &Map<String, Value>) -> Result<RCode> {
    let raw = req_integral(body, KEY_RCODE)?;
    RCode::from_wire(raw as i32).ok_or_else(|| check_failed(KEY_RCODE, "known response code"))
}

fn opt_host(body: &Map<String, Value>) -> Result<Option<HostAddr>> {
    match body.get(KEY_HOST) {
        None => Ok(None),
        Some(v) => Ok(Some(value_to_host(v)?)),
    }
}
