//! Server-side rpc dispatch: typed method descriptions and the router.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use junction_common::proto::{Message, RCode, RpcRequest, RpcResponse};
use junction_common::transport::ConnectionRef;

/// Value kind expected for a parameter or a return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VType {
    Bool,
    /// Any whole number.
    Integral,
    /// Integral or fractional.
    Numeric,
    String,
    Array,
    Object,
}

impl VType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            VType::Bool => value.is_boolean(),
            VType::Integral => value.is_i64() || value.is_u64(),
            VType::Numeric => value.is_number(),
            VType::String => value.is_string(),
            VType::Array => value.is_array(),
            VType::Object => value.is_object(),
        }
    }
}

/// The business callback bound to a method.
pub type ServiceHandler = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// Description of one callable method: name, ordered parameter schema,
/// return kind and handler.
///
/// The parameter schema is open at the tail: parameters the schema does not
/// list pass through unchecked.
pub struct ServiceDescribe {
    method: String,
    params: Vec<(String, VType)>,
    returns: VType,
    handler: ServiceHandler,
}

impl ServiceDescribe {
    pub fn builder(
        method: impl Into<String>,
        handler: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> ServiceDescribeBuilder {
        ServiceDescribeBuilder {
            method: method.into(),
            params: Vec::new(),
            returns: VType::Object,
            handler: Box::new(handler),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Presence and kind check for every schema-listed parameter.
    fn check_params(&self, params: &Value) -> bool {
        for (name, vtype) in &self.params {
            match params.get(name) {
                Some(value) if vtype.matches(value) => {}
                Some(_) => {
                    tracing::warn!(method = %self.method, param = %name, "parameter kind mismatch");
                    return false;
                }
                None => {
                    tracing::warn!(method = %self.method, param = %name, "parameter missing");
                    return false;
                }
            }
        }
        true
    }

    /// Invoke the handler. `None` when it panicked or returned the wrong
    /// kind; both surface to the caller as an internal error.
    fn call(&self, params: &Value) -> Option<Value> {
        match catch_unwind(AssertUnwindSafe(|| (self.handler)(params))) {
            Ok(result) if self.returns.matches(&result) => Some(result),
            Ok(_) => {
                tracing::warn!(method = %self.method, "handler returned the wrong value kind");
                None
            }
            Err(_) => {
                tracing::error!(method = %self.method, "handler panicked");
                None
            }
        }
    }
}

/// Builder for [`ServiceDescribe`].
pub struct ServiceDescribeBuilder {
    method: String,
    params: Vec<(String, VType)>,
    returns: VType,
    handler: ServiceHandler,
}

impl ServiceDescribeBuilder {
    /// Append one expected parameter. Order is kept for error reporting.
    pub fn param(mut self, name: impl Into<String>, vtype: VType) -> Self {
        self.params.push((name.into(), vtype));
        self
    }

    pub fn returns(mut self, vtype: VType) -> Self {
        self.returns = vtype;
        self
    }

    pub fn build(self) -> ServiceDescribe {
        ServiceDescribe {
            method: self.method,
            params: self.params,
            returns: self.returns,
            handler: self.handler,
        }
    }
}

/// Method name to description map.
#[derive(Default)]
struct ServiceRegistry {
    services: Mutex<HashMap<String, Arc<ServiceDescribe>>>,
}

impl ServiceRegistry {
    fn select(&self, method: &str) -> Option<Arc<ServiceDescribe>> {
        self.services.lock().unwrap().get(method).cloned()
    }

    fn insert(&self, desc: ServiceDescribe) {
        let desc = Arc::new(desc);
        self.services
            .lock()
            .unwrap()
            .insert(desc.method().to_string(), desc);
    }

    fn remove(&self, method: &str) {
        self.services.lock().unwrap().remove(method);
    }
}

/// Routes rpc requests to registered methods.
#[derive(Default)]
pub struct RpcRouter {
    services: ServiceRegistry,
}

impl RpcRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: ServiceDescribe) {
        self.services.insert(service);
    }

    pub fn unregister(&self, method: &str) {
        self.services.remove(method);
    }

    /// Dispatcher handler for rpc requests.
    pub fn on_rpc_request(&self, conn: &ConnectionRef, req: RpcRequest) {
        let Some(service) = self.services.select(&req.method) else {
            tracing::info!(method = %req.method, "method not found");
            return respond(conn, &req, RCode::NotFoundService, Value::Null);
        };
        if !service.check_params(&req.params) {
            return respond(conn, &req, RCode::InvalidParams, Value::Null);
        }
        match service.call(&req.params) {
            Some(result) => respond(conn, &req, RCode::Ok, result),
            None => respond(conn, &req, RCode::InternalError, Value::Null),
        }
    }
}

fn respond(conn: &ConnectionRef, req: &RpcRequest, rcode: RCode, result: Value) {
    let rsp = Message::from(RpcResponse::new(req.id.clone(), rcode, result));
    conn.send(&rsp);
}
