//! Routes table: request id → handler capability.
//!
//! Services register their method handles once at startup; the table is
//! read-only thereafter. A request id is `service_id XOR method_id`, both
//! CRC-32 of the respective name strings, so a duplicate registration is a
//! name collision and fatal.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use courier_core::RecvContext;
use courier_proto::Envelope;

use crate::errors::{HandlerError, ServerError};

/// A method implementation: consumes a receive context, produces a reply
/// envelope.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one request.
    async fn handle(&self, ctx: RecvContext) -> Result<Envelope, HandlerError>;
}

/// One routable method of a service.
#[derive(Clone)]
pub struct MethodHandle {
    /// Owning service name.
    pub service_name: &'static str,
    /// Method name.
    pub method_name: &'static str,
    /// Routing id: `crc32(service_name) ^ crc32(method_name)`.
    pub request_id: u32,
    /// The implementation.
    pub handler: Arc<dyn Handler>,
}

impl MethodHandle {
    /// Build a handle, deriving the request id from the names.
    #[must_use]
    pub fn new(
        service_name: &'static str,
        method_name: &'static str,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            service_name,
            method_name,
            request_id: courier_proto::request_id(service_name, method_name),
            handler,
        }
    }
}

impl std::fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandle")
            .field("service", &self.service_name)
            .field("method", &self.method_name)
            .field("request_id", &format_args!("{:#010x}", self.request_id))
            .finish()
    }
}

/// A named bundle of method handles.
pub trait Service {
    /// Service name (hashed into every method's request id).
    fn service_name(&self) -> &'static str;

    /// The methods this service routes.
    fn methods(&self) -> Vec<MethodHandle>;
}

/// Request-id-keyed dispatch table. Populated at startup, read-only after.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: HashMap<u32, MethodHandle>,
}

impl Router {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the table with a service's method handles.
    ///
    /// # Errors
    ///
    /// - [`ServerError::DuplicateRoute`] if a request id is already taken.
    pub fn register_service(&mut self, service: &dyn Service) -> Result<(), ServerError> {
        for method in service.methods() {
            if self.routes.contains_key(&method.request_id) {
                return Err(ServerError::DuplicateRoute {
                    request_id: method.request_id,
                    service: method.service_name.to_string(),
                    method: method.method_name.to_string(),
                });
            }
            tracing::debug!(
                service = method.service_name,
                method = method.method_name,
                request_id = format_args!("{:#010x}", method.request_id),
                "route registered"
            );
            self.routes.insert(method.request_id, method);
        }
        Ok(())
    }

    /// Handle for `request_id`, if routed.
    #[must_use]
    pub fn get(&self, request_id: u32) -> Option<&MethodHandle> {
        self.routes.get(&request_id)
    }

    /// Number of routed methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// No methods routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
