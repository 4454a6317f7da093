//! Protocol request handling.
//!
//! Each connection carries a [`ConnectionProtocol`] that interprets the
//! type byte of inbound requests. Handlers run on the deferred completion
//! runner, never on the receive path; a handler typically attaches a
//! response with [`Operation::alloc_response`], fills the payload, and
//! calls [`Operation::response_send`].
//!
//! [`ProtocolRegistry`] is a ready-made implementation mapping opcodes to
//! closures, for protocols that don't need their own dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use crate::operation::Operation;

/// Per-connection protocol object.
pub trait ConnectionProtocol: Send + Sync {
    /// Handle an inbound request of the given type.
    ///
    /// Returns false when no handler is registered for `op_type`; the
    /// core then completes the operation with a protocol error.
    fn request_recv(&self, op_type: u8, operation: &Arc<Operation>) -> bool {
        let _ = (op_type, operation);
        false
    }
}

/// Protocol that expects no inbound requests.
pub struct NullProtocol;

impl ConnectionProtocol for NullProtocol {}

/// Boxed request handler.
pub type RequestHandler = Box<dyn Fn(&Arc<Operation>) + Send + Sync>;

/// Registry mapping request types to handlers.
pub struct ProtocolRegistry {
    handlers: HashMap<u8, RequestHandler>,
}

impl ProtocolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a request type, replacing any previous one.
    pub fn register<F>(&mut self, op_type: u8, handler: F)
    where
        F: Fn(&Arc<Operation>) + Send + Sync + 'static,
    {
        self.handlers.insert(op_type, Box::new(handler));
    }

    /// Check whether a handler is registered for a request type.
    pub fn handles(&self, op_type: u8) -> bool {
        self.handlers.contains_key(&op_type)
    }
}

impl ConnectionProtocol for ProtocolRegistry {
    fn request_recv(&self, op_type: u8, operation: &Arc<Operation>) -> bool {
        match self.handlers.get(&op_type) {
            Some(handler) => {
                handler(operation);
                true
            }
            None => false,
        }
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::connection::Connection;
    use crate::runner::RunnerHandle;
    use crate::testing::MockHostDevice;

    fn incoming_operation() -> Arc<Operation> {
        let hd = Arc::new(MockHostDevice::new());
        let (runner, _rx) = RunnerHandle::detached();
        let connection = Connection::new(hd, Arc::new(NullProtocol), runner, 1);
        Operation::create_incoming(&connection, 0x03, 10).unwrap()
    }

    #[test]
    fn registry_reports_registered_types() {
        let mut registry = ProtocolRegistry::new();
        registry.register(0x03, |_op| {});

        assert!(registry.handles(0x03));
        assert!(!registry.handles(0x04));
    }

    #[test]
    fn registry_dispatches_to_the_matching_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ProtocolRegistry::new();
        let counter = calls.clone();
        registry.register(0x03, move |_op| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let operation = incoming_operation();
        assert!(registry.request_recv(0x03, &operation));
        assert!(!registry.request_recv(0x04, &operation));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_replaces_handler_for_same_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ProtocolRegistry::new();

        registry.register(0x03, |_op| {});
        let counter = calls.clone();
        registry.register(0x03, move |_op| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let operation = incoming_operation();
        assert!(registry.request_recv(0x03, &operation));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn null_protocol_reports_no_handler() {
        let operation = incoming_operation();
        assert!(!NullProtocol.request_recv(0x03, &operation));
    }
}
