//! Connections and the receive dispatcher.
//!
//! A [`Connection`] is one logical channel to a remote cport. It owns the
//! per-connection operation registry and the id counter, carries the host
//! device and protocol references, and exposes [`recv`](Connection::recv),
//! the entry point the transport feeds inbound frames into.
//!
//! `recv` may be called from any context: it never blocks, allocates only
//! with non-blocking flags, and never invokes user code. Request handlers
//! and completion callbacks are pushed onto the deferred runner instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::handler::ConnectionProtocol;
use crate::hostdev::HostDevice;
use crate::lock;
use crate::operation::Operation;
use crate::pending::PendingTable;
use crate::protocol::{Header, HEADER_SIZE};
use crate::runner::RunnerHandle;

/// Default time limit for a submitted operation to complete.
pub const OPERATION_TIMEOUT_DEFAULT: Duration = Duration::from_millis(1000);

/// Per-connection tunables.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long a submitted request may wait for its response.
    pub operation_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            operation_timeout: OPERATION_TIMEOUT_DEFAULT,
        }
    }
}

/// One logical channel between the host and a remote endpoint.
pub struct Connection {
    hd: Arc<dyn HostDevice>,
    protocol: Arc<dyn ConnectionProtocol>,
    runner: RunnerHandle,
    cport_id: u16,
    enabled: AtomicBool,
    table: Mutex<PendingTable>,
    config: ConnectionConfig,
}

impl Connection {
    /// Create a connection with default configuration.
    ///
    /// Connections start disabled; nothing can be submitted or received
    /// until [`set_enabled`](Self::set_enabled) turns them on.
    pub fn new(
        hd: Arc<dyn HostDevice>,
        protocol: Arc<dyn ConnectionProtocol>,
        runner: RunnerHandle,
        cport_id: u16,
    ) -> Arc<Self> {
        Self::with_config(hd, protocol, runner, cport_id, ConnectionConfig::default())
    }

    /// Create a connection with explicit configuration.
    pub fn with_config(
        hd: Arc<dyn HostDevice>,
        protocol: Arc<dyn ConnectionProtocol>,
        runner: RunnerHandle,
        cport_id: u16,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            hd,
            protocol,
            runner,
            cport_id,
            enabled: AtomicBool::new(false),
            table: Mutex::new(PendingTable::new()),
            config,
        })
    }

    /// The transport-layer address of the remote endpoint.
    pub fn cport_id(&self) -> u16 {
        self.cport_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable the connection. Disabled connections reject
    /// submissions and drop everything they receive.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Number of operations awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.table().pending_len()
    }

    /// Number of live operations on this connection, pending included.
    pub fn operation_count(&self) -> usize {
        self.table().live_len()
    }

    /// Handle data arriving on the connection.
    ///
    /// `data` holds one frame as presented by the transport; the buffer
    /// may be reused as soon as this returns, so anything of interest is
    /// copied out here. Malformed frames and unknown correlation ids are
    /// logged and dropped; they never fail a local operation other than
    /// by letting its timeout elapse.
    pub fn recv(self: &Arc<Self>, data: &[u8]) {
        if !self.is_enabled() {
            tracing::warn!(
                cport_id = self.cport_id,
                len = data.len(),
                "dropping received bytes, connection disabled"
            );
            return;
        }

        let Some(header) = Header::decode(data) else {
            tracing::warn!(cport_id = self.cport_id, len = data.len(), "message too small");
            return;
        };

        let frame_size = header.size as usize;
        if frame_size < HEADER_SIZE || frame_size > data.len() {
            tracing::warn!(
                cport_id = self.cport_id,
                frame_size,
                len = data.len(),
                "incomplete message"
            );
            return;
        }
        let frame = &data[..frame_size];

        if header.is_response() {
            self.recv_response(header.operation_id, frame);
        } else {
            self.recv_request(header.operation_id, header.op_type, frame);
        }
    }

    /// A response arrived: claim the pending operation, record the
    /// outcome and queue the completion.
    fn recv_response(self: &Arc<Self>, operation_id: u16, frame: &[u8]) {
        let Some(operation) = self.take_pending(operation_id) else {
            tracing::warn!(
                cport_id = self.cport_id,
                operation_id,
                "response for unknown operation"
            );
            return;
        };

        operation.disarm_timeout();
        if !operation.accept_response(frame) {
            tracing::warn!(
                cport_id = self.cport_id,
                operation_id,
                "response exceeds receive buffer"
            );
        }
        self.enqueue_completion(operation);
    }

    /// A request arrived: build an incoming operation around a copy of
    /// the frame and queue it for the protocol's handler.
    fn recv_request(self: &Arc<Self>, operation_id: u16, op_type: u8, frame: &[u8]) {
        let operation = match Operation::create_incoming(self, op_type, frame.len()) {
            Ok(operation) => operation,
            Err(err) => {
                tracing::error!(
                    cport_id = self.cport_id,
                    %err,
                    "cannot create incoming operation"
                );
                return;
            }
        };
        operation.set_id(operation_id);
        operation.accept_request(frame);
        self.enqueue_completion(operation);
    }

    pub(crate) fn enqueue_completion(&self, operation: Arc<Operation>) {
        if !self.runner.enqueue(operation) {
            tracing::error!(
                cport_id = self.cport_id,
                "completion runner is gone, dropping completion"
            );
        }
    }

    pub(crate) fn protocol_request_recv(&self, op_type: u8, operation: &Arc<Operation>) -> bool {
        self.protocol.request_recv(op_type, operation)
    }

    pub(crate) fn host_device(&self) -> Arc<dyn HostDevice> {
        Arc::clone(&self.hd)
    }

    pub(crate) fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout
    }

    pub(crate) fn link(&self, operation: Arc<Operation>) {
        self.table().insert(operation);
    }

    pub(crate) fn insert_pending(&self, operation: &Arc<Operation>) -> u16 {
        self.table().insert_pending(operation)
    }

    pub(crate) fn remove_pending(&self, operation: &Arc<Operation>) -> bool {
        self.table().remove_pending(operation)
    }

    pub(crate) fn take_pending(&self, id: u16) -> Option<Arc<Operation>> {
        self.table().take_pending(id)
    }

    pub(crate) fn unlink(&self, operation: &Arc<Operation>) {
        self.table().unlink(operation);
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        lock(&self.table)
    }

    #[cfg(test)]
    pub(crate) fn set_op_cycle(&self, value: u16) {
        self.table().set_op_cycle(value);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cport_id", &self.cport_id)
            .field("enabled", &self.is_enabled())
            .field("pending", &self.pending_count())
            .finish()
    }
}
