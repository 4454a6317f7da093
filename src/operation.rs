//! Tracked request/response operations.
//!
//! An [`Operation`] is one logical exchange over a connection: an outgoing
//! request awaiting its response, or an inbound request being handled. The
//! operation owns its request message (always) and response message
//! (outgoing, or once a handler attaches one), carries the correlation id
//! and the result code, and delivers its completion exactly once — to a
//! callback if one was supplied at submit time, otherwise to whoever
//! awaits [`wait`](Operation::wait).
//!
//! Lifetime is reference counted: the connection's lists, the timeout
//! task, and a queued runner job each hold an `Arc` while they may still
//! touch the operation. [`Operation::put`] releases the creator's
//! reference; the messages go back to the host device when the last
//! reference drops.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::lock;
use crate::message::Message;
use crate::protocol::{result_code, OperationResult, HEADER_SIZE};

/// Completion callback, invoked once on the deferred runner.
pub type OperationCallback = Box<dyn FnOnce(&Arc<Operation>) + Send + 'static>;

/// One request/response exchange on a connection.
pub struct Operation {
    connection: Weak<Connection>,
    /// Outgoing request we submitted, vs. inbound request we received.
    outgoing: bool,
    /// Correlation id; 0 until assigned at submit.
    id: AtomicU16,
    request: Mutex<Message>,
    response: Mutex<Option<Message>>,
    /// Wire result byte of the completed operation.
    result: AtomicU8,
    canceled: AtomicBool,
    /// Completion flag and signal; flipping it is the exactly-once gate.
    done: watch::Sender<bool>,
    callback: Mutex<Option<OperationCallback>>,
    timeout: Mutex<Option<AbortHandle>>,
}

impl Operation {
    fn from_parts(
        connection: &Arc<Connection>,
        outgoing: bool,
        request: Message,
        response: Option<Message>,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            connection: Arc::downgrade(connection),
            outgoing,
            id: AtomicU16::new(0),
            request: Mutex::new(request),
            response: Mutex::new(response),
            result: AtomicU8::new(result_code::SUCCESS),
            canceled: AtomicBool::new(false),
            done,
            callback: Mutex::new(None),
            timeout: Mutex::new(None),
        }
    }

    /// Create an outgoing operation.
    ///
    /// Both messages are allocated up front; the response must have room
    /// for at least one byte, since every response carries a status.
    /// The caller fills the request payload and then submits with
    /// [`request_send`](Self::request_send).
    pub fn create(
        connection: &Arc<Connection>,
        op_type: u8,
        request_payload: usize,
        response_payload: usize,
    ) -> Result<Arc<Self>> {
        if response_payload == 0 {
            return Err(Error::Invalid("response payload size must be non-zero"));
        }
        let hd = connection.host_device();
        let request = Message::alloc(hd.clone(), op_type, request_payload, true, true)?;
        let response = Message::alloc(hd, op_type, response_payload, false, true)?;

        let operation = Arc::new(Self::from_parts(connection, true, request, Some(response)));
        connection.link(Arc::clone(&operation));
        Ok(operation)
    }

    /// Create an operation for an inbound request frame.
    ///
    /// Called from the receive dispatcher: the allocation is non-blocking
    /// and no response message exists until a handler attaches one.
    pub(crate) fn create_incoming(
        connection: &Arc<Connection>,
        op_type: u8,
        frame_size: usize,
    ) -> Result<Arc<Self>> {
        let payload = frame_size.saturating_sub(HEADER_SIZE);
        let request = Message::alloc(connection.host_device(), op_type, payload, true, false)?;

        let operation = Arc::new(Self::from_parts(connection, false, request, None));
        connection.link(Arc::clone(&operation));
        Ok(operation)
    }

    /// Submit the request.
    ///
    /// Assigns the correlation id, hands the request to the transport and
    /// arms the operation timeout. With a callback the submission is
    /// asynchronous and the callback fires on the deferred runner; without
    /// one this call resolves when the operation completes, and dropping
    /// the returned future before then recalls the in-flight request.
    ///
    /// Submit-time failures come back as [`Error`] and the operation is
    /// not completed; the caller keeps ownership and decides whether to
    /// cancel or release it.
    pub async fn request_send(self: &Arc<Self>, callback: Option<OperationCallback>) -> Result<()> {
        let connection = self.connection.upgrade().ok_or(Error::NotConnected)?;
        if !connection.is_enabled() {
            return Err(Error::NotConnected);
        }

        let synchronous = callback.is_none();
        *lock(&self.callback) = callback;

        let id = connection.insert_pending(self);
        lock(&self.request).set_operation_id(id);

        if let Err(err) = lock(&self.request).send(connection.cport_id(), true) {
            // A failed submit must not leave a pending entry behind
            connection.remove_pending(self);
            return Err(err);
        }

        self.arm_timeout(&connection);

        if synchronous {
            self.wait().await?;
        }
        Ok(())
    }

    /// Block until the operation completes.
    ///
    /// Dropping the future before completion is the interrupted wait: the
    /// in-flight request buffer is recalled from the transport. Must not
    /// be used when a callback was supplied at submit.
    pub async fn wait(self: &Arc<Self>) -> Result<()> {
        let mut rx = self.done.subscribe();
        let mut guard = WaitGuard {
            operation: self,
            armed: true,
        };
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        guard.armed = false;
        Ok(())
    }

    /// Attach a response message to an inbound operation.
    ///
    /// Called by request handlers before filling the payload and sending
    /// with [`response_send`](Self::response_send). The response mirrors
    /// the request's type, with the response bit set.
    pub fn alloc_response(&self, payload_size: usize) -> Result<()> {
        let connection = self.connection.upgrade().ok_or(Error::NotConnected)?;
        let op_type = lock(&self.request).header().op_type;
        let message =
            Message::alloc(connection.host_device(), op_type, payload_size, false, true)?;
        *lock(&self.response) = Some(message);
        Ok(())
    }

    /// Transmit the response for an inbound operation.
    ///
    /// Stamps the operation's id and current result into the response
    /// header first. The operation itself is released through the normal
    /// put path once delivery finishes.
    pub fn response_send(&self) -> Result<()> {
        let connection = self.connection.upgrade().ok_or(Error::NotConnected)?;
        let mut slot = lock(&self.response);
        let message = slot
            .as_mut()
            .ok_or(Error::Invalid("no response message attached"))?;
        message.set_operation_id(self.id());
        message.set_result(self.result.load(Ordering::Acquire));
        message.send(connection.cport_id(), true)
    }

    /// Cancel the operation.
    ///
    /// Advisory and idempotent: marks the operation and recalls whichever
    /// of its buffers are in flight. Completion still flows through
    /// exactly one of the normal paths; cancel never synthesizes one.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        lock(&self.request).cancel();
        if let Some(response) = lock(&self.response).as_mut() {
            response.cancel();
        }
    }

    /// Release the creator's reference, unlinking the operation from its
    /// connection. The operation and its messages are destroyed when the
    /// last reference drops.
    pub fn put(operation: Arc<Self>) {
        if let Some(connection) = operation.connection.upgrade() {
            connection.unlink(&operation);
        }
    }

    /// The correlation id, or 0 before submission.
    pub fn id(&self) -> u16 {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: u16) {
        self.id.store(id, Ordering::Release);
    }

    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Whether the completion has been delivered.
    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    /// Result of the completed operation.
    pub fn result(&self) -> OperationResult {
        OperationResult::from_wire(self.result.load(Ordering::Acquire))
    }

    pub(crate) fn set_result(&self, result: OperationResult) {
        self.result.store(result.to_wire(), Ordering::Release);
    }

    /// The owning connection, while it is still alive.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    /// Locked view of the request message.
    pub fn request(&self) -> MessageRef<'_> {
        MessageRef(lock(&self.request))
    }

    /// Locked view of the response slot (`None` until a response message
    /// exists).
    pub fn response(&self) -> ResponseRef<'_> {
        ResponseRef(lock(&self.response))
    }

    fn arm_timeout(self: &Arc<Self>, connection: &Arc<Connection>) {
        let operation = Arc::clone(self);
        let conn = Arc::downgrade(connection);
        let timeout = connection.operation_timeout();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(connection) = conn.upgrade() else {
                return;
            };
            // Winning the pending removal claims the completion; if the
            // response got there first, this fires into nothing.
            if connection.remove_pending(&operation) {
                tracing::debug!(id = operation.id(), "operation timed out");
                operation.set_result(OperationResult::Timeout);
                connection.enqueue_completion(operation);
            }
        });
        *lock(&self.timeout) = Some(task.abort_handle());
    }

    /// Non-waiting timer cancel. If the timer already fired, the race is
    /// settled by the pending table, not here.
    pub(crate) fn disarm_timeout(&self) {
        if let Some(handle) = lock(&self.timeout).take() {
            handle.abort();
        }
    }

    /// Copy a matched response frame in and record its result.
    ///
    /// Returns false without copying when the frame exceeds the response
    /// buffer; the overflow is recorded as the operation's result.
    pub(crate) fn accept_response(&self, frame: &[u8]) -> bool {
        let mut slot = lock(&self.response);
        let Some(message) = slot.as_mut() else {
            return false;
        };
        if frame.len() > message.size() {
            drop(slot);
            self.set_result(OperationResult::Overflow);
            return false;
        }
        // Copy first, then read the result out of the copied header
        message.copy_from(frame);
        let result = message.header().result;
        drop(slot);
        self.result.store(result, Ordering::Release);
        true
    }

    /// Copy an inbound request frame into the request message.
    pub(crate) fn accept_request(&self, frame: &[u8]) {
        lock(&self.request).copy_from(frame);
    }

    /// Runner-side delivery: run the request handler for inbound
    /// operations, then complete.
    pub(crate) fn deliver(self: &Arc<Self>) {
        if !self.outgoing {
            self.handle_request();
        }
        self.complete();
    }

    fn handle_request(self: &Arc<Self>) {
        let op_type = lock(&self.request).header().op_type;
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        if !connection.protocol_request_recv(op_type, self) {
            tracing::error!(
                cport_id = connection.cport_id(),
                op_type,
                "unexpected incoming request type"
            );
            self.set_result(OperationResult::ProtocolBad);
        }
    }

    /// Single completion choke-point; idempotent. Invokes the callback if
    /// one was supplied, otherwise wakes waiters.
    pub(crate) fn complete(self: &Arc<Self>) {
        if self.done.send_replace(true) {
            return;
        }
        let callback = lock(&self.callback).take();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id())
            .field("outgoing", &self.outgoing)
            .field("result", &self.result())
            .field("canceled", &self.is_canceled())
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Recalls the request buffer when a synchronous wait is dropped before
/// its completion arrives.
struct WaitGuard<'a> {
    operation: &'a Operation,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed && !self.operation.is_complete() {
            lock(&self.operation.request).cancel();
        }
    }
}

/// Locked access to an operation's request message.
pub struct MessageRef<'a>(MutexGuard<'a, Message>);

impl Deref for MessageRef<'_> {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.0
    }
}

impl DerefMut for MessageRef<'_> {
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.0
    }
}

/// Locked access to an operation's response slot.
pub struct ResponseRef<'a>(MutexGuard<'a, Option<Message>>);

impl Deref for ResponseRef<'_> {
    type Target = Option<Message>;

    fn deref(&self) -> &Option<Message> {
        &self.0
    }
}

impl DerefMut for ResponseRef<'_> {
    fn deref_mut(&mut self) -> &mut Option<Message> {
        &mut self.0
    }
}
