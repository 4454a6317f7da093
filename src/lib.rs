//! # opmux
//!
//! Operation multiplexer for framed, bidirectional host-device transports.
//!
//! The crate turns a raw per-connection stream of fixed-header frames into
//! tracked, in-flight *operations*: each submitted request gets a
//! correlation id, a timeout, and exactly one completion — delivered to a
//! callback or to a waiting submitter — when its response arrives, its
//! timeout fires, or it is canceled. Inbound requests are copied off the
//! receive path and handed to the connection's protocol on a dedicated
//! runner task.
//!
//! ## Architecture
//!
//! - **Transport seam** ([`HostDevice`]): buffer allocation and
//!   asynchronous frame send/cancel, implemented by the physical driver.
//! - **Receive path** ([`Connection::recv`]): synchronous, non-blocking
//!   classification of inbound frames; never runs user code.
//! - **Deferred runner** ([`spawn_runner`]): the single serialized worker
//!   that executes request handlers and completion callbacks.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use opmux::{Connection, NullProtocol, Operation, spawn_runner};
//!
//! # async fn demo(hd: Arc<dyn opmux::HostDevice>) -> opmux::Result<()> {
//! let (runner, _task) = spawn_runner();
//! let connection = Connection::new(hd, Arc::new(NullProtocol), runner, 5);
//! connection.set_enabled(true);
//!
//! let operation = Operation::create(&connection, 0x01, 2, 4)?;
//! operation.request().payload_mut().copy_from_slice(&[0xAA, 0xBB]);
//! operation.request_send(None).await?;
//! assert!(operation.result().is_success());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod handler;
pub mod hostdev;
pub mod message;
pub mod operation;
pub mod protocol;
pub mod runner;

mod pending;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connection, ConnectionConfig, OPERATION_TIMEOUT_DEFAULT};
pub use error::{Error, Result};
pub use handler::{ConnectionProtocol, NullProtocol, ProtocolRegistry};
pub use hostdev::{HostDevice, SendCookie};
pub use message::Message;
pub use operation::{Operation, OperationCallback};
pub use protocol::{Header, OperationResult, HEADER_SIZE, MESSAGE_SIZE_MAX};
pub use runner::{spawn_runner, RunnerHandle};

/// Lock a mutex, riding through poisoning: the guarded sections never run
/// user code, so a poisoned lock still holds consistent data.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
