//! Error types for opmux.

use thiserror::Error;

/// Errors returned synchronously from submit-time and allocation paths.
///
/// Failures that occur after a request has been handed to the transport are
/// not reported here; they are recorded on the operation as an
/// [`OperationResult`](crate::protocol::OperationResult) and delivered
/// through the normal completion path.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection is not in the enabled state.
    #[error("connection is not enabled")]
    NotConnected,

    /// Requested payload does not fit in a maximum-size frame.
    #[error("payload size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// The host device could not provide a buffer.
    #[error("host device out of buffers")]
    NoMemory,

    /// Caller misuse (e.g. sending a response that was never allocated).
    #[error("invalid operation: {0}")]
    Invalid(&'static str),

    /// Opaque error code surfaced by the host-device transport on send.
    #[error("transport error {0}")]
    Transport(i32),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
