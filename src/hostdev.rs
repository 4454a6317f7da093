//! Host-device transport interface.
//!
//! The core never touches the wire itself. Frame memory is allocated and
//! freed through a [`HostDevice`], and frames are handed to it for
//! transmission. The transport is asynchronous: a successful send returns
//! an opaque [`SendCookie`] that stays valid until the transport completes
//! the send on its own schedule, and that cookie is the only way to recall
//! an in-flight buffer.

use bytes::BytesMut;

use crate::error::Result;

/// Opaque handle identifying one in-flight send.
///
/// Minted by the transport on a successful [`HostDevice::buffer_send`];
/// valid until the transport completes or cancels that send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendCookie(pub u64);

/// Interface to the physical host-device driver.
///
/// `may_block` distinguishes caller context: thread contexts may block for
/// memory, the receive dispatcher may not. Implementations must honor it
/// on both [`buffer_alloc`](Self::buffer_alloc) and
/// [`buffer_send`](Self::buffer_send).
pub trait HostDevice: Send + Sync {
    /// Allocate a frame buffer of exactly `size` bytes (zero-filled,
    /// `len() == size`). Returns `None` when no buffer is available.
    fn buffer_alloc(&self, size: usize, may_block: bool) -> Option<BytesMut>;

    /// Return a buffer obtained from [`buffer_alloc`](Self::buffer_alloc).
    fn buffer_free(&self, buffer: BytesMut);

    /// Hand a complete frame to the transport for the given remote cport.
    ///
    /// On success the returned cookie identifies the in-flight buffer; on
    /// failure the buffer never left the caller's ownership.
    fn buffer_send(&self, cport_id: u16, frame: &[u8], may_block: bool) -> Result<SendCookie>;

    /// Recall an in-flight buffer identified by its cookie.
    fn buffer_cancel(&self, cookie: SendCookie);
}
