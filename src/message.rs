//! Message buffers.
//!
//! A [`Message`] owns one contiguous frame — header plus payload — whose
//! memory comes from the owning connection's host device and goes back to
//! it exactly once, on drop. While the frame is in flight the message
//! holds the transport's send cookie so the frame can be recalled.

use std::sync::Arc;

use bytes::BytesMut;

use crate::error::{Error, Result};
use crate::hostdev::{HostDevice, SendCookie};
use crate::protocol::{op_type, result_code, Header, HEADER_SIZE, MESSAGE_SIZE_MAX};

/// One frame of memory, allocated through the host device.
pub struct Message {
    hd: Arc<dyn HostDevice>,
    /// Frame memory; `None` only transiently during drop.
    buffer: Option<BytesMut>,
    /// Total frame size, header included.
    size: usize,
    /// Transport cookie while in flight.
    cookie: Option<SendCookie>,
}

impl Message {
    /// Allocate a frame big enough for `payload_size` payload bytes and
    /// fill in the header. The operation id is left zero; it is assigned
    /// at submit time. Responses get the response bit set in their type.
    pub(crate) fn alloc(
        hd: Arc<dyn HostDevice>,
        op_type_raw: u8,
        payload_size: usize,
        is_request: bool,
        may_block: bool,
    ) -> Result<Self> {
        let max = MESSAGE_SIZE_MAX - HEADER_SIZE;
        if payload_size > max {
            return Err(Error::TooLarge {
                size: payload_size,
                max,
            });
        }
        let size = HEADER_SIZE + payload_size;

        let mut buffer = hd.buffer_alloc(size, may_block).ok_or(Error::NoMemory)?;
        debug_assert!(buffer.len() >= size);

        let raw_type = if is_request {
            op_type_raw
        } else {
            op_type_raw | op_type::RESPONSE
        };
        let header = Header::new(size as u16, 0, raw_type, result_code::SUCCESS);
        header.encode_into(&mut buffer[..HEADER_SIZE]);

        Ok(Self {
            hd,
            buffer: Some(buffer),
            size,
            cookie: None,
        })
    }

    /// Total frame size in bytes, header included.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Decode the current header from the frame.
    pub fn header(&self) -> Header {
        Header::decode(self.frame()).unwrap_or(Header::new(0, 0, 0, 0))
    }

    /// Payload bytes, immediately after the header.
    pub fn payload(&self) -> &[u8] {
        &self.frame()[HEADER_SIZE..]
    }

    /// Mutable payload bytes.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let size = self.size;
        &mut self.buf_mut()[HEADER_SIZE..size]
    }

    /// The whole frame, header included.
    pub(crate) fn frame(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => &buffer[..self.size],
            None => &[],
        }
    }

    fn buf_mut(&mut self) -> &mut BytesMut {
        // The buffer is only absent mid-drop; no caller can observe that.
        self.buffer.as_mut().expect("message buffer already released")
    }

    /// Write the assigned correlation id into the frame header.
    pub(crate) fn set_operation_id(&mut self, id: u16) {
        self.buf_mut()[2..4].copy_from_slice(&id.to_le_bytes());
    }

    /// Write the result byte into the frame header.
    pub(crate) fn set_result(&mut self, result: u8) {
        self.buf_mut()[5] = result;
    }

    /// Overwrite the start of the frame with an incoming frame's bytes.
    pub(crate) fn copy_from(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= self.size);
        self.buf_mut()[..data.len()].copy_from_slice(data);
    }

    /// Hand the frame to the transport, keeping the returned cookie.
    ///
    /// On failure the cookie stays empty and the error is surfaced to the
    /// caller unchanged.
    pub(crate) fn send(&mut self, cport_id: u16, may_block: bool) -> Result<()> {
        let cookie = self.hd.buffer_send(cport_id, self.frame(), may_block)?;
        self.cookie = Some(cookie);
        Ok(())
    }

    /// Recall an in-flight frame. No-op when the frame is not in flight;
    /// the cookie is consumed, so repeated cancels stay no-ops.
    pub(crate) fn cancel(&mut self) {
        if let Some(cookie) = self.cookie.take() {
            self.hd.buffer_cancel(cookie);
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> bool {
        self.cookie.is_some()
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.hd.buffer_free(buffer);
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("size", &self.size)
            .field("header", &self.header())
            .field("in_flight", &self.cookie.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHostDevice;

    fn mock() -> Arc<MockHostDevice> {
        Arc::new(MockHostDevice::new())
    }

    #[test]
    fn alloc_fills_request_header() {
        let hd = mock();
        let message = Message::alloc(hd.clone(), 0x01, 2, true, true).unwrap();

        let header = message.header();
        assert_eq!(header.size, (HEADER_SIZE + 2) as u16);
        assert_eq!(header.operation_id, 0);
        assert_eq!(header.op_type, 0x01);
        assert_eq!(header.result, 0);
        assert_eq!(message.payload().len(), 2);
    }

    #[test]
    fn alloc_sets_response_bit() {
        let hd = mock();
        let message = Message::alloc(hd, 0x01, 4, false, true).unwrap();
        assert_eq!(message.header().op_type, 0x81);
        assert!(message.header().is_response());
    }

    #[test]
    fn alloc_rejects_oversized_payload() {
        let hd = mock();
        let result = Message::alloc(hd, 0x01, MESSAGE_SIZE_MAX, true, true);
        assert!(matches!(result, Err(Error::TooLarge { .. })));
    }

    #[test]
    fn alloc_max_payload_fits() {
        let hd = mock();
        let message =
            Message::alloc(hd, 0x01, MESSAGE_SIZE_MAX - HEADER_SIZE, true, true).unwrap();
        assert_eq!(message.size(), MESSAGE_SIZE_MAX);
    }

    #[test]
    fn alloc_failure_reports_no_memory() {
        let hd = mock();
        hd.deny_allocs(true);
        let result = Message::alloc(hd, 0x01, 2, true, true);
        assert!(matches!(result, Err(Error::NoMemory)));
    }

    #[test]
    fn buffer_freed_exactly_once_on_drop() {
        let hd = mock();
        {
            let _message = Message::alloc(hd.clone(), 0x01, 2, true, true).unwrap();
            assert_eq!(hd.alloc_count(), 1);
            assert_eq!(hd.free_count(), 0);
        }
        assert_eq!(hd.free_count(), 1);
    }

    #[test]
    fn send_stores_cookie_and_cancel_consumes_it() {
        let hd = mock();
        let mut message = Message::alloc(hd.clone(), 0x01, 2, true, true).unwrap();

        message.send(5, true).unwrap();
        assert!(message.in_flight());
        assert_eq!(hd.sent_frames().len(), 1);

        message.cancel();
        assert!(!message.in_flight());
        assert_eq!(hd.cancel_count(), 1);

        // Cancel without a cookie is a no-op
        message.cancel();
        assert_eq!(hd.cancel_count(), 1);
    }

    #[test]
    fn send_failure_leaves_cookie_empty() {
        let hd = mock();
        hd.fail_sends(true);
        let mut message = Message::alloc(hd.clone(), 0x01, 2, true, true).unwrap();

        let result = message.send(5, true);
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!message.in_flight());

        message.cancel();
        assert_eq!(hd.cancel_count(), 0);
    }

    #[test]
    fn set_operation_id_rewrites_header() {
        let hd = mock();
        let mut message = Message::alloc(hd, 0x01, 0, true, true).unwrap();
        message.set_operation_id(0x4242);
        assert_eq!(message.header().operation_id, 0x4242);
    }
}
