//! Shared unit-test fixtures.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::BytesMut;

use crate::error::{Error, Result};
use crate::hostdev::{HostDevice, SendCookie};

/// Recording host device: counts allocations, frees and cancels, and keeps
/// every frame handed to `buffer_send`.
pub(crate) struct MockHostDevice {
    allocs: AtomicUsize,
    frees: AtomicUsize,
    cancels: AtomicUsize,
    next_cookie: AtomicU64,
    sent: Mutex<Vec<Vec<u8>>>,
    deny_allocs: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockHostDevice {
    pub(crate) fn new() -> Self {
        Self {
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            next_cookie: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
            deny_allocs: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub(crate) fn alloc_count(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    pub(crate) fn free_count(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn sent_frames(&self) -> Vec<Vec<u8>> {
        crate::lock(&self.sent).clone()
    }

    pub(crate) fn deny_allocs(&self, deny: bool) {
        self.deny_allocs.store(deny, Ordering::SeqCst);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

impl HostDevice for MockHostDevice {
    fn buffer_alloc(&self, size: usize, _may_block: bool) -> Option<BytesMut> {
        if self.deny_allocs.load(Ordering::SeqCst) {
            return None;
        }
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Some(BytesMut::zeroed(size))
    }

    fn buffer_free(&self, _buffer: BytesMut) {
        self.frees.fetch_add(1, Ordering::SeqCst);
    }

    fn buffer_send(&self, _cport_id: u16, frame: &[u8], _may_block: bool) -> Result<SendCookie> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Transport(-5));
        }
        crate::lock(&self.sent).push(frame.to_vec());
        Ok(SendCookie(self.next_cookie.fetch_add(1, Ordering::SeqCst)))
    }

    fn buffer_cancel(&self, _cookie: SendCookie) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
