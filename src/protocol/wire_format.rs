//! Wire format encoding and decoding.
//!
//! Every message, request or response, begins with an 8-byte header:
//! ```text
//! ┌──────────┬───────────────┬────────┬────────┬───────────┐
//! │ Size     │ Operation ID  │ Type   │ Result │ Reserved  │
//! │ 2 bytes  │ 2 bytes       │ 1 byte │ 1 byte │ 2 bytes   │
//! │ u16 LE   │ u16 LE        │        │        │ zero      │
//! └──────────┴───────────────┴────────┴────────┴───────────┘
//! ```
//!
//! All multi-byte integers are little endian. `size` counts header and
//! payload together. The operation id correlates a response with its
//! request and is unique among the pending operations of one connection;
//! zero means "not yet assigned". The top bit of the type byte
//! distinguishes responses (set) from requests (clear). The result byte is
//! meaningful in responses only and must be zero in requests. Payload
//! begins immediately after the header.

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Maximum total frame size (header + payload).
pub const MESSAGE_SIZE_MAX: usize = 4096;

/// Helpers for the type byte of the header.
pub mod op_type {
    /// Top bit of the type byte: set in responses, clear in requests.
    pub const RESPONSE: u8 = 0x80;

    /// Check whether a raw type byte names a response.
    #[inline]
    pub fn is_response(raw: u8) -> bool {
        raw & RESPONSE != 0
    }
}

/// Wire values of the result byte.
pub mod result_code {
    /// The operation completed successfully.
    pub const SUCCESS: u8 = 0x00;
    /// The submitter's wait was interrupted.
    pub const INTERRUPTED: u8 = 0x01;
    /// No response arrived within the operation timeout.
    pub const TIMEOUT: u8 = 0x02;
    /// A buffer could not be allocated.
    pub const NO_MEMORY: u8 = 0x03;
    /// No handler is registered for the request type.
    pub const PROTOCOL_BAD: u8 = 0x04;
    /// The response did not fit in the submitter's response buffer.
    pub const OVERFLOW: u8 = 0x05;
    /// The request was malformed or not understood.
    pub const INVALID: u8 = 0x06;
}

/// Outcome of a completed operation, mirroring the wire result byte.
///
/// Codes the core itself produces get a variant; every other non-zero
/// value is protocol-defined and passes through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Success,
    Interrupted,
    Timeout,
    NoMemory,
    ProtocolBad,
    Overflow,
    Invalid,
    /// Protocol-defined error code, passed through unmodified.
    Protocol(u8),
}

impl OperationResult {
    /// Decode a wire result byte.
    pub fn from_wire(raw: u8) -> Self {
        match raw {
            result_code::SUCCESS => Self::Success,
            result_code::INTERRUPTED => Self::Interrupted,
            result_code::TIMEOUT => Self::Timeout,
            result_code::NO_MEMORY => Self::NoMemory,
            result_code::PROTOCOL_BAD => Self::ProtocolBad,
            result_code::OVERFLOW => Self::Overflow,
            result_code::INVALID => Self::Invalid,
            other => Self::Protocol(other),
        }
    }

    /// Encode to the wire result byte.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Success => result_code::SUCCESS,
            Self::Interrupted => result_code::INTERRUPTED,
            Self::Timeout => result_code::TIMEOUT,
            Self::NoMemory => result_code::NO_MEMORY,
            Self::ProtocolBad => result_code::PROTOCOL_BAD,
            Self::Overflow => result_code::OVERFLOW,
            Self::Invalid => result_code::INVALID,
            Self::Protocol(raw) => raw,
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total frame size in bytes, header included.
    pub size: u16,
    /// Correlation id (0 = not yet assigned).
    pub operation_id: u16,
    /// Protocol-defined opcode; top bit set in responses.
    pub op_type: u8,
    /// Result of the request (responses only, zero in requests).
    pub result: u8,
}

impl Header {
    /// Create a new header.
    pub fn new(size: u16, operation_id: u16, op_type: u8, result: u8) -> Self {
        Self {
            size,
            operation_id,
            op_type,
            result,
        }
    }

    /// Encode header to bytes (little endian, reserved bytes zero).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.size.to_le_bytes());
        buf[2..4].copy_from_slice(&self.operation_id.to_le_bytes());
        buf[4] = self.op_type;
        buf[5] = self.result;
        buf[6] = 0;
        buf[7] = 0;
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if the buffer is too short. The two reserved bytes
    /// are ignored on receive.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: u16::from_le_bytes([buf[0], buf[1]]),
            operation_id: u16::from_le_bytes([buf[2], buf[3]]),
            op_type: buf[4],
            result: buf[5],
        })
    }

    /// Check if this header names a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        op_type::is_response(self.op_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encode_decode_roundtrip() {
        let original = Header::new(0x000C, 1, 0x81, 0x00);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn header_little_endian_byte_order() {
        let header = Header::new(0x0102, 0x0304, 0x05, 0x06);
        let bytes = header.encode();

        // Size: 0x0102 in LE
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[1], 0x01);

        // Operation id: 0x0304 in LE
        assert_eq!(bytes[2], 0x04);
        assert_eq!(bytes[3], 0x03);

        assert_eq!(bytes[4], 0x05);
        assert_eq!(bytes[5], 0x06);

        // Reserved bytes are zero on send
        assert_eq!(bytes[6], 0x00);
        assert_eq!(bytes[7], 0x00);
    }

    #[test]
    fn header_size_is_exactly_8() {
        assert_eq!(HEADER_SIZE, 8);
        let header = Header::new(8, 0, 0x01, 0);
        assert_eq!(header.encode().len(), 8);
    }

    #[test]
    fn decode_too_short_buffer() {
        let buf = [0u8; 7];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn decode_ignores_reserved_bytes() {
        let mut bytes = Header::new(8, 7, 0x02, 0).encode();
        bytes[6] = 0xDE;
        bytes[7] = 0xAD;
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, Header::new(8, 7, 0x02, 0));
    }

    #[test]
    fn response_bit_classification() {
        assert!(Header::new(8, 1, 0x81, 0).is_response());
        assert!(!Header::new(8, 1, 0x01, 0).is_response());
        assert!(op_type::is_response(0x80));
        assert!(!op_type::is_response(0x7F));
    }

    #[test]
    fn result_codes_roundtrip() {
        for raw in 0u8..=255 {
            assert_eq!(OperationResult::from_wire(raw).to_wire(), raw);
        }
    }

    #[test]
    fn result_code_values() {
        assert_eq!(OperationResult::Success.to_wire(), 0x00);
        assert_eq!(OperationResult::Timeout.to_wire(), 0x02);
        assert_eq!(OperationResult::ProtocolBad.to_wire(), 0x04);
        assert_eq!(OperationResult::Overflow.to_wire(), 0x05);
        assert_eq!(
            OperationResult::from_wire(0x42),
            OperationResult::Protocol(0x42)
        );
        assert!(OperationResult::Success.is_success());
        assert!(!OperationResult::Timeout.is_success());
    }
}
