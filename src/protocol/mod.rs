//! Wire-level protocol definitions.
//!
//! The 8-byte message header, the response bit of the type byte, and the
//! result codes shared between the wire and local operation results.

mod wire_format;

pub use wire_format::{
    op_type, result_code, Header, OperationResult, HEADER_SIZE, MESSAGE_SIZE_MAX,
};
