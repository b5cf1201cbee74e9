//! Errors for encoding and decoding ngvm bytecode streams.

use thiserror::Error;

/// Errors that occur while decoding or building a bytecode stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    /// Byte does not name any opcode.
    #[error("invalid opcode {byte:#04x} at offset {at}")]
    InvalidOpcode { at: usize, byte: u8 },

    /// The stream ended in the middle of an instruction's operands.
    #[error("truncated operand for {opcode} at offset {at}")]
    TruncatedOperand { at: usize, opcode: &'static str },

    /// A string literal is not valid UTF-8.
    #[error("string literal at offset {at} is not valid UTF-8")]
    InvalidString { at: usize },

    /// Offset points outside the program.
    #[error("offset {at} is outside the program (length {len})")]
    OutOfBounds { at: usize, len: usize },

    /// String literal longer than the u8 length prefix allows.
    #[error("string literal of {len} bytes exceeds the 255-byte limit")]
    StringTooLong { len: usize },

    /// A label was referenced but never bound.
    #[error("label {label} referenced but never bound")]
    UnboundLabel { label: usize },

    /// A relative target does not fit in a signed 16-bit offset.
    #[error("target {target} is out of 16-bit range from offset {from}")]
    OffsetOutOfRange { from: usize, target: usize },
}
