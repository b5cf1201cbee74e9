//! Fatal runtime errors for the ngvm interpreter.
//!
//! These abort the run of the offending context. Raised exceptions and
//! failed overloads are not errors at this level: they travel as values
//! (see [`crate::Outcome`] and [`crate::MethodResult`]). Every variant
//! carries the byte offset (`at`) of the faulting instruction.

use ngvm_common::BytecodeError;
use thiserror::Error;

/// Errors that abort a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// A push would exceed the value stack capacity.
    #[error("stack overflow at offset {at}")]
    StackOverflow { at: usize },

    /// Pop on an empty stack, or fewer values than the instruction needs.
    #[error("stack underflow at offset {at}")]
    StackUnderflow { at: usize },

    /// A call would exceed the frame stack capacity.
    #[error("frame overflow at offset {at}")]
    FrameOverflow { at: usize },

    /// TRY_START would exceed the handler stack capacity.
    #[error("handler overflow at offset {at}")]
    HandlerOverflow { at: usize },

    /// A global was read before anything was stored in it.
    #[error("global {name} is undefined at offset {at}")]
    GlobalUndefined { at: usize, name: String },

    /// A local slot was read before anything was stored in it.
    #[error("local {slot} is undefined at offset {at}")]
    LocalUndefined { at: usize, slot: u8 },

    /// A captured variable was read before anything was stored in it.
    #[error("upvar {depth}:{slot} is undefined at offset {at}")]
    UpvarUndefined { at: usize, depth: u8, slot: u8 },

    /// The scope chain has no such depth or slot.
    #[error("upvar {depth}:{slot} out of range at offset {at}")]
    UpvarOutOfRange { at: usize, depth: u8, slot: u8 },

    /// Local slot index past the frame's locals.
    #[error("local {slot} out of range at offset {at}")]
    LocalOutOfRange { at: usize, slot: u8 },

    /// A frame-relative instruction ran with no frame.
    #[error("no active frame at offset {at}")]
    NoActiveFrame { at: usize },

    /// Byte does not name any opcode.
    #[error("invalid opcode {byte:#04x} at offset {at}")]
    InvalidOpcode { at: usize, byte: u8 },

    /// The program ends inside an instruction's operands.
    #[error("truncated operand for {opcode} at offset {at}")]
    TruncatedOperand { at: usize, opcode: &'static str },

    /// String literal is not valid UTF-8.
    #[error("invalid string literal at offset {at}")]
    InvalidString { at: usize },

    /// Instruction pointer left the program.
    #[error("instruction pointer {at} is outside the program")]
    IpOutOfRange { at: usize },

    /// Relative target lands outside the program.
    #[error("relative target {offset} out of range at offset {at}")]
    JumpOutOfRange { at: usize, offset: i16 },

    /// PATCH target is not a global-index operand, or the index does not fit.
    ///
    /// The interpreter only checks the opcode byte in front of the target,
    /// not that it starts an instruction: a target inside an immediate whose
    /// previous byte happens to match is rewritten. `ngvm_verifier` rejects
    /// such streams.
    #[error("invalid patch of offset {target} at offset {at}")]
    InvalidPatch { at: usize, target: u16 },

    /// PATCH executed outside the linking phase.
    #[error("PATCH after linking at offset {at}")]
    PatchAfterLink { at: usize },

    /// MAKE_CLOSURE with fewer locals than parameters.
    #[error("closure with {params} params but {locals} locals at offset {at}")]
    InvalidClosure { at: usize, params: u8, locals: u8 },

    /// Operand of the wrong type for the instruction itself.
    #[error("expected {expected}, found {found} at offset {at}")]
    TypeMismatch {
        at: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// TRY_END without a matching TRY_START in the current frame.
    #[error("TRY_END without handler at offset {at}")]
    UnbalancedTry { at: usize },

    /// HALT executed with no values on the stack.
    #[error("HALT with empty stack at offset {at}")]
    HaltWithEmptyStack { at: usize },

    /// HALT reached inside a call made on behalf of a native.
    #[error("HALT inside a nested call at offset {at}")]
    UnexpectedHalt { at: usize },
}

impl VmError {
    /// Map a decode failure of the instruction at `ip`.
    pub(crate) fn from_decode(err: BytecodeError, ip: usize) -> Self {
        match err {
            BytecodeError::InvalidOpcode { at, byte } => VmError::InvalidOpcode { at, byte },
            BytecodeError::TruncatedOperand { at, opcode } => {
                VmError::TruncatedOperand { at, opcode }
            }
            BytecodeError::InvalidString { at } => VmError::InvalidString { at },
            _ => VmError::IpOutOfRange { at: ip },
        }
    }
}
