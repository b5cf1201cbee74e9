//! Verification errors for the ngvm verifier.
//!
//! Every error tied to an instruction carries its byte offset (`at`).
//! The verifier collects ALL errors, not just the first.

use ngvm_common::BytecodeError;
use thiserror::Error;

/// Errors found during static verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    // --- Structural ---
    /// The stream could not be decoded; later passes are skipped.
    #[error("undecodable stream: {0}")]
    Decode(#[from] BytecodeError),

    /// No HALT anywhere in the stream.
    #[error("program contains no HALT")]
    MissingHalt,

    // --- Targets ---
    /// A jump, handler or closure entry lands outside the program.
    #[error("target of offset {offset} at {at} is outside the program")]
    TargetOutOfRange { at: usize, offset: i16 },

    /// A jump, handler or closure entry lands inside another instruction.
    #[error("target {target} of instruction at {at} is not an instruction boundary")]
    TargetNotOnBoundary { at: usize, target: usize },

    // --- Linking ---
    /// PATCH does not point at the operand of a global-index instruction.
    #[error("PATCH at {at} targets {target}, which is not a global-index operand")]
    InvalidPatchTarget { at: usize, target: u16 },

    /// PATCH appears after INIT_DONE in stream order.
    #[error("PATCH at {at} follows INIT_DONE at {init_done}")]
    PatchAfterInitDone { at: usize, init_done: usize },

    // --- Limits ---
    /// MAKE_CLOSURE with fewer locals than parameters.
    #[error("closure at {at} has {params} params but only {locals} locals")]
    InvalidClosure { at: usize, params: u8, locals: u8 },

    /// An instruction consumes more values than the stack can ever hold.
    #[error("instruction at {at} pops {count} values (stack holds {max})")]
    CountExceedsStack { at: usize, count: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_display() {
        let errors: Vec<VerifyError> = vec![
            VerifyError::Decode(BytecodeError::InvalidOpcode { at: 0, byte: 0xFF }),
            VerifyError::MissingHalt,
            VerifyError::TargetOutOfRange { at: 0, offset: 9 },
            VerifyError::TargetNotOnBoundary { at: 0, target: 4 },
            VerifyError::InvalidPatchTarget { at: 3, target: 1 },
            VerifyError::PatchAfterInitDone {
                at: 5,
                init_done: 1,
            },
            VerifyError::InvalidClosure {
                at: 0,
                params: 2,
                locals: 1,
            },
            VerifyError::CountExceedsStack {
                at: 0,
                count: 2000,
                max: 1024,
            },
        ];

        for error in &errors {
            let display = error.to_string();
            assert!(!display.is_empty(), "empty display for {error:?}");
        }
    }

    #[test]
    fn decode_error_is_wrapped() {
        let e = VerifyError::from(BytecodeError::InvalidOpcode { at: 2, byte: 0xF0 });
        assert_eq!(
            e.to_string(),
            "undecodable stream: invalid opcode 0xf0 at offset 2"
        );
    }
}
