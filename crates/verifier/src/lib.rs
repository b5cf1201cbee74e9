//! ngvm verifier: static structural checks for bytecode streams.
//!
//! The verifier checks a `Program` BEFORE it is loaded. It collects ALL
//! errors (not just the first) and returns them. Running unverified code is
//! still safe: the interpreter validates every operand itself. The
//! verifier only moves those failures ahead of execution.
//!
//! # Usage
//!
//! ```
//! use ngvm_common::{Instruction, Program};
//! use ngvm_verifier::verify;
//!
//! let program = Program::from_instructions(&[
//!     Instruction::InitDone,
//!     Instruction::PushInt(42),
//!     Instruction::Halt,
//! ])
//! .unwrap();
//!
//! assert!(verify(&program).is_ok());
//! ```
//!
//! # Passes
//!
//! 1. **Structural**: the stream decodes, a HALT exists
//! 2. **Targets**: jumps, handlers and closure entries land on instructions
//! 3. **Linking**: PATCH rewrites only global-index operands, before INIT_DONE
//! 4. **Limits**: closure locals, counts the stack can never supply

pub mod error;
pub mod limits;
pub mod linking;
pub mod structural;
pub mod targets;

pub use error::VerifyError;

use ngvm_common::Program;

/// Verify a program.
///
/// Returns `Ok(())` if the program passes all checks, or
/// `Err(Vec<VerifyError>)` with all errors found.
///
/// If the stream does not decode, the passes that need decoded
/// instructions are skipped.
pub fn verify(program: &Program) -> Result<(), Vec<VerifyError>> {
    let (ctx, mut all_errors) = structural::check_structural(program);

    if !ctx.fatal {
        all_errors.extend(targets::check_targets(&ctx));
        all_errors.extend(linking::check_linking(&ctx));
        all_errors.extend(limits::check_limits(&ctx));
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors)
    }
}
