//! Limits checking for ngvm programs.
//!
//! Flags instructions that can never succeed at run time.

use crate::error::VerifyError;
use crate::structural::ProgramContext;
use ngvm_common::Instruction;

/// Value stack capacity of an execution context.
pub const MAX_STACK: usize = 1024;

/// Run the limits check.
pub fn check_limits(ctx: &ProgramContext) -> Vec<VerifyError> {
    let mut errors = Vec::new();

    for (at, instr) in &ctx.instrs {
        let at = *at;
        let count = match instr {
            Instruction::MakeClosure { params, locals, .. } => {
                if locals < params {
                    errors.push(VerifyError::InvalidClosure {
                        at,
                        params: *params,
                        locals: *locals,
                    });
                }
                *params as usize
            }
            Instruction::MakeArr(n) | Instruction::MakeStr(n) => *n as usize,
            Instruction::MakeHash(n) => *n as usize * 2,
            _ => continue,
        };
        if count > MAX_STACK {
            errors.push(VerifyError::CountExceedsStack {
                at,
                count,
                max: MAX_STACK,
            });
        }
    }

    errors
}
