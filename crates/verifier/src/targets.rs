//! Control-flow target pass.
//!
//! Every jump, TRY_START handler and MAKE_CLOSURE entry must land on the
//! first byte of an instruction inside the program.

use ngvm_common::relative_target;

use crate::error::VerifyError;
use crate::structural::ProgramContext;

/// Run the target check.
pub fn check_targets(ctx: &ProgramContext) -> Vec<VerifyError> {
    let mut errors = Vec::new();

    for (at, instr) in &ctx.instrs {
        let Some(offset) = instr.relative_offset() else {
            continue;
        };
        let next = ProgramContext::next_offset(*at, instr);
        match relative_target(next, offset).filter(|&t| t < ctx.len) {
            None => errors.push(VerifyError::TargetOutOfRange { at: *at, offset }),
            Some(target) if ctx.instruction_at(target).is_none() => {
                errors.push(VerifyError::TargetNotOnBoundary { at: *at, target });
            }
            Some(_) => {}
        }
    }

    errors
}
