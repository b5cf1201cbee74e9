//! Linking pass.
//!
//! PATCH may only rewrite the 16-bit operand of FETCH_GLOBAL, STORE_GLOBAL,
//! GLOBAL_DEF_P or DEF_GLOBAL_FUNC, and only before INIT_DONE in stream
//! order.

use crate::error::VerifyError;
use crate::structural::ProgramContext;
use ngvm_common::Instruction;

/// Run the linking check.
pub fn check_linking(ctx: &ProgramContext) -> Vec<VerifyError> {
    let mut errors = Vec::new();
    let mut init_done: Option<usize> = None;

    for (at, instr) in &ctx.instrs {
        match instr {
            Instruction::InitDone => {
                init_done.get_or_insert(*at);
            }
            Instruction::Patch(target) => {
                if let Some(init_done) = init_done {
                    errors.push(VerifyError::PatchAfterInitDone { at: *at, init_done });
                }
                if !is_global_operand(ctx, *target) {
                    errors.push(VerifyError::InvalidPatchTarget {
                        at: *at,
                        target: *target,
                    });
                }
            }
            _ => {}
        }
    }

    errors
}

/// True if `operand` is the operand address of a global-index instruction.
fn is_global_operand(ctx: &ProgramContext, operand: u16) -> bool {
    (operand as usize)
        .checked_sub(1)
        .and_then(|site| ctx.instruction_at(site))
        .is_some_and(|instr| instr.opcode().takes_global_index())
}
