//! Structural pass for ngvm programs.
//!
//! Decodes the whole stream front to back and builds the ProgramContext
//! used by later passes.

use ngvm_common::{Instruction, Program};

use crate::error::VerifyError;

/// Context built from the structural pass, consumed by later passes.
#[derive(Debug, Clone, Default)]
pub struct ProgramContext {
    /// Decoded instructions with their offsets, in stream order.
    pub instrs: Vec<(usize, Instruction)>,
    /// Program length in bytes.
    pub len: usize,
    /// The stream did not decode; callers should skip later passes.
    pub fatal: bool,
}

impl ProgramContext {
    /// The instruction starting exactly at `offset`.
    pub fn instruction_at(&self, offset: usize) -> Option<&Instruction> {
        self.instrs
            .binary_search_by_key(&offset, |(at, _)| *at)
            .ok()
            .map(|i| &self.instrs[i].1)
    }

    /// Offset of the instruction after the one at `at`.
    pub fn next_offset(at: usize, instr: &Instruction) -> usize {
        at + instr.encoded_len()
    }
}

/// Run the structural pass.
///
/// Returns the ProgramContext and any errors found.
pub fn check_structural(program: &Program) -> (ProgramContext, Vec<VerifyError>) {
    let mut errors = Vec::new();
    let mut ctx = ProgramContext {
        len: program.len(),
        ..ProgramContext::default()
    };

    match program.decode_all() {
        Ok(instrs) => ctx.instrs = instrs,
        Err(e) => {
            errors.push(VerifyError::Decode(e));
            ctx.fatal = true;
            return (ctx, errors);
        }
    }

    if !ctx.instrs.iter().any(|(_, i)| *i == Instruction::Halt) {
        errors.push(VerifyError::MissingHalt);
    }

    (ctx, errors)
}
