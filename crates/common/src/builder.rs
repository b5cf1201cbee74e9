//! Incremental program construction with forward labels.
//!
//! Jumps, closure entries, handler entries and PATCH sites can refer to
//! labels that are bound later; offsets are filled in by [`ProgramBuilder::finish`].
//!
//! ```
//! use ngvm_common::{Instruction, Opcode, ProgramBuilder};
//!
//! let mut b = ProgramBuilder::new();
//! let done = b.label();
//! b.emit(Instruction::PushTrue);
//! b.jump(Opcode::JmpTrue, done);
//! b.emit(Instruction::PushInt(1));
//! b.bind(done);
//! b.emit(Instruction::PushInt(2)).emit(Instruction::Halt);
//! let program = b.finish().unwrap();
//! assert_eq!(program.as_bytes()[2..4], 9i16.to_le_bytes());
//! ```

use crate::error::BytecodeError;
use crate::instruction::Instruction;
use crate::opcode::Opcode;
use crate::program::Program;

/// A position in the program, possibly not yet known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum Fixup {
    /// i16 at buffer index `at`, relative to absolute offset `next`.
    Relative { at: usize, next: usize, label: Label },
    /// u16 at buffer index `at`: absolute operand address of the
    /// instruction at `label`.
    PatchSite { at: usize, label: Label },
}

/// Builds a [`Program`] one instruction at a time.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    /// Absolute offset of the first byte, for units loaded after others.
    origin: usize,
    bytes: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    error: Option<BytecodeError>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder for a unit that will be appended at `origin`. Labels and
    /// PATCH operands are absolute; the returned program is not.
    pub fn with_origin(origin: usize) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }

    /// Current absolute offset: where the next instruction will start.
    pub fn offset(&self) -> usize {
        self.origin + self.bytes.len()
    }

    /// Create an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.offset());
        self
    }

    /// Create a label bound to the current offset.
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.bind(label);
        label
    }

    /// Append an instruction with literal operands.
    pub fn emit(&mut self, instr: Instruction) -> &mut Self {
        if let Err(e) = instr.encode(&mut self.bytes) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Append JMP, JMP_TRUE, JMP_FALSE or TRY_START targeting `target`.
    ///
    /// # Panics
    ///
    /// If `opcode` is not one of those four.
    pub fn jump(&mut self, opcode: Opcode, target: Label) -> &mut Self {
        let instr = match opcode {
            Opcode::Jmp => Instruction::Jmp(0),
            Opcode::JmpTrue => Instruction::JmpTrue(0),
            Opcode::JmpFalse => Instruction::JmpFalse(0),
            Opcode::TryStart => Instruction::TryStart(0),
            other => panic!("{} does not take a relative target", other.mnemonic()),
        };
        let at = self.bytes.len() + 1;
        self.emit(instr);
        self.fixups.push(Fixup::Relative {
            at,
            next: self.offset(),
            label: target,
        });
        self
    }

    /// Append MAKE_CLOSURE whose entry point is `entry`.
    pub fn closure(&mut self, entry: Label, params: u8, locals: u8) -> &mut Self {
        let at = self.bytes.len() + 1;
        self.emit(Instruction::MakeClosure {
            offset: 0,
            params,
            locals,
        });
        self.fixups.push(Fixup::Relative {
            at,
            next: self.offset(),
            label: entry,
        });
        self
    }

    /// Append PATCH targeting the operand of the instruction at `site`.
    pub fn patch(&mut self, site: Label) -> &mut Self {
        let at = self.bytes.len() + 1;
        self.emit(Instruction::Patch(0));
        self.fixups.push(Fixup::PatchSite { at, label: site });
        self
    }

    /// Append the linking sequence for one global reference:
    /// `PUSH_L_STR name; RESOLVE_GLOBAL; PATCH site`.
    pub fn link(&mut self, name: &str, site: Label) -> &mut Self {
        self.emit(Instruction::PushLStr(name.to_owned()))
            .emit(Instruction::ResolveGlobal)
            .patch(site)
    }

    /// Resolve every label reference and return the finished program.
    pub fn finish(mut self) -> Result<Program, BytecodeError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        for fixup in std::mem::take(&mut self.fixups) {
            match fixup {
                Fixup::Relative { at, next, label } => {
                    let target = self.resolve(label)?;
                    let delta = target as i64 - next as i64;
                    let offset = i16::try_from(delta)
                        .map_err(|_| BytecodeError::OffsetOutOfRange { from: next, target })?;
                    self.bytes[at..at + 2].copy_from_slice(&offset.to_le_bytes());
                }
                Fixup::PatchSite { at, label } => {
                    let site = self.resolve(label)?;
                    let operand = u16::try_from(site + 1).map_err(|_| {
                        BytecodeError::OffsetOutOfRange {
                            from: self.origin + at,
                            target: site + 1,
                        }
                    })?;
                    self.bytes[at..at + 2].copy_from_slice(&operand.to_le_bytes());
                }
            }
        }
        Ok(Program::new(self.bytes))
    }

    fn resolve(&self, label: Label) -> Result<usize, BytecodeError> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or(BytecodeError::UnboundLabel { label: label.0 })
    }
}
