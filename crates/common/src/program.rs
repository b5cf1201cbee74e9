//! Program representation: one flat bytecode buffer.
//!
//! Binary files (.ngb) are raw bytecode with no header.

use crate::error::BytecodeError;
use crate::instruction::Instruction;

/// An ngvm program: the bytecode buffer the interpreter executes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    bytes: Vec<u8>,
}

impl Program {
    /// Wrap an existing byte buffer. No validation is performed.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encode a sequence of instructions.
    pub fn from_instructions(instructions: &[Instruction]) -> Result<Self, BytecodeError> {
        let mut bytes = Vec::new();
        for instr in instructions {
            instr.encode(&mut bytes)?;
        }
        Ok(Self { bytes })
    }

    /// Append raw bytecode, returning the number of bytes consumed.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        self.bytes.extend_from_slice(bytes);
        bytes.len()
    }

    /// The raw bytecode.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the program, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Number of bytes in the program.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the program has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the instruction at `at`, returning it with the next offset.
    pub fn decode_at(&self, at: usize) -> Result<(Instruction, usize), BytecodeError> {
        Instruction::decode(&self.bytes, at)
    }

    /// Decode the whole buffer front to back.
    ///
    /// Returns `(offset, instruction)` pairs, or the first decode error.
    pub fn decode_all(&self) -> Result<Vec<(usize, Instruction)>, BytecodeError> {
        let mut out = Vec::new();
        let mut at = 0;
        while at < self.bytes.len() {
            let (instr, next) = self.decode_at(at)?;
            out.push((at, instr));
            at = next;
        }
        Ok(out)
    }

    /// Read the little-endian u16 at `at`.
    pub fn read_u16(&self, at: usize) -> Option<u16> {
        let raw = self.bytes.get(at..at.checked_add(2)?)?;
        Some(u16::from_le_bytes([raw[0], raw[1]]))
    }

    /// Overwrite the little-endian u16 at `at`.
    pub fn write_u16(&mut self, at: usize, value: u16) -> Result<(), BytecodeError> {
        let len = self.bytes.len();
        let end = at
            .checked_add(2)
            .ok_or(BytecodeError::OutOfBounds { at, len })?;
        let slot = self
            .bytes
            .get_mut(at..end)
            .ok_or(BytecodeError::OutOfBounds { at, len })?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// The byte at `at`, if any.
    pub fn byte(&self, at: usize) -> Option<u8> {
        self.bytes.get(at).copied()
    }
}
