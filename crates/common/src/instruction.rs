//! Decoded instructions and their byte encoding.
//!
//! An instruction is one opcode byte followed by a fixed operand layout.
//! Multi-byte operands are little-endian:
//! ```text
//! PUSH_INT      05 <i64>
//! PUSH_L_STR    06 <u8 len> <len bytes of UTF-8>
//! PATCH         0a <u16 absolute offset>
//! FETCH_GLOBAL  0c <u16 index>
//! FETCH_LOCAL   0e <u8 slot>
//! FETCH_UPVAR   1e <u8 depth> <u8 slot>
//! CALL          10 <u8 argument count>
//! JMP           12 <i16 offset from the next instruction>
//! MAKE_CLOSURE  16 <i16 entry offset> <u8 params> <u8 locals>
//! MAKE_ARR      15 <u16 count>
//! ```

use crate::error::BytecodeError;
use crate::opcode::Opcode;

/// Longest string literal PUSH_L_STR can carry.
pub const MAX_STR_LITERAL: usize = u8::MAX as usize;

/// A single decoded instruction with its operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Halt,
    PushNull,
    PushFalse,
    PushTrue,
    PushUndef,
    PushInt(i64),
    PushLStr(String),
    Dup,
    Pop,
    ResolveGlobal,
    /// Absolute offset of the 16-bit operand to rewrite.
    Patch(u16),
    InitDone,
    FetchGlobal(u16),
    StoreGlobal(u16),
    FetchLocal(u8),
    StoreLocal(u8),
    /// Argument count.
    Call(u8),
    Ret,
    Jmp(i16),
    JmpTrue(i16),
    JmpFalse(i16),
    MakeArr(u16),
    MakeClosure {
        /// Entry point, relative to the next instruction.
        offset: i16,
        params: u8,
        locals: u8,
    },
    ToStr,
    MakeStr(u16),
    PushEmptyStr,
    GlobalDefP(u16),
    LocalDefP(u8),
    DefGlobalFunc(u16),
    DefLocalFunc(u8),
    FetchUpvar { depth: u8, slot: u8 },
    StoreUpvar { depth: u8, slot: u8 },
    UpvarDefP { depth: u8, slot: u8 },
    DefUpvarFunc { depth: u8, slot: u8 },
    MakeHash(u16),
    ToBool,
    TryStart(i16),
    TryEnd,
    Throw,
}

/// Cursor over operand bytes of one instruction.
struct Operands<'a> {
    bytes: &'a [u8],
    pos: usize,
    at: usize,
    opcode: Opcode,
}

impl<'a> Operands<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], BytecodeError> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(BytecodeError::TruncatedOperand {
                at: self.at,
                opcode: self.opcode.mnemonic(),
            })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, BytecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, BytecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn i16(&mut self) -> Result<i16, BytecodeError> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    fn i64(&mut self) -> Result<i64, BytecodeError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    fn str(&mut self) -> Result<String, BytecodeError> {
        let len = self.u8()? as usize;
        let end = self.pos + len;
        let raw = self
            .bytes
            .get(self.pos..end)
            .ok_or(BytecodeError::TruncatedOperand {
                at: self.at,
                opcode: self.opcode.mnemonic(),
            })?;
        let s = std::str::from_utf8(raw).map_err(|_| BytecodeError::InvalidString { at: self.at })?;
        self.pos = end;
        Ok(s.to_owned())
    }
}

impl Instruction {
    /// Decode the instruction starting at `at`.
    ///
    /// Returns the instruction and the offset of the next one.
    pub fn decode(bytes: &[u8], at: usize) -> Result<(Self, usize), BytecodeError> {
        let byte = *bytes.get(at).ok_or(BytecodeError::OutOfBounds {
            at,
            len: bytes.len(),
        })?;
        let opcode = Opcode::decode(byte, at)?;
        let mut ops = Operands {
            bytes,
            pos: at + 1,
            at,
            opcode,
        };

        let instr = match opcode {
            Opcode::Halt => Instruction::Halt,
            Opcode::PushNull => Instruction::PushNull,
            Opcode::PushFalse => Instruction::PushFalse,
            Opcode::PushTrue => Instruction::PushTrue,
            Opcode::PushUndef => Instruction::PushUndef,
            Opcode::PushInt => Instruction::PushInt(ops.i64()?),
            Opcode::PushLStr => Instruction::PushLStr(ops.str()?),
            Opcode::Dup => Instruction::Dup,
            Opcode::Pop => Instruction::Pop,
            Opcode::ResolveGlobal => Instruction::ResolveGlobal,
            Opcode::Patch => Instruction::Patch(ops.u16()?),
            Opcode::InitDone => Instruction::InitDone,
            Opcode::FetchGlobal => Instruction::FetchGlobal(ops.u16()?),
            Opcode::StoreGlobal => Instruction::StoreGlobal(ops.u16()?),
            Opcode::FetchLocal => Instruction::FetchLocal(ops.u8()?),
            Opcode::StoreLocal => Instruction::StoreLocal(ops.u8()?),
            Opcode::Call => Instruction::Call(ops.u8()?),
            Opcode::Ret => Instruction::Ret,
            Opcode::Jmp => Instruction::Jmp(ops.i16()?),
            Opcode::JmpTrue => Instruction::JmpTrue(ops.i16()?),
            Opcode::JmpFalse => Instruction::JmpFalse(ops.i16()?),
            Opcode::MakeArr => Instruction::MakeArr(ops.u16()?),
            Opcode::MakeClosure => Instruction::MakeClosure {
                offset: ops.i16()?,
                params: ops.u8()?,
                locals: ops.u8()?,
            },
            Opcode::ToStr => Instruction::ToStr,
            Opcode::MakeStr => Instruction::MakeStr(ops.u16()?),
            Opcode::PushEmptyStr => Instruction::PushEmptyStr,
            Opcode::GlobalDefP => Instruction::GlobalDefP(ops.u16()?),
            Opcode::LocalDefP => Instruction::LocalDefP(ops.u8()?),
            Opcode::DefGlobalFunc => Instruction::DefGlobalFunc(ops.u16()?),
            Opcode::DefLocalFunc => Instruction::DefLocalFunc(ops.u8()?),
            Opcode::FetchUpvar => Instruction::FetchUpvar {
                depth: ops.u8()?,
                slot: ops.u8()?,
            },
            Opcode::StoreUpvar => Instruction::StoreUpvar {
                depth: ops.u8()?,
                slot: ops.u8()?,
            },
            Opcode::UpvarDefP => Instruction::UpvarDefP {
                depth: ops.u8()?,
                slot: ops.u8()?,
            },
            Opcode::DefUpvarFunc => Instruction::DefUpvarFunc {
                depth: ops.u8()?,
                slot: ops.u8()?,
            },
            Opcode::MakeHash => Instruction::MakeHash(ops.u16()?),
            Opcode::ToBool => Instruction::ToBool,
            Opcode::TryStart => Instruction::TryStart(ops.i16()?),
            Opcode::TryEnd => Instruction::TryEnd,
            Opcode::Throw => Instruction::Throw,
        };

        Ok((instr, ops.pos))
    }

    /// Append the encoding of this instruction to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), BytecodeError> {
        out.push(self.opcode() as u8);
        match self {
            Instruction::PushInt(v) => out.extend_from_slice(&v.to_le_bytes()),
            Instruction::PushLStr(s) => {
                if s.len() > MAX_STR_LITERAL {
                    out.pop();
                    return Err(BytecodeError::StringTooLong { len: s.len() });
                }
                out.push(s.len() as u8);
                out.extend_from_slice(s.as_bytes());
            }
            Instruction::Patch(v)
            | Instruction::FetchGlobal(v)
            | Instruction::StoreGlobal(v)
            | Instruction::GlobalDefP(v)
            | Instruction::DefGlobalFunc(v)
            | Instruction::MakeArr(v)
            | Instruction::MakeStr(v)
            | Instruction::MakeHash(v) => out.extend_from_slice(&v.to_le_bytes()),
            Instruction::FetchLocal(v)
            | Instruction::StoreLocal(v)
            | Instruction::LocalDefP(v)
            | Instruction::DefLocalFunc(v)
            | Instruction::Call(v) => out.push(*v),
            Instruction::Jmp(v)
            | Instruction::JmpTrue(v)
            | Instruction::JmpFalse(v)
            | Instruction::TryStart(v) => out.extend_from_slice(&v.to_le_bytes()),
            Instruction::MakeClosure {
                offset,
                params,
                locals,
            } => {
                out.extend_from_slice(&offset.to_le_bytes());
                out.push(*params);
                out.push(*locals);
            }
            Instruction::FetchUpvar { depth, slot }
            | Instruction::StoreUpvar { depth, slot }
            | Instruction::UpvarDefP { depth, slot }
            | Instruction::DefUpvarFunc { depth, slot } => {
                out.push(*depth);
                out.push(*slot);
            }
            _ => {}
        }
        Ok(())
    }

    /// Number of bytes this instruction occupies, opcode included.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Instruction::PushInt(_) => 8,
            Instruction::PushLStr(s) => 1 + s.len(),
            Instruction::Patch(_)
            | Instruction::FetchGlobal(_)
            | Instruction::StoreGlobal(_)
            | Instruction::GlobalDefP(_)
            | Instruction::DefGlobalFunc(_)
            | Instruction::MakeArr(_)
            | Instruction::MakeStr(_)
            | Instruction::MakeHash(_)
            | Instruction::Jmp(_)
            | Instruction::JmpTrue(_)
            | Instruction::JmpFalse(_)
            | Instruction::TryStart(_) => 2,
            Instruction::FetchLocal(_)
            | Instruction::StoreLocal(_)
            | Instruction::LocalDefP(_)
            | Instruction::DefLocalFunc(_)
            | Instruction::Call(_) => 1,
            Instruction::MakeClosure { .. } => 4,
            Instruction::FetchUpvar { .. }
            | Instruction::StoreUpvar { .. }
            | Instruction::UpvarDefP { .. }
            | Instruction::DefUpvarFunc { .. } => 2,
            _ => 0,
        }
    }

    /// The opcode this instruction encodes to.
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Halt => Opcode::Halt,
            Instruction::PushNull => Opcode::PushNull,
            Instruction::PushFalse => Opcode::PushFalse,
            Instruction::PushTrue => Opcode::PushTrue,
            Instruction::PushUndef => Opcode::PushUndef,
            Instruction::PushInt(_) => Opcode::PushInt,
            Instruction::PushLStr(_) => Opcode::PushLStr,
            Instruction::Dup => Opcode::Dup,
            Instruction::Pop => Opcode::Pop,
            Instruction::ResolveGlobal => Opcode::ResolveGlobal,
            Instruction::Patch(_) => Opcode::Patch,
            Instruction::InitDone => Opcode::InitDone,
            Instruction::FetchGlobal(_) => Opcode::FetchGlobal,
            Instruction::StoreGlobal(_) => Opcode::StoreGlobal,
            Instruction::FetchLocal(_) => Opcode::FetchLocal,
            Instruction::StoreLocal(_) => Opcode::StoreLocal,
            Instruction::Call(_) => Opcode::Call,
            Instruction::Ret => Opcode::Ret,
            Instruction::Jmp(_) => Opcode::Jmp,
            Instruction::JmpTrue(_) => Opcode::JmpTrue,
            Instruction::JmpFalse(_) => Opcode::JmpFalse,
            Instruction::MakeArr(_) => Opcode::MakeArr,
            Instruction::MakeClosure { .. } => Opcode::MakeClosure,
            Instruction::ToStr => Opcode::ToStr,
            Instruction::MakeStr(_) => Opcode::MakeStr,
            Instruction::PushEmptyStr => Opcode::PushEmptyStr,
            Instruction::GlobalDefP(_) => Opcode::GlobalDefP,
            Instruction::LocalDefP(_) => Opcode::LocalDefP,
            Instruction::DefGlobalFunc(_) => Opcode::DefGlobalFunc,
            Instruction::DefLocalFunc(_) => Opcode::DefLocalFunc,
            Instruction::FetchUpvar { .. } => Opcode::FetchUpvar,
            Instruction::StoreUpvar { .. } => Opcode::StoreUpvar,
            Instruction::UpvarDefP { .. } => Opcode::UpvarDefP,
            Instruction::DefUpvarFunc { .. } => Opcode::DefUpvarFunc,
            Instruction::MakeHash(_) => Opcode::MakeHash,
            Instruction::ToBool => Opcode::ToBool,
            Instruction::TryStart(_) => Opcode::TryStart,
            Instruction::TryEnd => Opcode::TryEnd,
            Instruction::Throw => Opcode::Throw,
        }
    }

    /// Relative offset carried by jumps, TRY_START and MAKE_CLOSURE.
    pub fn relative_offset(&self) -> Option<i16> {
        match self {
            Instruction::Jmp(o)
            | Instruction::JmpTrue(o)
            | Instruction::JmpFalse(o)
            | Instruction::TryStart(o) => Some(*o),
            Instruction::MakeClosure { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Resolve a relative offset against the offset of the next instruction.
///
/// Returns `None` when the result would be negative.
pub fn relative_target(next: usize, offset: i16) -> Option<usize> {
    next.checked_add_signed(offset as isize)
}
