//! Opcode definitions for the ngvm instruction set.
//!
//! Byte values are part of the compiled format: existing programs depend on
//! them, so new opcodes are only ever appended.

use crate::error::BytecodeError;

/// Identifies the operation to perform.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Stop execution. Top of stack is the run's result.
    Halt = 0,

    // Stack literals
    /// Push Null.
    PushNull = 1,
    /// Push false.
    PushFalse = 2,
    /// Push true.
    PushTrue = 3,
    /// Push the undefined sentinel.
    PushUndef = 4,
    /// Push an Int. Operand: i64.
    PushInt = 5,
    /// Push an interned string. Operands: u8 length, then the bytes.
    PushLStr = 6,

    // Stack shape
    /// Duplicate the top of stack.
    Dup = 7,
    /// Discard the top of stack.
    Pop = 8,

    // Linking
    /// Pop a name, push its global index (creating the slot if needed).
    ResolveGlobal = 9,
    /// Pop an index, write it at an absolute offset. Operand: u16 offset.
    Patch = 10,
    /// End of the linking section.
    InitDone = 11,

    // Globals and locals
    /// Push a global slot. Operand: u16 index.
    FetchGlobal = 12,
    /// Pop into a global slot. Operand: u16 index.
    StoreGlobal = 13,
    /// Push a local slot. Operand: u8 slot.
    FetchLocal = 14,
    /// Pop into a local slot. Operand: u8 slot.
    StoreLocal = 15,

    // Control flow
    /// Call the callee on top of stack. Operand: u8 argument count.
    Call = 16,
    /// Return the top of stack to the caller.
    Ret = 17,
    /// Unconditional relative jump. Operand: i16 offset.
    Jmp = 18,
    /// Pop, jump if truthy. Operand: i16 offset.
    JmpTrue = 19,
    /// Pop, jump if falsy. Operand: i16 offset.
    JmpFalse = 20,

    // Composite construction
    /// Pop N values into an array. Operand: u16 count.
    MakeArr = 21,
    /// Build a closure. Operands: i16 entry offset, u8 params, u8 locals.
    MakeClosure = 22,
    /// Coerce the top of stack to a string.
    ToStr = 23,
    /// Pop N strings, push their concatenation. Operand: u16 count.
    MakeStr = 24,
    /// Push the empty string.
    PushEmptyStr = 25,

    // Definedness and function definition
    /// Push whether a global slot is defined. Operand: u16 index.
    GlobalDefP = 26,
    /// Push whether a local slot is defined. Operand: u8 slot.
    LocalDefP = 27,
    /// Pop a function, add it as an overload of a global. Operand: u16 index.
    DefGlobalFunc = 28,
    /// Pop a function, add it as an overload of a local. Operand: u8 slot.
    DefLocalFunc = 29,

    // Upvalues
    /// Push a captured variable. Operands: u8 depth, u8 slot.
    FetchUpvar = 30,
    /// Pop into a captured variable. Operands: u8 depth, u8 slot.
    StoreUpvar = 31,
    /// Push whether a captured variable is defined. Operands: u8 depth, u8 slot.
    UpvarDefP = 32,
    /// Pop a function, add it as an overload of a captured variable.
    DefUpvarFunc = 33,

    /// Pop N key/value pairs into a hash. Operand: u16 pair count.
    MakeHash = 34,
    /// Coerce the top of stack to a Bool.
    ToBool = 35,

    // Exceptions
    /// Install an exception handler. Operand: i16 catch offset.
    TryStart = 36,
    /// Remove the innermost handler.
    TryEnd = 37,
    /// Pop a value and raise it.
    Throw = 38,
}

/// All valid opcodes, in byte order.
pub const ALL_OPCODES: [Opcode; 39] = [
    Opcode::Halt,
    Opcode::PushNull,
    Opcode::PushFalse,
    Opcode::PushTrue,
    Opcode::PushUndef,
    Opcode::PushInt,
    Opcode::PushLStr,
    Opcode::Dup,
    Opcode::Pop,
    Opcode::ResolveGlobal,
    Opcode::Patch,
    Opcode::InitDone,
    Opcode::FetchGlobal,
    Opcode::StoreGlobal,
    Opcode::FetchLocal,
    Opcode::StoreLocal,
    Opcode::Call,
    Opcode::Ret,
    Opcode::Jmp,
    Opcode::JmpTrue,
    Opcode::JmpFalse,
    Opcode::MakeArr,
    Opcode::MakeClosure,
    Opcode::ToStr,
    Opcode::MakeStr,
    Opcode::PushEmptyStr,
    Opcode::GlobalDefP,
    Opcode::LocalDefP,
    Opcode::DefGlobalFunc,
    Opcode::DefLocalFunc,
    Opcode::FetchUpvar,
    Opcode::StoreUpvar,
    Opcode::UpvarDefP,
    Opcode::DefUpvarFunc,
    Opcode::MakeHash,
    Opcode::ToBool,
    Opcode::TryStart,
    Opcode::TryEnd,
    Opcode::Throw,
];

impl TryFrom<u8> for Opcode {
    type Error = u8;

    /// Returns the offending byte when it names no opcode.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ALL_OPCODES.get(value as usize).copied().ok_or(value)
    }
}

impl Opcode {
    /// Decode an opcode byte found at `at`.
    pub fn decode(byte: u8, at: usize) -> Result<Self, BytecodeError> {
        Opcode::try_from(byte).map_err(|byte| BytecodeError::InvalidOpcode { at, byte })
    }

    /// Returns the assembly mnemonic for this opcode.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Halt => "HALT",
            Opcode::PushNull => "PUSH_NULL",
            Opcode::PushFalse => "PUSH_FALSE",
            Opcode::PushTrue => "PUSH_TRUE",
            Opcode::PushUndef => "PUSH_UNDEF",
            Opcode::PushInt => "PUSH_INT",
            Opcode::PushLStr => "PUSH_L_STR",
            Opcode::Dup => "DUP",
            Opcode::Pop => "POP",
            Opcode::ResolveGlobal => "RESOLVE_GLOBAL",
            Opcode::Patch => "PATCH",
            Opcode::InitDone => "INIT_DONE",
            Opcode::FetchGlobal => "FETCH_GLOBAL",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::FetchLocal => "FETCH_LOCAL",
            Opcode::StoreLocal => "STORE_LOCAL",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Jmp => "JMP",
            Opcode::JmpTrue => "JMP_TRUE",
            Opcode::JmpFalse => "JMP_FALSE",
            Opcode::MakeArr => "MAKE_ARR",
            Opcode::MakeClosure => "MAKE_CLOSURE",
            Opcode::ToStr => "TO_STR",
            Opcode::MakeStr => "MAKE_STR",
            Opcode::PushEmptyStr => "PUSH_EMPTY_STR",
            Opcode::GlobalDefP => "GLOBAL_DEF_P",
            Opcode::LocalDefP => "LOCAL_DEF_P",
            Opcode::DefGlobalFunc => "DEF_GLOBAL_FUNC",
            Opcode::DefLocalFunc => "DEF_LOCAL_FUNC",
            Opcode::FetchUpvar => "FETCH_UPVAR",
            Opcode::StoreUpvar => "STORE_UPVAR",
            Opcode::UpvarDefP => "UPVAR_DEF_P",
            Opcode::DefUpvarFunc => "DEF_UPVAR_FUNC",
            Opcode::MakeHash => "MAKE_HASH",
            Opcode::ToBool => "TO_BOOL",
            Opcode::TryStart => "TRY_START",
            Opcode::TryEnd => "TRY_END",
            Opcode::Throw => "THROW",
        }
    }

    /// Look up an opcode by its mnemonic.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        ALL_OPCODES
            .iter()
            .find(|op| op.mnemonic() == mnemonic)
            .copied()
    }

    /// True for opcodes whose operand is a 16-bit global index, i.e. the
    /// only operands PATCH may rewrite.
    pub fn takes_global_index(&self) -> bool {
        matches!(
            self,
            Opcode::FetchGlobal | Opcode::StoreGlobal | Opcode::GlobalDefP | Opcode::DefGlobalFunc
        )
    }
}
