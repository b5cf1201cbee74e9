//! Error types for the ngvm assembler.

use ngvm_common::BytecodeError;
use thiserror::Error;

/// Errors produced during assembly of text to bytecode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// An unrecognized opcode mnemonic was encountered.
    #[error("line {line}: unknown opcode '{token}'")]
    UnknownOpcode { line: usize, token: String },

    /// An opcode did not have enough arguments.
    #[error("line {line}: {opcode} expects {expected} argument(s)")]
    MissingArgument {
        line: usize,
        opcode: &'static str,
        expected: usize,
    },

    /// A numeric literal could not be parsed or is out of range.
    #[error("line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },

    /// A token appeared where it was not expected.
    #[error("line {line}: unexpected token '{token}'")]
    UnexpectedToken { line: usize, token: String },

    /// A string literal has no closing quote.
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },

    #[error("line {line}: unknown escape '\\{escape}'")]
    InvalidEscape { line: usize, escape: char },

    /// A string literal does not fit PUSH_L_STR's length byte.
    #[error("line {line}: string literal of {len} bytes exceeds 255")]
    StringTooLong { line: usize, len: usize },

    #[error("line {line}: label '{name}' already defined")]
    DuplicateLabel { line: usize, name: String },

    /// A label is referenced but never defined. `line` is the first use.
    #[error("line {line}: undefined label '{name}'")]
    UndefinedLabel { line: usize, name: String },

    /// Layout failure, e.g. a label too far away for a 16-bit offset.
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}
