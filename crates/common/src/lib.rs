//! ngvm bytecode format.
//!
//! This crate provides the data structures shared by the interpreter,
//! assembler and verifier:
//!
//! - [`Opcode`]: the instruction set, one byte per opcode
//! - [`Instruction`]: a decoded instruction with its operands
//! - [`Program`]: a flat bytecode buffer
//! - [`ProgramBuilder`]: label-aware construction of programs
//! - [`BytecodeError`]: errors from decoding or building byte streams

pub mod builder;
pub mod error;
pub mod instruction;
pub mod opcode;
pub mod program;

pub use builder::{Label, ProgramBuilder};
pub use error::BytecodeError;
pub use instruction::{relative_target, Instruction, MAX_STR_LITERAL};
pub use opcode::Opcode;
pub use program::Program;
