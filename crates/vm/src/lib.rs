//! ngvm virtual machine: executes linked bytecode.
//!
//! The VM is a stack machine with:
//! - a bounded value stack and frame stack per [`Context`]
//! - a global symbol table resolved and patched during a linking phase
//! - closures that share captured locals by reference
//! - multi-dispatch functions whose overloads report one of four outcomes
//!
//! # Usage
//!
//! ```
//! use ngvm_common::{Instruction, Program};
//! use ngvm_vm::{context_init, Outcome, Value, Vm};
//!
//! let program = Program::from_instructions(&[
//!     Instruction::InitDone,
//!     Instruction::PushInt(42),
//!     Instruction::Halt,
//! ])
//! .unwrap();
//!
//! let vm = Vm::init(["script"]);
//! vm.load(program.as_bytes());
//! let mut ctx = context_init();
//! assert_eq!(vm.run(&mut ctx, 0).unwrap(), Outcome::Ok(Value::Int(42)));
//! ```

mod builtins;
mod call;
pub mod closure;
pub mod context;
pub mod error;
mod execute;
pub mod function;
pub mod globals;
pub mod machine;
pub mod types;
pub mod value;

pub use call::not_callable;
pub use closure::Scope;
pub use context::{context_init, Context, Frame, Handler, MAX_FRAMES, MAX_HANDLERS, MAX_STACK};
pub use error::VmError;
pub use function::{Closure, ContextFn, Function, MethodResult, MultiMethod, Native, NativeFn, PureFn};
pub use globals::SymbolTable;
pub use machine::{Machine, Outcome, Phase, Vm};
pub use types::{TypeInfo, TypeRegistry, ValueTag};
pub use value::{HashKey, Value};
