//! VM state: the loaded program, globals, interned strings and link phase.
//!
//! [`Machine`] is the mutable state the interpreter loop works on. [`Vm`]
//! is the thread-safe handle hosts share: it owns the machine behind one
//! lock, so only one context runs at a time.

use std::sync::Arc;

use indexmap::IndexSet;
use ngvm_common::Program;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::builtins;
use crate::context::Context;
use crate::error::VmError;
use crate::function::{define_overload, Function, Native};
use crate::globals::SymbolTable;
use crate::types::TypeRegistry;
use crate::value::Value;

/// Where the VM is in the load/link/run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// After a load, until INIT_DONE. PATCH is allowed.
    Linking,
    /// Linked, no run in progress.
    Ready,
    /// A run is in progress and linking is over: the run executed
    /// INIT_DONE, or it started in Ready.
    Running,
}

/// How a run ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// HALT with this value on top of the stack.
    Ok(Value),
    /// An exception nobody caught.
    Exception(Value),
}

/// Mutable VM state.
#[derive(Debug)]
pub struct Machine {
    pub(crate) program: Program,
    pub(crate) globals: SymbolTable,
    pub(crate) strings: IndexSet<Arc<str>>,
    pub(crate) phase: Phase,
    pub(crate) types: Arc<TypeRegistry>,
}

impl Machine {
    fn new(types: Arc<TypeRegistry>) -> Self {
        Self {
            program: Program::default(),
            globals: SymbolTable::new(),
            strings: IndexSet::new(),
            phase: Phase::Linking,
            types,
        }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn globals(&self) -> &SymbolTable {
        &self.globals
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Return the shared copy of `s`, storing it on first use.
    pub fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.clone();
        }
        let shared: Arc<str> = Arc::from(s);
        self.strings.insert(shared.clone());
        shared
    }

    /// Add `native` as an overload of the global with its name.
    pub fn define_native(&mut self, native: Native) -> usize {
        let name = native.name.clone();
        let index = self.globals.resolve_or_create(&name);
        let fun = Function::Native(Arc::new(native));
        let current = self.globals.get(index).cloned().unwrap_or(Value::Undef);
        let merged = define_overload(&current, fun, &name);
        self.globals.set(index, merged);
        index
    }

    pub(crate) fn run(&mut self, ctx: &mut Context, entry_ip: usize) -> Result<Outcome, VmError> {
        if self.phase == Phase::Ready {
            self.phase = Phase::Running;
        }
        let result = self.run_to_exit(ctx, entry_ip);
        if self.phase == Phase::Running {
            self.phase = Phase::Ready;
        }
        result
    }
}

/// A VM shared between threads.
///
/// ```
/// use ngvm_common::Instruction;
/// use ngvm_vm::{context_init, Outcome, Value, Vm};
///
/// let vm = Vm::init(Vec::<String>::new());
/// let mut b = ngvm_common::ProgramBuilder::new();
/// let plus = b.label();
/// b.link("+", plus);
/// b.emit(Instruction::InitDone)
///     .emit(Instruction::PushInt(2))
///     .emit(Instruction::PushInt(3));
/// b.bind(plus);
/// b.emit(Instruction::FetchGlobal(0))
///     .emit(Instruction::Call(2))
///     .emit(Instruction::Halt);
/// let program = b.finish().unwrap();
///
/// vm.load(program.as_bytes());
/// let mut ctx = context_init();
/// assert_eq!(vm.run(&mut ctx, 0), Ok(Outcome::Ok(Value::Int(5))));
/// ```
#[derive(Debug)]
pub struct Vm {
    machine: Mutex<Machine>,
    types: Arc<TypeRegistry>,
}

impl Vm {
    /// Create a VM with the built-in types, `ARGV`, `ARGC`, type-name
    /// globals and the core natives.
    pub fn init<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let types = Arc::new(TypeRegistry::new());
        let mut machine = Machine::new(types.clone());

        let args: Vec<Value> = argv
            .into_iter()
            .map(|a| Value::Str(machine.intern(a.as_ref())))
            .collect();
        let argc = args.len();
        machine.globals.define("ARGV", Value::arr(args));
        machine.globals.define("ARGC", Value::Int(argc as i64));
        for info in types.iter() {
            machine.globals.define(info.name, Value::Type(info.clone()));
        }
        builtins::install(&mut machine);

        debug!(argc, globals = machine.globals.len(), "vm initialized");
        Self {
            machine: Mutex::new(machine),
            types,
        }
    }

    /// Append bytecode to the program and re-enter the linking phase.
    ///
    /// Returns the number of bytes consumed. A later unit's entry point is
    /// the program length before its load.
    pub fn load(&self, bytes: &[u8]) -> usize {
        let mut machine = self.machine.lock();
        let consumed = machine.program.append(bytes);
        machine.phase = Phase::Linking;
        debug!(consumed, total = machine.program.len(), "bytecode loaded");
        consumed
    }

    /// Index of `name` if it is a known global.
    pub fn check_global(&self, name: &str) -> Option<usize> {
        self.machine.lock().globals.check(name)
    }

    /// Index of `name`, creating an undefined slot if needed.
    pub fn resolve_global(&self, name: &str) -> usize {
        self.machine.lock().globals.resolve_or_create(name)
    }

    /// Current value of a defined global.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.machine
            .lock()
            .globals
            .lookup(name)
            .filter(|v| !v.is_undef())
            .cloned()
    }

    /// Add a host native as an overload of the global with its name.
    pub fn register_native(&self, native: Native) -> usize {
        self.machine.lock().define_native(native)
    }

    pub fn phase(&self) -> Phase {
        self.machine.lock().phase
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn program_len(&self) -> usize {
        self.machine.lock().program.len()
    }

    /// Execute from `entry_ip` until HALT, an uncaught exception, or a
    /// fatal error. Holds the machine lock for the whole run.
    #[instrument(level = "debug", skip(self, ctx))]
    pub fn run(&self, ctx: &mut Context, entry_ip: usize) -> Result<Outcome, VmError> {
        let outcome = self.machine.lock().run(ctx, entry_ip);
        if let Ok(Outcome::Exception(e)) = &outcome {
            debug!(exception = %e, "uncaught exception");
        }
        outcome
    }
}
