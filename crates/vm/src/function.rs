//! Callable values and the native calling convention.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::closure::Scope;
use crate::context::Context;
use crate::error::VmError;
use crate::machine::Machine;
use crate::types::{TypeRegistry, ValueTag};
use crate::value::Value;

/// Result of one call attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    /// The call succeeded with this value.
    Ok(Value),
    /// Argument count or types do not fit; try the next overload.
    ArgsMismatch,
    /// Arguments fit but there is no implementation for them; try the next
    /// overload, raise if none is left.
    ImplMissing,
    /// The call raised this value.
    Exception(Value),
}

/// A native that needs nothing but its arguments.
pub type PureFn = fn(&[Value]) -> MethodResult;

/// A native that may touch the machine or re-enter the interpreter.
pub type ContextFn = fn(&mut Machine, &mut Context, &[Value]) -> Result<MethodResult, VmError>;

#[derive(Clone, Copy)]
pub enum NativeFn {
    Pure(PureFn),
    WithContext(ContextFn),
}

/// A host-provided function.
pub struct Native {
    pub name: String,
    pub func: NativeFn,
}

impl Native {
    pub fn pure(name: &str, func: PureFn) -> Self {
        Self {
            name: name.to_owned(),
            func: NativeFn::Pure(func),
        }
    }

    pub fn with_context(name: &str, func: ContextFn) -> Self {
        Self {
            name: name.to_owned(),
            func: NativeFn::WithContext(func),
        }
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.func {
            NativeFn::Pure(_) => "pure",
            NativeFn::WithContext(_) => "with_context",
        };
        f.debug_struct("Native")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// A bytecode function with its captured scope.
#[derive(Debug)]
pub struct Closure {
    /// Absolute offset of the first instruction.
    pub entry: usize,
    pub n_params: u8,
    pub n_locals: u8,
    /// Declared parameter types; `Any` when unconstrained.
    pub param_types: Vec<ValueTag>,
    pub scope: Option<Arc<Scope>>,
}

impl Closure {
    /// True when `args` fit this closure's arity and parameter types.
    pub fn accepts(&self, types: &TypeRegistry, args: &[Value]) -> bool {
        args.len() == self.n_params as usize
            && self.param_types.iter().zip(args).all(|(&param, arg)| {
                arg.tag()
                    .map_or(param == ValueTag::Any, |tag| types.is_subtype(tag, param))
            })
    }
}

/// An overload chain bound to one name.
#[derive(Debug)]
pub struct MultiMethod {
    pub name: String,
    overloads: Mutex<Vec<Function>>,
}

impl MultiMethod {
    pub fn new(name: &str, first: Function) -> Self {
        let multi = Self {
            name: name.to_owned(),
            overloads: Mutex::new(Vec::new()),
        };
        multi.add(first);
        multi
    }

    /// Add an overload. Nested chains are flattened so that a chain never
    /// contains another chain.
    pub fn add(&self, fun: Function) {
        match fun {
            Function::Multi(other) => {
                if std::ptr::eq(self, Arc::as_ptr(&other)) {
                    return;
                }
                let inner = other.overloads();
                self.overloads.lock().extend(inner);
            }
            single => self.overloads.lock().push(single),
        }
    }

    /// Snapshot of the overloads, oldest first.
    pub fn overloads(&self) -> Vec<Function> {
        self.overloads.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.overloads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.overloads.lock().is_empty()
    }
}

/// The payload of a `Fun` value.
#[derive(Debug, Clone)]
pub enum Function {
    Native(Arc<Native>),
    Closure(Arc<Closure>),
    Multi(Arc<MultiMethod>),
}

impl Function {
    pub fn ptr_eq(&self, other: &Function) -> bool {
        match (self, other) {
            (Function::Native(a), Function::Native(b)) => Arc::ptr_eq(a, b),
            (Function::Closure(a), Function::Closure(b)) => Arc::ptr_eq(a, b),
            (Function::Multi(a), Function::Multi(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Name used in dispatch errors.
    pub fn name(&self) -> String {
        match self {
            Function::Native(n) => n.name.clone(),
            Function::Closure(c) => format!("closure@{}", c.entry),
            Function::Multi(m) => m.name.clone(),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Native(n) => write!(f, "native {}", n.name),
            Function::Closure(c) => write!(f, "closure@{}/{}", c.entry, c.n_params),
            Function::Multi(m) => write!(f, "multi {} ({} overloads)", m.name, m.len()),
        }
    }
}

/// Add `fun` as an overload of whatever `slot` holds.
///
/// An undefined slot or a non-function value is replaced by a new chain;
/// a lone function becomes the first entry of a new chain.
pub fn define_overload(slot: &Value, fun: Function, name: &str) -> Value {
    match slot {
        Value::Fun(Function::Multi(multi)) => {
            multi.add(fun);
            slot.clone()
        }
        Value::Fun(existing) => {
            let multi = MultiMethod::new(name, existing.clone());
            multi.add(fun);
            Value::Fun(Function::Multi(Arc::new(multi)))
        }
        _ => Value::Fun(Function::Multi(Arc::new(MultiMethod::new(name, fun)))),
    }
}
