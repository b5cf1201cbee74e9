//! CALL/RET and overload resolution.
//!
//! A callee is tried without touching the stack: closures are matched on
//! arity and parameter types, natives are invoked and report one of the
//! four [`MethodResult`] outcomes, and overload chains try their entries
//! newest first. Only once a candidate has been chosen are the callee and
//! its arguments removed.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::context::{Context, Frame, MAX_FRAMES};
use crate::error::VmError;
use crate::execute::{Exit, RunBase, Step};
use crate::function::{Closure, Function, MethodResult, NativeFn};
use crate::machine::Machine;
use crate::value::Value;

/// Result of resolving a callee against a set of arguments.
pub(crate) enum Dispatch {
    /// A native produced a value.
    Value(Value),
    /// A closure accepted the arguments; its body still has to run.
    Enter(Arc<Closure>),
    /// A native raised.
    Raise(Value),
    /// No candidate accepted the arguments.
    Failed(Failure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    ArgsMismatch,
    ImplMissing,
}

impl Failure {
    pub(crate) fn kind(self) -> &'static str {
        match self {
            Failure::ArgsMismatch => "ArgsMismatch",
            Failure::ImplMissing => "ImplMissing",
        }
    }
}

/// Exception raised when every candidate of `callee` failed.
pub(crate) fn dispatch_error(failure: Failure, callee: &Function) -> Value {
    Value::error(failure.kind(), &[("callee", Value::str(&callee.name()))])
}

/// Exception raised when calling something that is not a function.
pub fn not_callable(found: &Value) -> Value {
    Value::error("NotCallable", &[("found", Value::str(found.type_name()))])
}

fn new_locals(args: &[Value], n_locals: u8) -> Vec<Value> {
    let mut locals = args.to_vec();
    locals.resize(n_locals as usize, Value::Undef);
    locals
}

impl Machine {
    pub(crate) fn exec_call(
        &mut self,
        ctx: &mut Context,
        n_args: u8,
        at: usize,
        next: usize,
    ) -> Result<Step, VmError> {
        let n = n_args as usize;
        ctx.require(n + 1, at)?;
        let callee = match ctx.peek(at)? {
            Value::Fun(fun) => fun.clone(),
            other => {
                let exception = not_callable(other);
                ctx.discard(n + 1);
                return Ok(Step::Raise(exception));
            }
        };
        let args = ctx.top(n + 1, at)?[..n].to_vec();

        match self.dispatch(ctx, &callee, &args)? {
            Dispatch::Value(value) => {
                ctx.discard(n + 1);
                ctx.push(value, at)?;
                Ok(Step::Next)
            }
            Dispatch::Enter(closure) => self.enter(ctx, &closure, n, next, at),
            Dispatch::Raise(exception) => {
                ctx.discard(n + 1);
                Ok(Step::Raise(exception))
            }
            Dispatch::Failed(failure) => {
                ctx.discard(n + 1);
                Ok(Step::Raise(dispatch_error(failure, &callee)))
            }
        }
    }

    /// Replace callee and arguments with a new frame and jump to the body.
    fn enter(
        &mut self,
        ctx: &mut Context,
        closure: &Closure,
        n_args: usize,
        return_ip: usize,
        at: usize,
    ) -> Result<Step, VmError> {
        if ctx.frames.len() >= MAX_FRAMES {
            return Err(VmError::FrameOverflow { at });
        }
        let mut values = ctx.pop_n(n_args + 1, at)?;
        values.pop();
        let frame = Frame {
            return_ip,
            saved_sp: ctx.stack.len(),
            locals: Arc::new(Mutex::new(new_locals(&values, closure.n_locals))),
            scope: closure.scope.clone(),
        };
        ctx.push_frame(frame, at)?;
        trace!(entry = closure.entry, depth = ctx.frames.len(), "call");
        Ok(Step::Jump(closure.entry))
    }

    pub(crate) fn exec_ret(
        &mut self,
        ctx: &mut Context,
        base: RunBase,
        at: usize,
    ) -> Result<Step, VmError> {
        let frame = ctx.frame(at)?;
        if ctx.frames.len() <= base.frames {
            return Err(VmError::NoActiveFrame { at });
        }
        let (return_ip, saved_sp) = (frame.return_ip, frame.saved_sp);
        if ctx.stack.len() <= saved_sp {
            return Err(VmError::StackUnderflow { at });
        }

        let value = ctx.pop(at)?;
        let depth = ctx.frames.len();
        while ctx.handlers.len() > base.handlers
            && ctx.handlers.last().is_some_and(|h| h.frames >= depth)
        {
            ctx.handlers.pop();
        }
        ctx.frames.pop();
        ctx.stack.truncate(saved_sp);
        trace!(depth = depth - 1, "return");

        if base.nested && ctx.frames.len() == base.frames {
            return Ok(Step::Exit(Exit::Returned(value)));
        }
        ctx.push(value, at)?;
        Ok(Step::Jump(return_ip))
    }

    /// Choose the implementation of `callee` for `args`.
    pub(crate) fn dispatch(
        &mut self,
        ctx: &mut Context,
        callee: &Function,
        args: &[Value],
    ) -> Result<Dispatch, VmError> {
        match callee {
            Function::Closure(closure) => Ok(if closure.accepts(&self.types, args) {
                Dispatch::Enter(closure.clone())
            } else {
                Dispatch::Failed(Failure::ArgsMismatch)
            }),
            Function::Native(native) => {
                let result = match native.func {
                    NativeFn::Pure(f) => f(args),
                    NativeFn::WithContext(f) => f(self, ctx, args)?,
                };
                Ok(match result {
                    MethodResult::Ok(value) => Dispatch::Value(value),
                    MethodResult::Exception(exception) => Dispatch::Raise(exception),
                    MethodResult::ArgsMismatch => Dispatch::Failed(Failure::ArgsMismatch),
                    MethodResult::ImplMissing => Dispatch::Failed(Failure::ImplMissing),
                })
            }
            Function::Multi(multi) => {
                let mut missing = false;
                for overload in multi.overloads().iter().rev() {
                    match self.dispatch(ctx, overload, args)? {
                        Dispatch::Failed(Failure::ImplMissing) => missing = true,
                        Dispatch::Failed(Failure::ArgsMismatch) => {}
                        chosen => return Ok(chosen),
                    }
                }
                let failure = if missing {
                    Failure::ImplMissing
                } else {
                    Failure::ArgsMismatch
                };
                trace!(callee = %multi.name, kind = failure.kind(), "no overload matched");
                Ok(Dispatch::Failed(failure))
            }
        }
    }

    /// Call `callee` with `args` and run it to completion.
    ///
    /// For use by context-aware natives. Bytecode callees run in a nested
    /// loop that ends at their RET; the context is left as it was found.
    pub fn call_value(
        &mut self,
        ctx: &mut Context,
        callee: &Value,
        args: &[Value],
    ) -> Result<MethodResult, VmError> {
        let Value::Fun(fun) = callee else {
            return Ok(MethodResult::Exception(not_callable(callee)));
        };
        Ok(match self.dispatch(ctx, fun, args)? {
            Dispatch::Value(value) => MethodResult::Ok(value),
            Dispatch::Raise(exception) => MethodResult::Exception(exception),
            Dispatch::Failed(Failure::ArgsMismatch) => MethodResult::ArgsMismatch,
            Dispatch::Failed(Failure::ImplMissing) => MethodResult::ImplMissing,
            Dispatch::Enter(closure) => return self.run_closure(ctx, &closure, args),
        })
    }

    fn run_closure(
        &mut self,
        ctx: &mut Context,
        closure: &Closure,
        args: &[Value],
    ) -> Result<MethodResult, VmError> {
        let at = closure.entry;
        let base = RunBase {
            frames: ctx.frames.len(),
            handlers: ctx.handlers.len(),
            nested: true,
        };
        let saved_sp = ctx.stack.len();
        let frame = Frame {
            return_ip: at,
            saved_sp,
            locals: Arc::new(Mutex::new(new_locals(args, closure.n_locals))),
            scope: closure.scope.clone(),
        };
        ctx.push_frame(frame, at)?;
        trace!(entry = at, depth = ctx.frames.len(), "nested call");

        let exit = self.execute(ctx, at, base).and_then(|exit| match exit {
            Exit::Returned(value) => Ok(MethodResult::Ok(value)),
            Exit::Raised(exception) => Ok(MethodResult::Exception(exception)),
            Exit::Halt(_) => Err(VmError::UnexpectedHalt { at }),
        });
        if exit.is_err() {
            ctx.frames.truncate(base.frames);
            ctx.stack.truncate(saved_sp);
            ctx.handlers.truncate(base.handlers);
        }
        exit
    }
}
