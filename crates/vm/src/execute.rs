//! Main interpreter loop and opcode dispatch.
//!
//! The loop is iterative: bytecode calls push a frame and jump, returns pop
//! it and jump back. The host stack only grows when a native re-enters the
//! interpreter through [`Machine::call_value`].
//!
//! Every handler validates its operands before touching the context, so a
//! fatal error leaves the stack and frames as they were before the faulting
//! instruction.

use indexmap::IndexMap;
use ngvm_common::{relative_target, Instruction, Opcode};
use tracing::{debug, trace};

use crate::closure::invalid_definition;
use crate::context::{Context, Handler, MAX_STACK};
use crate::error::VmError;
use crate::function::{define_overload, Function};
use crate::machine::{Machine, Outcome, Phase};
use crate::value::{HashKey, Value};

/// How one `execute` call ended.
#[derive(Debug)]
pub(crate) enum Exit {
    /// HALT at top level.
    Halt(Value),
    /// RET out of the frame a nested call started with.
    Returned(Value),
    /// Exception with no handler inside this run.
    Raised(Value),
}

/// What the loop does after an instruction.
#[derive(Debug)]
pub(crate) enum Step {
    Next,
    Jump(usize),
    Raise(Value),
    Exit(Exit),
}

/// The part of the context owned by an enclosing run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunBase {
    pub frames: usize,
    pub handlers: usize,
    /// Started by `call_value`: RET to `frames` ends the run.
    pub nested: bool,
}

impl RunBase {
    fn top_level(ctx: &Context) -> Self {
        Self {
            frames: ctx.frames.len(),
            handlers: ctx.handlers.len(),
            nested: false,
        }
    }
}

enum Unwound {
    Caught(usize),
    Uncaught(Value),
}

impl Machine {
    pub(crate) fn run_to_exit(
        &mut self,
        ctx: &mut Context,
        entry_ip: usize,
    ) -> Result<Outcome, VmError> {
        let base = RunBase::top_level(ctx);
        let exit = self.execute(ctx, entry_ip, base)?;
        ctx.handlers.truncate(base.handlers);
        Ok(match exit {
            Exit::Halt(value) | Exit::Returned(value) => Outcome::Ok(value),
            Exit::Raised(exception) => Outcome::Exception(exception),
        })
    }

    /// Run from `ip` until the run identified by `base` ends.
    pub(crate) fn execute(
        &mut self,
        ctx: &mut Context,
        mut ip: usize,
        base: RunBase,
    ) -> Result<Exit, VmError> {
        loop {
            let (instr, next) = Instruction::decode(self.program.as_bytes(), ip)
                .map_err(|e| VmError::from_decode(e, ip))?;
            let at = ip;

            let step = match instr {
                Instruction::Halt => self.exec_halt(ctx, base, at)?,

                // Literals
                Instruction::PushNull => push(ctx, Value::Null, at)?,
                Instruction::PushFalse => push(ctx, Value::Bool(false), at)?,
                Instruction::PushTrue => push(ctx, Value::Bool(true), at)?,
                Instruction::PushUndef => push(ctx, Value::Undef, at)?,
                Instruction::PushInt(n) => push(ctx, Value::Int(n), at)?,
                Instruction::PushLStr(s) => {
                    let s = self.intern(&s);
                    push(ctx, Value::Str(s), at)?
                }
                Instruction::PushEmptyStr => {
                    let s = self.intern("");
                    push(ctx, Value::Str(s), at)?
                }

                // Stack shape
                Instruction::Dup => {
                    let top = ctx.peek(at)?.clone();
                    push(ctx, top, at)?
                }
                Instruction::Pop => {
                    ctx.pop(at)?;
                    Step::Next
                }

                // Linking
                Instruction::ResolveGlobal => self.exec_resolve_global(ctx, at)?,
                Instruction::Patch(target) => self.exec_patch(ctx, target, at)?,
                Instruction::InitDone => self.exec_init_done(),

                // Globals
                Instruction::FetchGlobal(index) => self.exec_fetch_global(ctx, index, at)?,
                Instruction::StoreGlobal(index) => self.exec_store_global(ctx, index, at)?,
                Instruction::GlobalDefP(index) => {
                    let defined = self
                        .globals
                        .get(index as usize)
                        .is_some_and(|v| !v.is_undef());
                    push(ctx, Value::Bool(defined), at)?
                }
                Instruction::DefGlobalFunc(index) => self.exec_def_global_func(ctx, index, at)?,

                // Locals
                Instruction::FetchLocal(slot) => exec_fetch_local(ctx, slot, at)?,
                Instruction::StoreLocal(slot) => exec_store_local(ctx, slot, at)?,
                Instruction::LocalDefP(slot) => exec_local_def_p(ctx, slot, at)?,
                Instruction::DefLocalFunc(slot) => exec_def_local_func(ctx, slot, at)?,

                // Upvalues
                Instruction::FetchUpvar { depth, slot } => {
                    self.exec_fetch_upvar(ctx, depth, slot, at)?
                }
                Instruction::StoreUpvar { depth, slot } => {
                    self.exec_store_upvar(ctx, depth, slot, at)?
                }
                Instruction::UpvarDefP { depth, slot } => {
                    self.exec_upvar_def_p(ctx, depth, slot, at)?
                }
                Instruction::DefUpvarFunc { depth, slot } => {
                    self.exec_def_upvar_func(ctx, depth, slot, at)?
                }

                // Control flow
                Instruction::Call(n_args) => self.exec_call(ctx, n_args, at, next)?,
                Instruction::Ret => self.exec_ret(ctx, base, at)?,
                Instruction::Jmp(offset) => Step::Jump(self.jump_target(next, offset, at)?),
                Instruction::JmpTrue(offset) => self.exec_branch(ctx, offset, true, at, next)?,
                Instruction::JmpFalse(offset) => self.exec_branch(ctx, offset, false, at, next)?,

                // Composite values
                Instruction::MakeArr(count) => {
                    let items = ctx.pop_n(count as usize, at)?;
                    push(ctx, Value::arr(items), at)?
                }
                Instruction::MakeClosure {
                    offset,
                    params,
                    locals,
                } => self.exec_make_closure(ctx, offset, params, locals, at, next)?,
                Instruction::MakeStr(count) => exec_make_str(ctx, count, at)?,
                Instruction::MakeHash(pairs) => exec_make_hash(ctx, pairs, at)?,

                // Coercions
                Instruction::ToStr => {
                    let value = match ctx.pop(at)? {
                        s @ Value::Str(_) => s,
                        other => Value::Str(self.intern(&other.to_string())),
                    };
                    push(ctx, value, at)?
                }
                Instruction::ToBool => {
                    let truthy = ctx.pop(at)?.is_truthy();
                    push(ctx, Value::Bool(truthy), at)?
                }

                // Exceptions
                Instruction::TryStart(offset) => self.exec_try_start(ctx, offset, at, next)?,
                Instruction::TryEnd => exec_try_end(ctx, base, at)?,
                Instruction::Throw => Step::Raise(ctx.pop(at)?),
            };

            ip = match step {
                Step::Next => next,
                Step::Jump(target) => target,
                Step::Raise(exception) => match self.unwind(ctx, exception, base, at)? {
                    Unwound::Caught(catch_ip) => catch_ip,
                    Unwound::Uncaught(exception) => return Ok(Exit::Raised(exception)),
                },
                Step::Exit(exit) => return Ok(exit),
            };
        }
    }

    /// Resolve a relative operand to an offset inside the program.
    pub(crate) fn jump_target(&self, next: usize, offset: i16, at: usize) -> Result<usize, VmError> {
        relative_target(next, offset)
            .filter(|&target| target < self.program.len())
            .ok_or(VmError::JumpOutOfRange { at, offset })
    }

    fn exec_halt(&mut self, ctx: &mut Context, base: RunBase, at: usize) -> Result<Step, VmError> {
        if base.nested {
            return Err(VmError::UnexpectedHalt { at });
        }
        let value = ctx
            .stack
            .pop()
            .ok_or(VmError::HaltWithEmptyStack { at })?;
        Ok(Step::Exit(Exit::Halt(value)))
    }

    fn exec_resolve_global(&mut self, ctx: &mut Context, at: usize) -> Result<Step, VmError> {
        let name = match ctx.peek(at)? {
            Value::Str(s) => s.clone(),
            other => {
                return Err(VmError::TypeMismatch {
                    at,
                    expected: "Str",
                    found: other.type_name(),
                })
            }
        };
        let index = self.globals.resolve_or_create(&name);
        ctx.pop(at)?;
        ctx.push(Value::Int(index as i64), at)?;
        trace!(name = %name, index, "resolved global");
        Ok(Step::Next)
    }

    fn exec_patch(&mut self, ctx: &mut Context, target: u16, at: usize) -> Result<Step, VmError> {
        if self.phase != Phase::Linking {
            return Err(VmError::PatchAfterLink { at });
        }
        let invalid = || VmError::InvalidPatch { at, target };
        let index = match ctx.peek(at)? {
            Value::Int(n) => u16::try_from(*n).map_err(|_| invalid())?,
            other => {
                return Err(VmError::TypeMismatch {
                    at,
                    expected: "Int",
                    found: other.type_name(),
                })
            }
        };
        let offset = target as usize;
        let patchable = offset
            .checked_sub(1)
            .and_then(|op_at| self.program.byte(op_at))
            .and_then(|byte| Opcode::try_from(byte).ok())
            .is_some_and(|op| op.takes_global_index());
        if !patchable || self.program.read_u16(offset).is_none() {
            return Err(invalid());
        }
        ctx.pop(at)?;
        self.program
            .write_u16(offset, index)
            .map_err(|_| invalid())?;
        trace!(target, index, "patched global operand");
        Ok(Step::Next)
    }

    fn exec_init_done(&mut self) -> Step {
        // INIT_DONE only executes inside a run, which ends in Ready.
        if self.phase == Phase::Linking {
            self.phase = Phase::Running;
            debug!(globals = self.globals.len(), "linking done");
        }
        Step::Next
    }

    fn exec_fetch_global(&mut self, ctx: &mut Context, index: u16, at: usize) -> Result<Step, VmError> {
        let value = match self.globals.get(index as usize) {
            Some(v) if !v.is_undef() => v.clone(),
            _ => {
                return Err(VmError::GlobalUndefined {
                    at,
                    name: self.globals.describe(index as usize),
                })
            }
        };
        push(ctx, value, at)
    }

    fn exec_store_global(&mut self, ctx: &mut Context, index: u16, at: usize) -> Result<Step, VmError> {
        if self.globals.get(index as usize).is_none() {
            return Err(VmError::GlobalUndefined {
                at,
                name: self.globals.describe(index as usize),
            });
        }
        let value = ctx.pop(at)?;
        self.globals.set(index as usize, value);
        Ok(Step::Next)
    }

    fn exec_def_global_func(
        &mut self,
        ctx: &mut Context,
        index: u16,
        at: usize,
    ) -> Result<Step, VmError> {
        let index = index as usize;
        let Some(current) = self.globals.get(index).cloned() else {
            return Err(VmError::GlobalUndefined {
                at,
                name: self.globals.describe(index),
            });
        };
        let fun = match ctx.pop(at)? {
            Value::Fun(fun) => fun,
            other => return Ok(Step::Raise(invalid_definition(&other))),
        };
        let name = self.globals.describe(index);
        let merged = define_overload(&current, fun, &name);
        self.globals.set(index, merged);
        trace!(global = %name, "defined overload");
        Ok(Step::Next)
    }

    fn exec_branch(
        &mut self,
        ctx: &mut Context,
        offset: i16,
        when: bool,
        at: usize,
        next: usize,
    ) -> Result<Step, VmError> {
        let target = self.jump_target(next, offset, at)?;
        if ctx.pop(at)?.is_truthy() == when {
            Ok(Step::Jump(target))
        } else {
            Ok(Step::Next)
        }
    }

    fn exec_try_start(
        &mut self,
        ctx: &mut Context,
        offset: i16,
        at: usize,
        next: usize,
    ) -> Result<Step, VmError> {
        let catch_ip = self.jump_target(next, offset, at)?;
        let handler = Handler {
            catch_ip,
            frames: ctx.frames.len(),
            sp: ctx.stack.len(),
        };
        ctx.push_handler(handler, at)?;
        Ok(Step::Next)
    }

    /// Transfer a raised value to the innermost handler of this run, or
    /// pop every frame of the run if there is none.
    fn unwind(
        &mut self,
        ctx: &mut Context,
        exception: Value,
        base: RunBase,
        at: usize,
    ) -> Result<Unwound, VmError> {
        if ctx.handlers.len() > base.handlers {
            if let Some(handler) = ctx.handlers.last().copied() {
                // The exception lands on top of whatever survives the unwind.
                if handler.sp.min(ctx.sp()) >= MAX_STACK {
                    return Err(VmError::StackOverflow { at });
                }
                ctx.handlers.pop();
                ctx.frames.truncate(handler.frames);
                ctx.stack.truncate(handler.sp);
                ctx.stack.push(exception);
                trace!(catch_ip = handler.catch_ip, depth = handler.frames, "exception caught");
                return Ok(Unwound::Caught(handler.catch_ip));
            }
        }
        if let Some(frame) = ctx.frames.get(base.frames) {
            let sp = frame.saved_sp;
            ctx.frames.truncate(base.frames);
            ctx.stack.truncate(sp);
        }
        trace!(exception = %exception, "exception left the run");
        Ok(Unwound::Uncaught(exception))
    }
}

fn push(ctx: &mut Context, value: Value, at: usize) -> Result<Step, VmError> {
    ctx.push(value, at)?;
    Ok(Step::Next)
}

fn exec_fetch_local(ctx: &mut Context, slot: u8, at: usize) -> Result<Step, VmError> {
    let value = ctx
        .frame(at)?
        .locals
        .lock()
        .get(slot as usize)
        .cloned()
        .ok_or(VmError::LocalOutOfRange { at, slot })?;
    if value.is_undef() {
        return Err(VmError::LocalUndefined { at, slot });
    }
    push(ctx, value, at)
}

fn exec_store_local(ctx: &mut Context, slot: u8, at: usize) -> Result<Step, VmError> {
    let locals = ctx.frame(at)?.locals.clone();
    if slot as usize >= locals.lock().len() {
        return Err(VmError::LocalOutOfRange { at, slot });
    }
    let value = ctx.pop(at)?;
    locals.lock()[slot as usize] = value;
    Ok(Step::Next)
}

fn exec_local_def_p(ctx: &mut Context, slot: u8, at: usize) -> Result<Step, VmError> {
    let defined = ctx
        .frame(at)?
        .locals
        .lock()
        .get(slot as usize)
        .map(|v| !v.is_undef())
        .ok_or(VmError::LocalOutOfRange { at, slot })?;
    push(ctx, Value::Bool(defined), at)
}

fn exec_def_local_func(ctx: &mut Context, slot: u8, at: usize) -> Result<Step, VmError> {
    let locals = ctx.frame(at)?.locals.clone();
    if slot as usize >= locals.lock().len() {
        return Err(VmError::LocalOutOfRange { at, slot });
    }
    let fun: Function = match ctx.pop(at)? {
        Value::Fun(fun) => fun,
        other => return Ok(Step::Raise(invalid_definition(&other))),
    };
    let current = locals.lock()[slot as usize].clone();
    let merged = define_overload(&current, fun, &format!("local {slot}"));
    locals.lock()[slot as usize] = merged;
    Ok(Step::Next)
}

fn exec_make_str(ctx: &mut Context, count: u16, at: usize) -> Result<Step, VmError> {
    let n = count as usize;
    if let Some(bad) = ctx.top(n, at)?.iter().find(|v| v.as_str().is_none()) {
        return Err(VmError::TypeMismatch {
            at,
            expected: "Str",
            found: bad.type_name(),
        });
    }
    let joined: String = ctx.pop_n(n, at)?.iter().filter_map(Value::as_str).collect();
    push(ctx, Value::str(&joined), at)
}

fn exec_make_hash(ctx: &mut Context, pairs: u16, at: usize) -> Result<Step, VmError> {
    let flat = ctx.pop_n(pairs as usize * 2, at)?;
    let mut entries = IndexMap::with_capacity(pairs as usize);
    for pair in flat.chunks_exact(2) {
        match HashKey::try_from(pair[0].clone()) {
            Ok(key) => {
                entries.insert(key, pair[1].clone());
            }
            Err(bad) => {
                return Ok(Step::Raise(Value::error(
                    "InvalidHashKey",
                    &[("found", Value::str(bad.type_name()))],
                )))
            }
        }
    }
    push(ctx, Value::hash(entries), at)
}

fn exec_try_end(ctx: &mut Context, base: RunBase, at: usize) -> Result<Step, VmError> {
    let depth = ctx.frames.len();
    let owned = ctx.handlers.len() > base.handlers
        && ctx.handlers.last().is_some_and(|h| h.frames == depth);
    if !owned {
        return Err(VmError::UnbalancedTry { at });
    }
    ctx.handlers.pop();
    Ok(Step::Next)
}
