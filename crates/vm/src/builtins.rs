//! Core natives installed at init.
//!
//! Just enough to exercise overload resolution: arithmetic and comparison
//! on Int, concatenation on Str and Arr, `len`, `push`, `throw`, `call`.

use std::sync::Arc;

use crate::call::{dispatch_error, Failure};
use crate::context::Context;
use crate::error::VmError;
use crate::function::{MethodResult, Native};
use crate::machine::Machine;
use crate::value::Value;

pub(crate) fn install(machine: &mut Machine) {
    machine.define_native(Native::pure("+", add_int));
    machine.define_native(Native::pure("+", concat_str));
    machine.define_native(Native::pure("+", concat_arr));
    machine.define_native(Native::pure("-", sub));
    machine.define_native(Native::pure("*", mul));
    machine.define_native(Native::pure("<", less));
    machine.define_native(Native::pure(">", greater));
    machine.define_native(Native::pure("==", equal));
    machine.define_native(Native::pure("len", len));
    machine.define_native(Native::pure("push", push));
    machine.define_native(Native::pure("throw", throw));
    machine.define_native(Native::with_context("call", call));
}

fn int_pair(args: &[Value]) -> Result<(i64, i64), MethodResult> {
    match args {
        [Value::Int(a), Value::Int(b)] => Ok((*a, *b)),
        [_, _] => Err(MethodResult::ImplMissing),
        _ => Err(MethodResult::ArgsMismatch),
    }
}

fn int_op(args: &[Value], op: fn(i64, i64) -> Value) -> MethodResult {
    match int_pair(args) {
        Ok((a, b)) => MethodResult::Ok(op(a, b)),
        Err(result) => result,
    }
}

fn add_int(args: &[Value]) -> MethodResult {
    int_op(args, |a, b| Value::Int(a.wrapping_add(b)))
}

fn sub(args: &[Value]) -> MethodResult {
    int_op(args, |a, b| Value::Int(a.wrapping_sub(b)))
}

fn mul(args: &[Value]) -> MethodResult {
    int_op(args, |a, b| Value::Int(a.wrapping_mul(b)))
}

fn less(args: &[Value]) -> MethodResult {
    int_op(args, |a, b| Value::Bool(a < b))
}

fn greater(args: &[Value]) -> MethodResult {
    int_op(args, |a, b| Value::Bool(a > b))
}

fn concat_str(args: &[Value]) -> MethodResult {
    match args {
        [Value::Str(a), Value::Str(b)] => {
            let joined: Arc<str> = Arc::from(format!("{a}{b}"));
            MethodResult::Ok(Value::Str(joined))
        }
        [_, _] => MethodResult::ImplMissing,
        _ => MethodResult::ArgsMismatch,
    }
}

fn concat_arr(args: &[Value]) -> MethodResult {
    match args {
        [Value::Arr(a), Value::Arr(b)] => {
            let mut items = a.lock().clone();
            let tail = b.lock().clone();
            items.extend(tail);
            MethodResult::Ok(Value::arr(items))
        }
        [_, _] => MethodResult::ImplMissing,
        _ => MethodResult::ArgsMismatch,
    }
}

fn equal(args: &[Value]) -> MethodResult {
    match args {
        [a, b] => MethodResult::Ok(Value::Bool(a == b)),
        _ => MethodResult::ArgsMismatch,
    }
}

fn len(args: &[Value]) -> MethodResult {
    let n = match args {
        [Value::Str(s)] => s.chars().count(),
        [Value::Arr(a)] => a.lock().len(),
        [Value::Hash(h)] => h.lock().len(),
        [_] => return MethodResult::ImplMissing,
        _ => return MethodResult::ArgsMismatch,
    };
    MethodResult::Ok(Value::Int(n as i64))
}

fn push(args: &[Value]) -> MethodResult {
    match args {
        [arr @ Value::Arr(items), value] => {
            items.lock().push(value.clone());
            MethodResult::Ok(arr.clone())
        }
        [_, _] => MethodResult::ImplMissing,
        _ => MethodResult::ArgsMismatch,
    }
}

fn throw(args: &[Value]) -> MethodResult {
    match args {
        [value] => MethodResult::Exception(value.clone()),
        _ => MethodResult::ArgsMismatch,
    }
}

/// `call(f, args...)`: call `f` with the remaining arguments.
fn call(machine: &mut Machine, ctx: &mut Context, args: &[Value]) -> Result<MethodResult, VmError> {
    let Some((callee, rest)) = args.split_first() else {
        return Ok(MethodResult::ArgsMismatch);
    };
    let result = machine.call_value(ctx, callee, rest)?;
    Ok(match (result, callee) {
        (MethodResult::ArgsMismatch, Value::Fun(fun)) => {
            MethodResult::Exception(dispatch_error(Failure::ArgsMismatch, fun))
        }
        (MethodResult::ImplMissing, Value::Fun(fun)) => {
            MethodResult::Exception(dispatch_error(Failure::ImplMissing, fun))
        }
        (other, _) => other,
    })
}
