//! Closure creation and captured-variable access.
//!
//! A closure captures the locals array of the frame that created it, plus
//! that frame's own scope chain. Upvalues are addressed by depth and slot:
//! depth 0 is the creating frame's locals, each further depth follows
//! `parent`. Locals arrays are shared, so stores through any path are seen
//! by every closure holding the same scope, after the frame returned too.

use std::sync::Arc;

use crate::context::{Context, Locals};
use crate::error::VmError;
use crate::execute::Step;
use crate::function::{define_overload, Closure, Function};
use crate::machine::Machine;
use crate::types::ValueTag;
use crate::value::Value;

/// One link of a closure's captured environment.
#[derive(Debug)]
pub struct Scope {
    pub locals: Locals,
    pub parent: Option<Arc<Scope>>,
}

impl Scope {
    /// The scope `depth` links up the chain.
    pub fn ancestor(&self, depth: u8) -> Option<&Scope> {
        let mut scope = self;
        for _ in 0..depth {
            scope = scope.parent.as_deref()?;
        }
        Some(scope)
    }
}

/// Exception raised when DEF_*_FUNC gets something that is not a function.
pub(crate) fn invalid_definition(found: &Value) -> Value {
    Value::error(
        "InvalidDefinition",
        &[("found", Value::str(found.type_name()))],
    )
}

/// Locals array holding upvar `depth:slot` of the current frame's scope.
fn upvar_locals(ctx: &Context, depth: u8, slot: u8, at: usize) -> Result<Locals, VmError> {
    let out_of_range = || VmError::UpvarOutOfRange { at, depth, slot };
    let scope = ctx.frame(at)?.scope.as_deref().ok_or_else(out_of_range)?;
    let target = scope.ancestor(depth).ok_or_else(out_of_range)?;
    if slot as usize >= target.locals.lock().len() {
        return Err(out_of_range());
    }
    Ok(target.locals.clone())
}

impl Machine {
    pub(crate) fn exec_make_closure(
        &mut self,
        ctx: &mut Context,
        offset: i16,
        params: u8,
        locals: u8,
        at: usize,
        next: usize,
    ) -> Result<Step, VmError> {
        if locals < params {
            return Err(VmError::InvalidClosure { at, params, locals });
        }
        let entry = self.jump_target(next, offset, at)?;
        let n = params as usize;
        let param_types = ctx
            .top(n, at)?
            .iter()
            .map(|v| match v {
                Value::Type(info) => Ok(info.tag),
                Value::Null => Ok(ValueTag::Any),
                other => Err(VmError::TypeMismatch {
                    at,
                    expected: "Type",
                    found: other.type_name(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        ctx.pop_n(n, at)?;

        let scope = ctx.frames.last().map(|frame| {
            Arc::new(Scope {
                locals: frame.locals.clone(),
                parent: frame.scope.clone(),
            })
        });
        let closure = Closure {
            entry,
            n_params: params,
            n_locals: locals,
            param_types,
            scope,
        };
        ctx.push(Value::Fun(Function::Closure(Arc::new(closure))), at)?;
        Ok(Step::Next)
    }

    pub(crate) fn exec_fetch_upvar(
        &mut self,
        ctx: &mut Context,
        depth: u8,
        slot: u8,
        at: usize,
    ) -> Result<Step, VmError> {
        let locals = upvar_locals(ctx, depth, slot, at)?;
        let value = locals.lock()[slot as usize].clone();
        if value.is_undef() {
            return Err(VmError::UpvarUndefined { at, depth, slot });
        }
        ctx.push(value, at)?;
        Ok(Step::Next)
    }

    pub(crate) fn exec_store_upvar(
        &mut self,
        ctx: &mut Context,
        depth: u8,
        slot: u8,
        at: usize,
    ) -> Result<Step, VmError> {
        let locals = upvar_locals(ctx, depth, slot, at)?;
        let value = ctx.pop(at)?;
        locals.lock()[slot as usize] = value;
        Ok(Step::Next)
    }

    pub(crate) fn exec_upvar_def_p(
        &mut self,
        ctx: &mut Context,
        depth: u8,
        slot: u8,
        at: usize,
    ) -> Result<Step, VmError> {
        let locals = upvar_locals(ctx, depth, slot, at)?;
        let defined = !locals.lock()[slot as usize].is_undef();
        ctx.push(Value::Bool(defined), at)?;
        Ok(Step::Next)
    }

    pub(crate) fn exec_def_upvar_func(
        &mut self,
        ctx: &mut Context,
        depth: u8,
        slot: u8,
        at: usize,
    ) -> Result<Step, VmError> {
        let locals = upvar_locals(ctx, depth, slot, at)?;
        let fun = match ctx.pop(at)? {
            Value::Fun(fun) => fun,
            other => return Ok(Step::Raise(invalid_definition(&other))),
        };
        let current = locals.lock()[slot as usize].clone();
        let merged = define_overload(&current, fun, &format!("upvar {depth}:{slot}"));
        locals.lock()[slot as usize] = merged;
        Ok(Step::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn locals(values: Vec<Value>) -> Locals {
        Arc::new(Mutex::new(values))
    }

    #[test]
    fn ancestor_walks_parents() {
        let outer = Arc::new(Scope {
            locals: locals(vec![Value::Int(1)]),
            parent: None,
        });
        let inner = Scope {
            locals: locals(vec![Value::Int(2)]),
            parent: Some(outer),
        };
        let at0 = inner.ancestor(0).unwrap();
        assert_eq!(at0.locals.lock()[0], Value::Int(2));
        let at1 = inner.ancestor(1).unwrap();
        assert_eq!(at1.locals.lock()[0], Value::Int(1));
        assert!(inner.ancestor(2).is_none());
    }

    #[test]
    fn shared_locals_see_each_others_stores() {
        let cell = locals(vec![Value::Int(0)]);
        let a = Scope {
            locals: cell.clone(),
            parent: None,
        };
        let b = Scope {
            locals: cell,
            parent: None,
        };
        a.locals.lock()[0] = Value::Int(9);
        assert_eq!(b.locals.lock()[0], Value::Int(9));
    }

    #[test]
    fn invalid_definition_names_the_type() {
        let e = invalid_definition(&Value::Int(3));
        assert_eq!(e.get_field("type"), Some(Value::str("InvalidDefinition")));
        assert_eq!(e.get_field("found"), Some(Value::str("Int")));
    }
}
