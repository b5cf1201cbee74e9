//! Integration tests for the ngvm interpreter.
//!
//! Programs are built with a small helper that keeps the linking section
//! at the end of the unit: entry jumps to it, it resolves and patches every
//! global reference, runs INIT_DONE and jumps back to `main`.

use std::sync::Arc;
use std::thread;

use ngvm_common::{Instruction, Label, Opcode, Program, ProgramBuilder};
use ngvm_vm::{
    context_init, Context, Machine, MethodResult, Native, Outcome, Phase, Value, Vm, VmError,
    MAX_FRAMES, MAX_STACK,
};
use proptest::prelude::*;

// ============================================================
// Helpers
// ============================================================

/// Offset of `main` in a unit starting at 0: just after the first JMP.
const MAIN: usize = 3;

struct Script {
    b: ProgramBuilder,
    main: Label,
    link: Label,
    links: Vec<(String, Label)>,
}

impl Script {
    fn new() -> Self {
        Self::with_origin(0)
    }

    fn with_origin(origin: usize) -> Self {
        let mut b = ProgramBuilder::with_origin(origin);
        let link = b.label();
        b.jump(Opcode::Jmp, link);
        let main = b.here();
        Self {
            b,
            main,
            link,
            links: Vec::new(),
        }
    }

    fn op(&mut self, instr: Instruction) -> &mut Self {
        self.b.emit(instr);
        self
    }

    fn int(&mut self, n: i64) -> &mut Self {
        self.op(Instruction::PushInt(n))
    }

    fn string(&mut self, s: &str) -> &mut Self {
        self.op(Instruction::PushLStr(s.to_owned()))
    }

    /// Emit a global-index instruction whose operand is patched at link time.
    fn global(&mut self, op: Opcode, name: &str) -> &mut Self {
        let site = self.b.here();
        let instr = match op {
            Opcode::FetchGlobal => Instruction::FetchGlobal(0),
            Opcode::StoreGlobal => Instruction::StoreGlobal(0),
            Opcode::GlobalDefP => Instruction::GlobalDefP(0),
            Opcode::DefGlobalFunc => Instruction::DefGlobalFunc(0),
            other => panic!("{other:?} has no global operand"),
        };
        self.b.emit(instr);
        self.links.push((name.to_owned(), site));
        self
    }

    fn fetch(&mut self, name: &str) -> &mut Self {
        self.global(Opcode::FetchGlobal, name)
    }

    fn call(&mut self, name: &str, n_args: u8) -> &mut Self {
        self.fetch(name).op(Instruction::Call(n_args))
    }

    fn label(&mut self) -> Label {
        self.b.label()
    }

    fn bind(&mut self, label: Label) -> &mut Self {
        self.b.bind(label);
        self
    }

    fn jump(&mut self, op: Opcode, target: Label) -> &mut Self {
        self.b.jump(op, target);
        self
    }

    /// MAKE_CLOSURE with every parameter untyped.
    fn closure(&mut self, entry: Label, params: u8, locals: u8) -> &mut Self {
        for _ in 0..params {
            self.b.emit(Instruction::PushNull);
        }
        self.b.closure(entry, params, locals);
        self
    }

    fn finish(mut self) -> Program {
        self.b.bind(self.link);
        for (name, site) in &self.links {
            self.b.link(name, *site);
        }
        self.b.emit(Instruction::InitDone);
        self.b.jump(Opcode::Jmp, self.main);
        self.b.finish().unwrap()
    }
}

fn run_program(program: &Program) -> (Result<Outcome, VmError>, Context) {
    let vm = Vm::init(["test"]);
    vm.load(program.as_bytes());
    let mut ctx = context_init();
    let result = vm.run(&mut ctx, 0);
    (result, ctx)
}

fn run(script: Script) -> Result<Outcome, VmError> {
    run_program(&script.finish()).0
}

fn run_raw(instructions: &[Instruction]) -> Result<Outcome, VmError> {
    run_program(&Program::from_instructions(instructions).unwrap()).0
}

fn ok(value: Value) -> Result<Outcome, VmError> {
    Ok(Outcome::Ok(value))
}

fn exception_type(result: &Result<Outcome, VmError>) -> Option<Value> {
    match result {
        Ok(Outcome::Exception(e)) => e.get_field("type"),
        _ => None,
    }
}

// ============================================================
// End to end
// ============================================================

#[test]
fn two_plus_three() {
    let mut s = Script::new();
    s.int(2).int(3).call("+", 2).op(Instruction::Halt);
    assert_eq!(run(s), ok(Value::Int(5)));
}

#[test]
fn zero_argument_function_returns_one_plus_one() {
    let mut s = Script::new();
    let f = s.label();
    s.closure(f, 0, 0)
        .global(Opcode::DefGlobalFunc, "f")
        .call("f", 0)
        .op(Instruction::Halt);
    s.bind(f).int(1).int(1).call("+", 2).op(Instruction::Ret);
    assert_eq!(run(s), ok(Value::Int(2)));
}

fn parity(start: i64, entry_name: &str) -> Script {
    let mut s = Script::new();
    let odd = s.label();
    let even = s.label();

    // is_odd is defined first and refers to is_even before it exists.
    s.closure(odd, 1, 1)
        .global(Opcode::DefGlobalFunc, "is_odd")
        .closure(even, 1, 1)
        .global(Opcode::DefGlobalFunc, "is_even")
        .int(start)
        .call(entry_name, 1)
        .op(Instruction::Halt);

    for (body, base, other) in [(odd, false, "is_even"), (even, true, "is_odd")] {
        let recurse = s.label();
        s.bind(body)
            .op(Instruction::FetchLocal(0))
            .int(0)
            .call("==", 2)
            .jump(Opcode::JmpFalse, recurse)
            .op(if base {
                Instruction::PushTrue
            } else {
                Instruction::PushFalse
            })
            .op(Instruction::Ret);
        s.bind(recurse)
            .op(Instruction::FetchLocal(0))
            .int(1)
            .call("-", 2)
            .call(other, 1)
            .op(Instruction::Ret);
    }
    s
}

#[test]
fn mutual_recursion_defined_in_reverse_order() {
    assert_eq!(run(parity(10, "is_even")), ok(Value::Bool(true)));
    assert_eq!(run(parity(7, "is_odd")), ok(Value::Bool(true)));
    assert_eq!(run(parity(7, "is_even")), ok(Value::Bool(false)));
}

#[test]
fn patched_operands_match_resolve_global() {
    let mut s = Script::new();
    s.int(7)
        .global(Opcode::StoreGlobal, "answer")
        .fetch("answer")
        .op(Instruction::Halt);
    let program = s.finish();

    let vm = Vm::init(["test"]);
    vm.load(program.as_bytes());
    let mut ctx = context_init();
    assert_eq!(vm.run(&mut ctx, 0), ok(Value::Int(7)));
    let index = vm.check_global("answer").unwrap();
    assert_eq!(vm.resolve_global("answer"), index);
    assert_eq!(vm.global("answer"), Some(Value::Int(7)));
}

// ============================================================
// Closures and upvalues
// ============================================================

#[test]
fn closures_share_captured_variables_after_return() {
    let mut s = Script::new();
    let make = s.label();
    let inc = s.label();
    let get = s.label();

    s.closure(make, 0, 1)
        .op(Instruction::Call(0))
        .op(Instruction::Pop)
        .call("inc", 0)
        .op(Instruction::Pop)
        .call("inc", 0)
        .op(Instruction::Pop)
        .call("get", 0)
        .op(Instruction::Halt);

    // make: count = 0; define inc and get over it; return null.
    s.bind(make)
        .int(0)
        .op(Instruction::StoreLocal(0))
        .closure(inc, 0, 0)
        .global(Opcode::StoreGlobal, "inc")
        .closure(get, 0, 0)
        .global(Opcode::StoreGlobal, "get")
        .op(Instruction::PushNull)
        .op(Instruction::Ret);
    s.bind(inc)
        .op(Instruction::FetchUpvar { depth: 0, slot: 0 })
        .int(1)
        .call("+", 2)
        .op(Instruction::Dup)
        .op(Instruction::StoreUpvar { depth: 0, slot: 0 })
        .op(Instruction::Ret);
    s.bind(get)
        .op(Instruction::FetchUpvar { depth: 0, slot: 0 })
        .op(Instruction::Ret);

    assert_eq!(run(s), ok(Value::Int(2)));
}

#[test]
fn upvar_depth_walks_enclosing_scopes() {
    let mut s = Script::new();
    let outer = s.label();
    let middle = s.label();
    let inner = s.label();

    s.closure(outer, 0, 1)
        .op(Instruction::Call(0))
        .op(Instruction::Halt);
    s.bind(outer)
        .int(10)
        .op(Instruction::StoreLocal(0))
        .closure(middle, 0, 0)
        .op(Instruction::Call(0))
        .op(Instruction::Ret);
    s.bind(middle)
        .closure(inner, 0, 0)
        .op(Instruction::Call(0))
        .op(Instruction::Ret);
    s.bind(inner)
        .op(Instruction::FetchUpvar { depth: 1, slot: 0 })
        .op(Instruction::Ret);

    assert_eq!(run(s), ok(Value::Int(10)));
}

#[test]
fn upvar_out_of_range_is_fatal() {
    let mut s = Script::new();
    let body = s.label();
    s.closure(body, 0, 0)
        .op(Instruction::Call(0))
        .op(Instruction::Halt);
    s.bind(body)
        .op(Instruction::FetchUpvar { depth: 0, slot: 0 })
        .op(Instruction::Ret);
    assert!(matches!(
        run(s),
        Err(VmError::UpvarOutOfRange {
            depth: 0,
            slot: 0,
            ..
        })
    ));
}

#[test]
fn local_functions_and_definedness() {
    let mut s = Script::new();
    let body = s.label();
    let k = s.label();
    s.closure(body, 0, 1)
        .op(Instruction::Call(0))
        .op(Instruction::MakeArr(1))
        .op(Instruction::Halt);
    s.bind(body)
        .op(Instruction::LocalDefP(0))
        .closure(k, 0, 0)
        .op(Instruction::DefLocalFunc(0))
        .op(Instruction::LocalDefP(0))
        .op(Instruction::FetchLocal(0))
        .op(Instruction::Call(0))
        .op(Instruction::MakeArr(3))
        .op(Instruction::Ret);
    s.bind(k).int(3).op(Instruction::Ret);

    let expected = Value::arr(vec![Value::arr(vec![
        Value::Bool(false),
        Value::Bool(true),
        Value::Int(3),
    ])]);
    assert_eq!(run(s), ok(expected));
}

#[test]
fn undefined_local_is_fatal() {
    let mut s = Script::new();
    let body = s.label();
    s.closure(body, 0, 1)
        .op(Instruction::Call(0))
        .op(Instruction::Halt);
    s.bind(body)
        .op(Instruction::FetchLocal(0))
        .op(Instruction::Ret);
    assert!(matches!(
        run(s),
        Err(VmError::LocalUndefined { slot: 0, .. })
    ));
}

#[test]
fn local_at_top_level_has_no_frame() {
    assert_eq!(
        run_raw(&[Instruction::FetchLocal(0)]),
        Err(VmError::NoActiveFrame { at: 0 })
    );
}

// ============================================================
// Overflow
// ============================================================

#[test]
fn stack_overflow_leaves_stack_full() {
    let mut s = Script::new();
    let top = s.label();
    s.bind(top)
        .op(Instruction::PushNull)
        .jump(Opcode::Jmp, top);
    let (result, ctx) = run_program(&s.finish());
    assert_eq!(result, Err(VmError::StackOverflow { at: MAIN }));
    assert_eq!(ctx.sp(), MAX_STACK);
}

#[test]
fn frame_overflow_leaves_frames_intact() {
    let mut s = Script::new();
    let f = s.label();
    // MAKE_CLOSURE 3..8, STORE_GLOBAL 8..11, FETCH_GLOBAL 11..14, CALL 14..16, HALT 16
    s.closure(f, 0, 0)
        .global(Opcode::StoreGlobal, "f")
        .call("f", 0)
        .op(Instruction::Halt);
    // FETCH_GLOBAL 17..20, CALL 20..22
    s.bind(f).call("f", 0).op(Instruction::Ret);

    let (result, ctx) = run_program(&s.finish());
    assert_eq!(result, Err(VmError::FrameOverflow { at: 20 }));
    assert_eq!(ctx.depth(), MAX_FRAMES);
    assert_eq!(ctx.sp(), 1, "callee must still be on the stack");
}

/// Loop on `instr` until it overflows. Returns the offset of `instr`.
fn overflow_loop(s: &mut Script, instr: Instruction) -> usize {
    let top = s.b.here();
    let at = s.b.offset();
    s.op(instr).jump(Opcode::Jmp, top);
    at
}

fn assert_overflows_at(s: Script, at: usize, what: &str) {
    let (result, ctx) = run_program(&s.finish());
    assert_eq!(result, Err(VmError::StackOverflow { at }), "{what}");
    assert_eq!(ctx.sp(), MAX_STACK, "{what}");
}

#[test]
fn every_pushing_opcode_overflows_at_capacity() {
    let literals = [
        Instruction::PushNull,
        Instruction::PushFalse,
        Instruction::PushTrue,
        Instruction::PushUndef,
        Instruction::PushInt(7),
        Instruction::PushLStr("x".into()),
        Instruction::PushEmptyStr,
        Instruction::MakeArr(0),
        Instruction::MakeHash(0),
    ];
    for instr in literals {
        let what = format!("{instr:?}");
        let mut s = Script::new();
        let at = overflow_loop(&mut s, instr);
        assert_overflows_at(s, at, &what);
    }

    let mut s = Script::new();
    s.op(Instruction::PushNull);
    let at = overflow_loop(&mut s, Instruction::Dup);
    assert_overflows_at(s, at, "DUP");

    let mut s = Script::new();
    let top = s.label();
    s.bind(top);
    let at = s.b.offset();
    s.fetch("ARGC").jump(Opcode::Jmp, top);
    assert_overflows_at(s, at, "FETCH_GLOBAL");

    let mut s = Script::new();
    let top = s.label();
    s.bind(top);
    let at = s.b.offset();
    s.global(Opcode::GlobalDefP, "ARGC").jump(Opcode::Jmp, top);
    assert_overflows_at(s, at, "GLOBAL_DEF_P");

    let mut s = Script::new();
    let entry = s.label();
    let top = s.label();
    s.bind(top);
    let at = s.b.offset();
    s.closure(entry, 0, 0).jump(Opcode::Jmp, top);
    s.bind(entry).op(Instruction::Ret);
    assert_overflows_at(s, at, "MAKE_CLOSURE");
}

#[test]
fn frame_and_upvar_reads_overflow_at_capacity() {
    for instr in [Instruction::FetchLocal(0), Instruction::LocalDefP(0)] {
        let what = format!("{instr:?}");
        let mut s = Script::new();
        let body = s.label();
        s.int(5)
            .closure(body, 1, 1)
            .op(Instruction::Call(1))
            .op(Instruction::Halt);
        s.bind(body);
        let at = overflow_loop(&mut s, instr);
        assert_overflows_at(s, at, &what);
    }

    for instr in [
        Instruction::FetchUpvar { depth: 0, slot: 0 },
        Instruction::UpvarDefP { depth: 0, slot: 0 },
    ] {
        let what = format!("{instr:?}");
        let mut s = Script::new();
        let outer = s.label();
        let inner = s.label();
        s.int(5)
            .closure(outer, 1, 1)
            .op(Instruction::Call(1))
            .op(Instruction::Halt);
        s.bind(outer)
            .closure(inner, 0, 0)
            .op(Instruction::Call(0))
            .op(Instruction::Ret);
        s.bind(inner);
        let at = overflow_loop(&mut s, instr);
        assert_overflows_at(s, at, &what);
    }
}

#[test]
fn handler_installed_on_a_full_stack_still_catches() {
    let mut s = Script::new();
    let catch = s.label();
    for _ in 0..MAX_STACK - 1 {
        s.op(Instruction::PushNull);
    }
    s.string("boom")
        .jump(Opcode::TryStart, catch)
        .op(Instruction::Throw)
        .op(Instruction::Halt);
    s.bind(catch).op(Instruction::Halt);
    let (result, ctx) = run_program(&s.finish());
    assert_eq!(result, ok(Value::str("boom")));
    assert_eq!(ctx.sp(), MAX_STACK - 1);
    assert_eq!(ctx.handler_count(), 0);
}

#[test]
fn overflow_inside_a_try_block_is_fatal_not_caught() {
    let mut s = Script::new();
    let catch = s.label();
    s.jump(Opcode::TryStart, catch);
    let at = overflow_loop(&mut s, Instruction::PushNull);
    s.bind(catch).op(Instruction::Halt);
    assert_overflows_at(s, at, "PUSH_NULL under a handler");
}

// ============================================================
// Exceptions
// ============================================================

#[test]
fn throw_is_caught_and_stack_restored() {
    let mut s = Script::new();
    let catch = s.label();
    s.jump(Opcode::TryStart, catch)
        .int(1)
        .int(5)
        .op(Instruction::Throw)
        .int(99)
        .op(Instruction::Halt);
    s.bind(catch).op(Instruction::Halt);
    let (result, ctx) = run_program(&s.finish());
    assert_eq!(result, ok(Value::Int(5)));
    assert_eq!(ctx.sp(), 0);
    assert_eq!(ctx.handler_count(), 0);
}

#[test]
fn handler_catches_exception_from_nested_frame() {
    let mut s = Script::new();
    let catch = s.label();
    let body = s.label();
    s.jump(Opcode::TryStart, catch)
        .closure(body, 0, 0)
        .op(Instruction::Call(0))
        .op(Instruction::Halt);
    s.bind(catch).op(Instruction::Halt);
    s.bind(body)
        .int(7)
        .call("throw", 1)
        .op(Instruction::Ret);
    let (result, ctx) = run_program(&s.finish());
    assert_eq!(result, ok(Value::Int(7)));
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn uncaught_exception_unwinds_every_frame() {
    let mut s = Script::new();
    let body = s.label();
    s.int(1)
        .closure(body, 0, 0)
        .op(Instruction::Call(0))
        .op(Instruction::Halt);
    s.bind(body).string("boom").op(Instruction::Throw);
    let (result, ctx) = run_program(&s.finish());
    assert_eq!(result, Ok(Outcome::Exception(Value::str("boom"))));
    assert_eq!(ctx.depth(), 0);
    assert_eq!(ctx.sp(), 1);
}

#[test]
fn try_end_removes_handler() {
    let mut s = Script::new();
    let catch = s.label();
    s.jump(Opcode::TryStart, catch)
        .op(Instruction::TryEnd)
        .int(3)
        .op(Instruction::Throw);
    s.bind(catch).op(Instruction::Halt);
    assert_eq!(run(s), Ok(Outcome::Exception(Value::Int(3))));
}

#[test]
fn try_end_without_handler_is_fatal() {
    assert_eq!(
        run_raw(&[Instruction::TryEnd]),
        Err(VmError::UnbalancedTry { at: 0 })
    );
}

#[test]
fn calling_a_non_function_raises() {
    let mut s = Script::new();
    s.int(1).op(Instruction::Call(0)).op(Instruction::Halt);
    assert_eq!(exception_type(&run(s)), Some(Value::str("NotCallable")));
}

#[test]
fn unhashable_key_raises() {
    let mut s = Script::new();
    s.op(Instruction::MakeArr(0))
        .int(1)
        .op(Instruction::MakeHash(1))
        .op(Instruction::Halt);
    assert_eq!(exception_type(&run(s)), Some(Value::str("InvalidHashKey")));
}

#[test]
fn defining_a_non_function_raises() {
    let mut s = Script::new();
    s.int(1)
        .global(Opcode::DefGlobalFunc, "f")
        .op(Instruction::Halt);
    assert_eq!(
        exception_type(&run(s)),
        Some(Value::str("InvalidDefinition"))
    );
}

// ============================================================
// Dispatch
// ============================================================

/// `describe` with one overload for Int and one for Str.
fn describe(arg: Instruction) -> Script {
    let mut s = Script::new();
    let int_body = s.label();
    let str_body = s.label();
    s.fetch("Int");
    s.b.closure(int_body, 1, 1);
    s.global(Opcode::DefGlobalFunc, "describe").fetch("Str");
    s.b.closure(str_body, 1, 1);
    s.global(Opcode::DefGlobalFunc, "describe")
        .op(arg)
        .call("describe", 1)
        .op(Instruction::Halt);
    s.bind(int_body).string("int").op(Instruction::Ret);
    s.bind(str_body).string("str").op(Instruction::Ret);
    s
}

#[test]
fn overloads_fall_through_args_mismatch() {
    assert_eq!(run(describe(Instruction::PushInt(4))), ok(Value::str("int")));
    assert_eq!(
        run(describe(Instruction::PushLStr("x".into()))),
        ok(Value::str("str"))
    );
}

#[test]
fn no_matching_overload_raises_args_mismatch() {
    let result = run(describe(Instruction::PushTrue));
    let Ok(Outcome::Exception(e)) = result else {
        panic!("expected exception, got {result:?}");
    };
    assert_eq!(e.get_field("type"), Some(Value::str("ArgsMismatch")));
    assert_eq!(e.get_field("callee"), Some(Value::str("describe")));
}

#[test]
fn native_impl_missing_raises() {
    let mut s = Script::new();
    s.string("a").int(1).call("+", 2).op(Instruction::Halt);
    let result = run(s);
    assert_eq!(exception_type(&result), Some(Value::str("ImplMissing")));
}

#[test]
fn string_and_array_overloads_of_plus() {
    let mut s = Script::new();
    s.string("ab").string("cd").call("+", 2).op(Instruction::Halt);
    assert_eq!(run(s), ok(Value::str("abcd")));
}

fn answer(_: &[Value]) -> MethodResult {
    MethodResult::Ok(Value::Int(42))
}

#[test]
fn host_registered_native() {
    let vm = Vm::init(["test"]);
    vm.register_native(Native::pure("answer", answer));
    let mut s = Script::new();
    s.call("answer", 0).op(Instruction::Halt);
    vm.load(s.finish().as_bytes());
    let mut ctx = context_init();
    assert_eq!(vm.run(&mut ctx, 0), ok(Value::Int(42)));
}

#[test]
fn call_native_reenters_the_interpreter() {
    let mut s = Script::new();
    let double = s.label();
    s.closure(double, 1, 1)
        .int(21)
        .call("call", 2)
        .op(Instruction::Halt);
    s.bind(double)
        .op(Instruction::FetchLocal(0))
        .op(Instruction::FetchLocal(0))
        .call("+", 2)
        .op(Instruction::Ret);
    let (result, ctx) = run_program(&s.finish());
    assert_eq!(result, ok(Value::Int(42)));
    assert_eq!((ctx.sp(), ctx.depth()), (0, 0));
}

#[test]
fn exception_inside_reentered_call_propagates() {
    let mut s = Script::new();
    let body = s.label();
    s.closure(body, 0, 0)
        .call("call", 1)
        .op(Instruction::Halt);
    s.bind(body).int(8).op(Instruction::Throw);
    assert_eq!(run(s), Ok(Outcome::Exception(Value::Int(8))));
}

#[test]
fn halt_inside_reentered_call_is_fatal() {
    let mut s = Script::new();
    let body = s.label();
    s.closure(body, 0, 0)
        .call("call", 1)
        .op(Instruction::Halt);
    s.bind(body).int(1).op(Instruction::Halt);
    assert!(matches!(run(s), Err(VmError::UnexpectedHalt { .. })));
}

// ============================================================
// Values and coercions
// ============================================================

#[test]
fn make_hash_preserves_order() {
    let mut s = Script::new();
    s.string("a")
        .int(1)
        .string("b")
        .int(2)
        .op(Instruction::MakeHash(2))
        .op(Instruction::Halt);
    let Ok(Outcome::Ok(hash)) = run(s) else {
        panic!("expected a hash");
    };
    assert_eq!(hash.get_field("a"), Some(Value::Int(1)));
    assert_eq!(hash.to_string(), "{\"a\": 1, \"b\": 2}");
}

// ============================================================
// Cyclic values
// ============================================================

/// Leaves one array on the stack that contains itself.
fn self_containing_array(s: &mut Script) -> &mut Script {
    s.op(Instruction::MakeArr(0))
        .op(Instruction::Dup)
        .op(Instruction::Dup)
        .call("push", 2)
        .op(Instruction::Pop)
}

#[test]
fn to_str_of_self_containing_array() {
    let mut s = Script::new();
    self_containing_array(&mut s)
        .op(Instruction::ToStr)
        .op(Instruction::Halt);
    assert_eq!(run(s), ok(Value::str("[[...]]")));
}

#[test]
fn equality_of_self_containing_arrays() {
    let mut s = Script::new();
    self_containing_array(&mut s);
    self_containing_array(&mut s)
        .call("==", 2)
        .op(Instruction::Halt);
    assert_eq!(run(s), ok(Value::Bool(true)));
}

#[test]
fn self_containing_array_as_result_and_exception() {
    let mut s = Script::new();
    self_containing_array(&mut s).op(Instruction::Halt);
    let Ok(Outcome::Ok(value)) = run(s) else {
        panic!("expected a value");
    };
    assert_eq!(value.to_string(), "[[...]]");

    let mut s = Script::new();
    self_containing_array(&mut s).op(Instruction::Throw);
    let Ok(Outcome::Exception(value)) = run(s) else {
        panic!("expected an exception");
    };
    assert_eq!(value.to_string(), "[[...]]");
}

#[test]
fn run_after_cyclic_display_does_not_block_other_contexts() {
    let vm = Arc::new(Vm::init(["test"]));
    let mut s = Script::new();
    self_containing_array(&mut s)
        .op(Instruction::ToStr)
        .op(Instruction::Halt);
    vm.load(s.finish().as_bytes());
    assert_eq!(vm.run(&mut context_init(), 0), ok(Value::str("[[...]]")));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let vm = Arc::clone(&vm);
            thread::spawn(move || vm.run(&mut context_init(), MAIN))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), ok(Value::str("[[...]]")));
    }
}

// ============================================================
// Phases
// ============================================================

fn phase_name(machine: &mut Machine, _: &mut Context, _: &[Value]) -> Result<MethodResult, VmError> {
    Ok(MethodResult::Ok(Value::str(&format!("{:?}", machine.phase()))))
}

#[test]
fn init_done_enters_running_for_the_rest_of_the_run() {
    let vm = Vm::init(["test"]);
    vm.register_native(Native::with_context("phase_name", phase_name));
    let mut s = Script::new();
    s.call("phase_name", 0).op(Instruction::Halt);
    vm.load(s.finish().as_bytes());
    assert_eq!(vm.phase(), Phase::Linking);

    let mut ctx = context_init();
    assert_eq!(vm.run(&mut ctx, 0), ok(Value::str("Running")));
    assert_eq!(vm.phase(), Phase::Ready);
}

#[test]
fn make_str_and_to_str() {
    let mut s = Script::new();
    s.string("n=")
        .int(5)
        .op(Instruction::ToStr)
        .op(Instruction::MakeStr(2))
        .op(Instruction::Halt);
    assert_eq!(run(s), ok(Value::str("n=5")));
}

#[test]
fn make_str_rejects_non_strings() {
    assert!(matches!(
        run_raw(&[
            Instruction::PushInt(1),
            Instruction::MakeStr(1),
            Instruction::Halt
        ]),
        Err(VmError::TypeMismatch {
            expected: "Str",
            found: "Int",
            ..
        })
    ));
}

#[test]
fn empty_string_is_falsy() {
    let mut s = Script::new();
    s.op(Instruction::PushEmptyStr)
        .op(Instruction::ToBool)
        .op(Instruction::Halt);
    assert_eq!(run(s), ok(Value::Bool(false)));
}

#[test]
fn conditional_jump() {
    let mut s = Script::new();
    let other = s.label();
    s.int(0)
        .jump(Opcode::JmpFalse, other)
        .int(1)
        .op(Instruction::Halt);
    s.bind(other).int(2).op(Instruction::Halt);
    assert_eq!(run(s), ok(Value::Int(2)));
}

#[test]
fn argv_and_argc_are_globals() {
    let mut s = Script::new();
    s.fetch("ARGV")
        .fetch("ARGC")
        .op(Instruction::MakeArr(2))
        .op(Instruction::Halt);
    let expected = Value::arr(vec![Value::arr(vec![Value::str("test")]), Value::Int(1)]);
    assert_eq!(run(s), ok(expected));
}

#[test]
fn global_definedness() {
    let mut s = Script::new();
    s.global(Opcode::GlobalDefP, "nothing_here")
        .global(Opcode::GlobalDefP, "ARGC")
        .op(Instruction::MakeArr(2))
        .op(Instruction::Halt);
    assert_eq!(
        run(s),
        ok(Value::arr(vec![Value::Bool(false), Value::Bool(true)]))
    );
}

// ============================================================
// Linking and fatal errors
// ============================================================

#[test]
fn undefined_global_is_reported_at_use() {
    let mut s = Script::new();
    s.fetch("missing").op(Instruction::Halt);
    assert_eq!(
        run(s),
        Err(VmError::GlobalUndefined {
            at: MAIN,
            name: "missing".into()
        })
    );
}

#[test]
fn patch_after_init_done_is_fatal() {
    assert_eq!(
        run_raw(&[
            Instruction::InitDone,
            Instruction::PushInt(0),
            Instruction::Patch(14),
            Instruction::FetchGlobal(0),
        ]),
        Err(VmError::PatchAfterLink { at: 10 })
    );
}

#[test]
fn patch_must_target_a_global_operand() {
    assert_eq!(
        run_raw(&[Instruction::PushInt(0), Instruction::Patch(1)]),
        Err(VmError::InvalidPatch { at: 9, target: 1 })
    );
}

#[test]
fn patch_index_must_fit() {
    assert_eq!(
        run_raw(&[
            Instruction::PushInt(70_000),
            Instruction::Patch(13),
            Instruction::FetchGlobal(0),
        ]),
        Err(VmError::InvalidPatch { at: 9, target: 13 })
    );
}

#[test]
fn resolve_global_needs_a_string() {
    assert_eq!(
        run_raw(&[Instruction::PushInt(1), Instruction::ResolveGlobal]),
        Err(VmError::TypeMismatch {
            at: 9,
            expected: "Str",
            found: "Int"
        })
    );
}

#[test]
fn malformed_streams_are_fatal() {
    let cases: Vec<(Vec<u8>, VmError)> = vec![
        (vec![], VmError::IpOutOfRange { at: 0 }),
        (vec![0], VmError::HaltWithEmptyStack { at: 0 }),
        (vec![200], VmError::InvalidOpcode { at: 0, byte: 200 }),
        (vec![1], VmError::IpOutOfRange { at: 1 }),
        (
            vec![5, 1, 2],
            VmError::TruncatedOperand {
                at: 0,
                opcode: "PUSH_INT",
            },
        ),
        (vec![6, 1, 0xFF], VmError::InvalidString { at: 0 }),
        (vec![18, 100, 0], VmError::JumpOutOfRange { at: 0, offset: 100 }),
        (
            vec![22, 0, 0, 2, 1],
            VmError::InvalidClosure {
                at: 0,
                params: 2,
                locals: 1,
            },
        ),
    ];
    for (bytes, expected) in cases {
        let result = run_program(&Program::new(bytes.clone())).0;
        assert_eq!(result, Err(expected), "bytes {bytes:?}");
    }
}

#[test]
fn fatal_error_leaves_vm_usable() {
    let vm = Vm::init(["test"]);
    let mut bad = Script::new();
    bad.fetch("missing").op(Instruction::Halt);
    vm.load(bad.finish().as_bytes());
    let mut ctx = context_init();
    assert!(vm.run(&mut ctx, 0).is_err());
    assert_eq!(vm.phase(), Phase::Ready);

    let entry = vm.program_len();
    let mut good = Script::with_origin(entry);
    good.int(4).op(Instruction::Halt);
    vm.load(good.finish().as_bytes());
    ctx.reset();
    assert_eq!(vm.run(&mut ctx, entry), ok(Value::Int(4)));
}

#[test]
fn later_units_link_against_earlier_globals() {
    let vm = Vm::init(["test"]);

    let mut first = Script::new();
    let double = first.label();
    first
        .closure(double, 1, 1)
        .global(Opcode::StoreGlobal, "double")
        .op(Instruction::PushNull)
        .op(Instruction::Halt);
    first
        .bind(double)
        .op(Instruction::FetchLocal(0))
        .op(Instruction::FetchLocal(0))
        .call("+", 2)
        .op(Instruction::Ret);
    vm.load(first.finish().as_bytes());
    assert_eq!(vm.phase(), Phase::Linking);
    let mut ctx = context_init();
    assert_eq!(vm.run(&mut ctx, 0), ok(Value::Null));
    assert_eq!(vm.phase(), Phase::Ready);

    let entry = vm.program_len();
    let mut second = Script::with_origin(entry);
    second.int(21).call("double", 1).op(Instruction::Halt);
    let bytes = second.finish().into_bytes();
    assert_eq!(vm.load(&bytes), bytes.len());
    assert_eq!(vm.phase(), Phase::Linking);
    assert_eq!(vm.run(&mut ctx, entry), ok(Value::Int(42)));
}

// ============================================================
// Concurrency
// ============================================================

#[test]
fn contexts_on_many_threads_share_one_vm() {
    let vm = Arc::new(Vm::init(["test"]));
    let mut s = Script::new();
    s.int(2).int(3).call("+", 2).op(Instruction::Halt);
    vm.load(s.finish().as_bytes());
    let mut ctx = context_init();
    assert_eq!(vm.run(&mut ctx, 0), ok(Value::Int(5)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let vm = Arc::clone(&vm);
            thread::spawn(move || {
                let mut ctx = context_init();
                vm.run(&mut ctx, MAIN)
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), ok(Value::Int(5)));
    }
}

// ============================================================
// Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Balanced calls leave everything below the arguments untouched.
    #[test]
    fn balanced_calls_preserve_stack_height(below in 0usize..20, calls in 0usize..30) {
        let mut s = Script::new();
        let id = s.label();
        for i in 0..below {
            s.int(i as i64);
        }
        s.closure(id, 1, 1).global(Opcode::StoreGlobal, "id");
        for i in 0..calls {
            s.int(i as i64).call("id", 1).op(Instruction::Pop);
        }
        s.int(7).call("id", 1).op(Instruction::Halt);
        s.bind(id).op(Instruction::FetchLocal(0)).op(Instruction::Ret);

        let (result, ctx) = run_program(&s.finish());
        prop_assert_eq!(result, ok(Value::Int(7)));
        prop_assert_eq!(ctx.sp(), below);
        prop_assert_eq!(ctx.depth(), 0);
    }

    /// Pushing past capacity is always the fatal overflow.
    #[test]
    fn push_count_decides_overflow(n in 1usize..1100) {
        let mut instrs = vec![Instruction::PushNull; n];
        instrs.push(Instruction::Halt);
        let result = run_raw(&instrs);
        if n <= MAX_STACK {
            prop_assert_eq!(result, ok(Value::Null));
        } else {
            prop_assert_eq!(result, Err(VmError::StackOverflow { at: MAX_STACK }));
        }
    }

    /// Arbitrary bytes end in some outcome or a fatal error, never a panic.
    /// Jump and TRY_START opcodes are masked out so the run terminates.
    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let bytes: Vec<u8> = bytes
            .into_iter()
            .map(|b| if (18..=20).contains(&b) || b == 36 { 7 } else { b })
            .collect();
        let _ = run_program(&Program::new(bytes));
    }

    #[test]
    fn resolve_global_is_idempotent(names in prop::collection::vec("[a-z]{1,6}", 1..20)) {
        let vm = Vm::init(["test"]);
        let first: Vec<_> = names.iter().map(|n| vm.resolve_global(n)).collect();
        let second: Vec<_> = names.iter().map(|n| vm.resolve_global(n)).collect();
        prop_assert_eq!(&first, &second);
        for (name, index) in names.iter().zip(first) {
            prop_assert_eq!(vm.check_global(name), Some(index));
        }
    }
}
