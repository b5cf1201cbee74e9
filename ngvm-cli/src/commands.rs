//! CLI command implementations.

use std::fs;

use ngvm_common::Program;
use ngvm_vm::{context_init, Outcome, Vm};
use tracing::debug;

/// Assemble a .nga text file to .ngb bytecode.
pub fn assemble(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: assemble requires an input file");
        eprintln!("Usage: ngvm assemble <input.nga> [-o output.ngb]");
        return Err(1);
    }

    let input = &args[0];
    let output = output_path(input, &args[1..]);

    let text = fs::read_to_string(input).map_err(|e| {
        eprintln!("error: cannot read '{input}': {e}");
        1
    })?;

    let program = ngvm_assembler::assemble(&text).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;

    fs::write(&output, program.as_bytes()).map_err(|e| {
        eprintln!("error: cannot write '{output}': {e}");
        1
    })?;

    eprintln!("assembled {} bytes -> {output}", program.len());
    Ok(())
}

/// Verify a .ngb bytecode file.
pub fn verify(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: verify requires an input file");
        eprintln!("Usage: ngvm verify <input.ngb>");
        return Err(1);
    }

    let input = &args[0];
    let program = read_binary(input)?;
    verify_program(&program)?;
    println!("OK: {input} ({} bytes)", program.len());
    Ok(())
}

/// Verify and execute a .ngb bytecode file.
///
/// `ARGV` is bound to the program path followed by everything after `--`.
pub fn run(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: run requires an input file");
        eprintln!("Usage: ngvm run <input.ngb> [-- args...]");
        return Err(1);
    }

    let input = &args[0];
    let program = read_binary(input)?;
    verify_program(&program)?;

    let argv: Vec<&str> = std::iter::once(input.as_str())
        .chain(script_args(&args[1..]).iter().map(String::as_str))
        .collect();
    debug!(?argv, "starting program");

    let vm = Vm::init(argv);
    vm.load(program.as_bytes());
    let mut ctx = context_init();

    match vm.run(&mut ctx, 0) {
        Ok(Outcome::Ok(value)) => {
            println!("{value}");
            Ok(())
        }
        Ok(Outcome::Exception(value)) => {
            eprintln!("uncaught exception: {value}");
            Err(4)
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            Err(3)
        }
    }
}

/// Disassemble a .ngb bytecode file to text.
pub fn disassemble(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: disassemble requires an input file");
        eprintln!("Usage: ngvm disassemble <input.ngb>");
        return Err(1);
    }

    let input = &args[0];
    let program = read_binary(input)?;
    let text = ngvm_assembler::disassemble(&program).map_err(|e| {
        eprintln!("error: invalid bytecode: {e}");
        1
    })?;
    print!("{text}");
    Ok(())
}

// --- Helpers ---

/// Read a .ngb file and check that it decodes.
fn read_binary(path: &str) -> Result<Program, i32> {
    let bytes = fs::read(path).map_err(|e| {
        eprintln!("error: cannot read '{path}': {e}");
        1
    })?;

    let program = Program::new(bytes);
    program.decode_all().map_err(|e| {
        eprintln!("error: invalid bytecode: {e}");
        1
    })?;
    Ok(program)
}

fn verify_program(program: &Program) -> Result<(), i32> {
    ngvm_verifier::verify(program).map_err(|errors| {
        for e in &errors {
            eprintln!("error: {e}");
        }
        2
    })
}

/// `-o path` if given, else the input with its `.nga` extension swapped.
fn output_path(input: &str, flags: &[String]) -> String {
    match flags {
        [flag, path, ..] if flag == "-o" => path.clone(),
        _ => match input.strip_suffix(".nga") {
            Some(stem) => format!("{stem}.ngb"),
            None => format!("{input}.ngb"),
        },
    }
}

/// Script arguments: everything after a leading `--`, or the rest as-is.
fn script_args(rest: &[String]) -> &[String] {
    match rest.split_first() {
        Some((sep, tail)) if sep == "--" => tail,
        _ => rest,
    }
}
