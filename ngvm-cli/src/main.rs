//! ngvm CLI: assemble, verify, disassemble and execute bytecode.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Input/decode/assembly error
//! - 2: Verification failure
//! - 3: Fatal VM error
//! - 4: Uncaught exception

mod commands;

use std::process;

use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "assemble" => commands::assemble(&args[2..]),
        "verify" => commands::verify(&args[2..]),
        "run" => commands::run(&args[2..]),
        "disassemble" => commands::disassemble(&args[2..]),
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        other => {
            eprintln!("error: unknown command '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    if let Err(code) = result {
        process::exit(code);
    }
}

/// Log to stderr. `RUST_LOG` overrides the default `warn` filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    eprintln!("Usage: ngvm <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  assemble <input.nga> [-o output.ngb]   Assemble text to bytecode");
    eprintln!("  verify <input.ngb>                     Verify a bytecode file");
    eprintln!("  run <input.ngb> [-- args...]           Verify and execute a bytecode file");
    eprintln!("  disassemble <input.ngb>                Disassemble bytecode to text");
}
