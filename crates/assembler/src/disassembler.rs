//! Disassembler: bytecode → canonical assembly text.
//!
//! Output format is flat text, one instruction per line. No labels, no
//! comments, no blank lines: every operand is printed raw, so jumps show
//! their relative offset and PATCH its absolute operand address.

use ngvm_common::{BytecodeError, Instruction, Program};

/// Disassemble a program into canonical assembly text.
///
/// The output reassembles to identical bytes
/// (`assemble(disassemble(program)?) == program`).
pub fn disassemble(program: &Program) -> Result<String, BytecodeError> {
    let mut out = String::new();
    for (_, instr) in program.decode_all()? {
        out.push_str(&format_instruction(&instr));
        out.push('\n');
    }
    Ok(out)
}

/// Canonical text for one instruction.
pub fn format_instruction(instr: &Instruction) -> String {
    let mnemonic = instr.opcode().mnemonic();
    match instr {
        Instruction::PushInt(n) => format!("{mnemonic} {n}"),
        Instruction::PushLStr(s) => format!("{mnemonic} \"{}\"", escape(s)),

        Instruction::Patch(n)
        | Instruction::FetchGlobal(n)
        | Instruction::StoreGlobal(n)
        | Instruction::GlobalDefP(n)
        | Instruction::DefGlobalFunc(n)
        | Instruction::MakeArr(n)
        | Instruction::MakeStr(n)
        | Instruction::MakeHash(n) => format!("{mnemonic} {n}"),

        Instruction::FetchLocal(n)
        | Instruction::StoreLocal(n)
        | Instruction::LocalDefP(n)
        | Instruction::DefLocalFunc(n)
        | Instruction::Call(n) => format!("{mnemonic} {n}"),

        Instruction::Jmp(offset)
        | Instruction::JmpTrue(offset)
        | Instruction::JmpFalse(offset)
        | Instruction::TryStart(offset) => format!("{mnemonic} {offset}"),

        Instruction::MakeClosure {
            offset,
            params,
            locals,
        } => format!("{mnemonic} {offset} {params} {locals}"),

        Instruction::FetchUpvar { depth, slot }
        | Instruction::StoreUpvar { depth, slot }
        | Instruction::UpvarDefP { depth, slot }
        | Instruction::DefUpvarFunc { depth, slot } => format!("{mnemonic} {depth} {slot}"),

        _ => mnemonic.to_string(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}
