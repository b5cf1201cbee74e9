//! ngvm assembler: bidirectional text ↔ bytecode translation.
//!
//! One instruction per line, `;` comments, `name:` label definitions.
//! Jump, TRY_START and MAKE_CLOSURE operands take a label or a raw offset
//! relative to the next instruction; PATCH takes a label (the operand of
//! the labelled instruction) or a raw absolute address.
//!
//! # Usage
//!
//! ```
//! use ngvm_assembler::{assemble, disassemble};
//!
//! let text = "\
//! PUSH_L_STR \"+\"
//! RESOLVE_GLOBAL
//! PATCH plus
//! INIT_DONE
//! PUSH_INT 2
//! PUSH_INT 3
//! plus: FETCH_GLOBAL 0
//! CALL 2
//! HALT
//! ";
//! let program = assemble(text).unwrap();
//! let canonical = disassemble(&program).unwrap();
//! assert!(canonical.contains("PATCH 27\n"));
//! assert_eq!(assemble(&canonical).unwrap(), program);
//! ```
//!
//! # Roundtrip Guarantee
//!
//! `assemble(disassemble(program)) == program` holds for every program that
//! decodes. The disassembler outputs canonical text; the assembler also
//! accepts labels, hex numbers and lowercase mnemonics.

pub mod error;

mod disassembler;
mod lexer;
mod parser;

use std::collections::HashMap;

pub use disassembler::{disassemble, format_instruction};
pub use error::AsmError;

use lexer::tokenize_line;
use ngvm_common::{Label, Program, ProgramBuilder};
use parser::{parse_line, Stmt};

/// Assemble text into a bytecode program.
///
/// Returns the first error encountered. Fix one error at a time.
pub fn assemble(text: &str) -> Result<Program, AsmError> {
    let mut b = ProgramBuilder::new();
    let mut labels = LabelTable::default();

    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        let tokens = tokenize_line(line, line_num)?;
        let Some(parsed) = parse_line(&tokens, line_num)? else {
            continue;
        };
        if let Some(name) = parsed.label {
            labels.define(&mut b, name, line_num)?;
        }
        match parsed.stmt {
            None => {}
            Some(Stmt::Plain(instr)) => {
                b.emit(instr);
            }
            Some(Stmt::Jump(opcode, name)) => {
                let target = labels.refer(&mut b, name, line_num);
                b.jump(opcode, target);
            }
            Some(Stmt::Closure {
                entry,
                params,
                locals,
            }) => {
                let entry = labels.refer(&mut b, entry, line_num);
                b.closure(entry, params, locals);
            }
            Some(Stmt::Patch(name)) => {
                let site = labels.refer(&mut b, name, line_num);
                b.patch(site);
            }
        }
    }

    labels.check_defined()?;
    Ok(b.finish()?)
}

#[derive(Debug)]
struct LabelEntry {
    label: Label,
    defined: bool,
    first_use: Option<usize>,
}

/// Source label names mapped to builder labels.
#[derive(Debug, Default)]
struct LabelTable {
    entries: HashMap<String, LabelEntry>,
}

impl LabelTable {
    fn entry(&mut self, b: &mut ProgramBuilder, name: String) -> &mut LabelEntry {
        self.entries.entry(name).or_insert_with(|| LabelEntry {
            label: b.label(),
            defined: false,
            first_use: None,
        })
    }

    fn define(&mut self, b: &mut ProgramBuilder, name: String, line: usize) -> Result<(), AsmError> {
        let entry = self.entry(b, name.clone());
        if entry.defined {
            return Err(AsmError::DuplicateLabel { line, name });
        }
        entry.defined = true;
        let label = entry.label;
        b.bind(label);
        Ok(())
    }

    fn refer(&mut self, b: &mut ProgramBuilder, name: String, line: usize) -> Label {
        let entry = self.entry(b, name);
        entry.first_use.get_or_insert(line);
        entry.label
    }

    /// Report the earliest reference to a label that was never defined.
    fn check_defined(&self) -> Result<(), AsmError> {
        let missing = self
            .entries
            .iter()
            .filter(|(_, e)| !e.defined)
            .filter_map(|(name, e)| e.first_use.map(|line| (line, name)))
            .min();
        match missing {
            Some((line, name)) => Err(AsmError::UndefinedLabel {
                line,
                name: name.clone(),
            }),
            None => Ok(()),
        }
    }
}
