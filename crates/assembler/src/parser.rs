//! Parser for ngvm assembly tokens → statements.
//!
//! Dispatches on the opcode to the operand layout it takes. Operands that
//! name a label are left symbolic; the caller lays them out.

use ngvm_common::{Instruction, Opcode, MAX_STR_LITERAL};

use crate::error::AsmError;
use crate::lexer::Token;

/// One instruction, with label operands not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Stmt {
    /// Every operand is literal.
    Plain(Instruction),
    /// JMP, JMP_TRUE, JMP_FALSE or TRY_START to a label.
    Jump(Opcode, String),
    /// MAKE_CLOSURE whose entry is a label.
    Closure {
        entry: String,
        params: u8,
        locals: u8,
    },
    /// PATCH of the operand of the labelled instruction.
    Patch(String),
}

/// A parsed source line: an optional label and an optional statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Line {
    pub label: Option<String>,
    pub stmt: Option<Stmt>,
}

/// Parse the tokens of one line.
///
/// Returns `Ok(None)` for blank lines (empty token list).
pub(crate) fn parse_line(tokens: &[Token], line_num: usize) -> Result<Option<Line>, AsmError> {
    let (label, rest) = match tokens.split_first() {
        None => return Ok(None),
        Some((Token::LabelDef(name), rest)) => (Some(name.clone()), rest),
        Some(_) => (None, tokens),
    };

    let Some((first, args)) = rest.split_first() else {
        return Ok(Some(Line { label, stmt: None }));
    };
    let mnemonic = match first {
        Token::Ident(s) => s.to_ascii_uppercase(),
        other => {
            return Err(AsmError::UnexpectedToken {
                line: line_num,
                token: token_text(other),
            })
        }
    };
    let opcode = Opcode::from_mnemonic(&mnemonic).ok_or_else(|| AsmError::UnknownOpcode {
        line: line_num,
        token: mnemonic.clone(),
    })?;

    let stmt = parse_operands(opcode, args, line_num)?;
    Ok(Some(Line {
        label,
        stmt: Some(stmt),
    }))
}

fn parse_operands(opcode: Opcode, args: &[Token], line: usize) -> Result<Stmt, AsmError> {
    let ops = Operands {
        args,
        line,
        opcode: opcode.mnemonic(),
    };

    let stmt = match opcode {
        // No operands
        Opcode::Halt => Stmt::Plain(ops.none(Instruction::Halt)?),
        Opcode::PushNull => Stmt::Plain(ops.none(Instruction::PushNull)?),
        Opcode::PushFalse => Stmt::Plain(ops.none(Instruction::PushFalse)?),
        Opcode::PushTrue => Stmt::Plain(ops.none(Instruction::PushTrue)?),
        Opcode::PushUndef => Stmt::Plain(ops.none(Instruction::PushUndef)?),
        Opcode::Dup => Stmt::Plain(ops.none(Instruction::Dup)?),
        Opcode::Pop => Stmt::Plain(ops.none(Instruction::Pop)?),
        Opcode::ResolveGlobal => Stmt::Plain(ops.none(Instruction::ResolveGlobal)?),
        Opcode::InitDone => Stmt::Plain(ops.none(Instruction::InitDone)?),
        Opcode::Ret => Stmt::Plain(ops.none(Instruction::Ret)?),
        Opcode::ToStr => Stmt::Plain(ops.none(Instruction::ToStr)?),
        Opcode::PushEmptyStr => Stmt::Plain(ops.none(Instruction::PushEmptyStr)?),
        Opcode::ToBool => Stmt::Plain(ops.none(Instruction::ToBool)?),
        Opcode::TryEnd => Stmt::Plain(ops.none(Instruction::TryEnd)?),
        Opcode::Throw => Stmt::Plain(ops.none(Instruction::Throw)?),

        // Literals
        Opcode::PushInt => {
            ops.arity(1)?;
            Stmt::Plain(Instruction::PushInt(ops.int(0, 1)?))
        }
        Opcode::PushLStr => {
            ops.arity(1)?;
            Stmt::Plain(Instruction::PushLStr(ops.string(0, 1)?))
        }

        // One u16 operand
        Opcode::FetchGlobal
        | Opcode::StoreGlobal
        | Opcode::GlobalDefP
        | Opcode::DefGlobalFunc
        | Opcode::MakeArr
        | Opcode::MakeStr
        | Opcode::MakeHash => {
            ops.arity(1)?;
            let n: u16 = ops.int(0, 1)?;
            Stmt::Plain(match opcode {
                Opcode::FetchGlobal => Instruction::FetchGlobal(n),
                Opcode::StoreGlobal => Instruction::StoreGlobal(n),
                Opcode::GlobalDefP => Instruction::GlobalDefP(n),
                Opcode::DefGlobalFunc => Instruction::DefGlobalFunc(n),
                Opcode::MakeArr => Instruction::MakeArr(n),
                Opcode::MakeStr => Instruction::MakeStr(n),
                _ => Instruction::MakeHash(n),
            })
        }

        // One u8 operand
        Opcode::FetchLocal
        | Opcode::StoreLocal
        | Opcode::LocalDefP
        | Opcode::DefLocalFunc
        | Opcode::Call => {
            ops.arity(1)?;
            let n: u8 = ops.int(0, 1)?;
            Stmt::Plain(match opcode {
                Opcode::FetchLocal => Instruction::FetchLocal(n),
                Opcode::StoreLocal => Instruction::StoreLocal(n),
                Opcode::LocalDefP => Instruction::LocalDefP(n),
                Opcode::DefLocalFunc => Instruction::DefLocalFunc(n),
                _ => Instruction::Call(n),
            })
        }

        // Depth and slot
        Opcode::FetchUpvar | Opcode::StoreUpvar | Opcode::UpvarDefP | Opcode::DefUpvarFunc => {
            ops.arity(2)?;
            let depth: u8 = ops.int(0, 2)?;
            let slot: u8 = ops.int(1, 2)?;
            Stmt::Plain(match opcode {
                Opcode::FetchUpvar => Instruction::FetchUpvar { depth, slot },
                Opcode::StoreUpvar => Instruction::StoreUpvar { depth, slot },
                Opcode::UpvarDefP => Instruction::UpvarDefP { depth, slot },
                _ => Instruction::DefUpvarFunc { depth, slot },
            })
        }

        // Relative target: label or raw i16
        Opcode::Jmp | Opcode::JmpTrue | Opcode::JmpFalse | Opcode::TryStart => {
            ops.arity(1)?;
            match ops.label(0) {
                Some(name) => Stmt::Jump(opcode, name),
                None => {
                    let offset: i16 = ops.int(0, 1)?;
                    Stmt::Plain(match opcode {
                        Opcode::Jmp => Instruction::Jmp(offset),
                        Opcode::JmpTrue => Instruction::JmpTrue(offset),
                        Opcode::JmpFalse => Instruction::JmpFalse(offset),
                        _ => Instruction::TryStart(offset),
                    })
                }
            }
        }

        Opcode::MakeClosure => {
            ops.arity(3)?;
            let params: u8 = ops.int(1, 3)?;
            let locals: u8 = ops.int(2, 3)?;
            match ops.label(0) {
                Some(entry) => Stmt::Closure {
                    entry,
                    params,
                    locals,
                },
                None => Stmt::Plain(Instruction::MakeClosure {
                    offset: ops.int(0, 3)?,
                    params,
                    locals,
                }),
            }
        }

        // Absolute operand address: label or raw u16
        Opcode::Patch => {
            ops.arity(1)?;
            match ops.label(0) {
                Some(name) => Stmt::Patch(name),
                None => Stmt::Plain(Instruction::Patch(ops.int(0, 1)?)),
            }
        }
    };
    Ok(stmt)
}

/// Operand tokens of one instruction.
struct Operands<'a> {
    args: &'a [Token],
    line: usize,
    opcode: &'static str,
}

impl Operands<'_> {
    /// Check the operand count exactly.
    fn arity(&self, expected: usize) -> Result<(), AsmError> {
        if self.args.len() < expected {
            return Err(AsmError::MissingArgument {
                line: self.line,
                opcode: self.opcode,
                expected,
            });
        }
        expect_end(&self.args[expected..], self.line)
    }

    fn none(&self, instr: Instruction) -> Result<Instruction, AsmError> {
        self.arity(0)?;
        Ok(instr)
    }

    /// A numeric operand, range-checked into `T`.
    fn int<T: TryFrom<i64>>(&self, idx: usize, expected: usize) -> Result<T, AsmError> {
        match self.args.get(idx) {
            Some(Token::Number(n)) => T::try_from(*n).map_err(|_| AsmError::InvalidNumber {
                line: self.line,
                token: n.to_string(),
            }),
            Some(other) => Err(AsmError::UnexpectedToken {
                line: self.line,
                token: token_text(other),
            }),
            None => Err(AsmError::MissingArgument {
                line: self.line,
                opcode: self.opcode,
                expected,
            }),
        }
    }

    fn string(&self, idx: usize, expected: usize) -> Result<String, AsmError> {
        match self.args.get(idx) {
            Some(Token::Str(s)) if s.len() > MAX_STR_LITERAL => Err(AsmError::StringTooLong {
                line: self.line,
                len: s.len(),
            }),
            Some(Token::Str(s)) => Ok(s.clone()),
            Some(other) => Err(AsmError::UnexpectedToken {
                line: self.line,
                token: token_text(other),
            }),
            None => Err(AsmError::MissingArgument {
                line: self.line,
                opcode: self.opcode,
                expected,
            }),
        }
    }

    /// The label named by operand `idx`, if it is one.
    fn label(&self, idx: usize) -> Option<String> {
        match self.args.get(idx) {
            Some(Token::Ident(name)) => Some(name.clone()),
            _ => None,
        }
    }
}

fn token_text(token: &Token) -> String {
    match token {
        Token::Ident(s) => s.clone(),
        Token::Number(n) => n.to_string(),
        Token::Str(s) => format!("{s:?}"),
        Token::LabelDef(s) => format!("{s}:"),
    }
}

/// Check that there are no extra tokens.
fn expect_end(remaining: &[Token], line: usize) -> Result<(), AsmError> {
    match remaining.first() {
        Some(tok) => Err(AsmError::UnexpectedToken {
            line,
            token: token_text(tok),
        }),
        None => Ok(()),
    }
}
