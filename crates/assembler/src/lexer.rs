//! Tokenizer for ngvm assembly text.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::AsmError;

/// A single token from an assembly line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// An opcode mnemonic or a label reference. Case is preserved.
    Ident(String),
    /// A numeric literal: decimal, optionally negative, or `0x` hex.
    Number(i64),
    /// A double-quoted string literal, escapes already applied.
    Str(String),
    /// A label definition, `name:`.
    LabelDef(String),
}

/// Tokenize a single line of assembly text.
///
/// Returns an empty Vec for blank lines and comment-only lines.
/// Comments start with `;` outside a string and extend to end of line.
pub(crate) fn tokenize_line(line: &str, line_num: usize) -> Result<Vec<Token>, AsmError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c == ';' {
            break;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            tokens.push(Token::Str(read_string(&mut chars, line_num)?));
            continue;
        }

        let mut end = line.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == ';' || c == '"' {
                end = i;
                break;
            }
            chars.next();
        }
        tokens.push(word_token(&line[start..end], line_num)?);
    }

    Ok(tokens)
}

fn read_string(chars: &mut Peekable<CharIndices<'_>>, line: usize) -> Result<String, AsmError> {
    let mut out = String::new();
    loop {
        let Some((_, c)) = chars.next() else {
            return Err(AsmError::UnterminatedString { line });
        };
        match c {
            '"' => return Ok(out),
            '\\' => {
                let Some((_, escape)) = chars.next() else {
                    return Err(AsmError::UnterminatedString { line });
                };
                out.push(match escape {
                    '"' => '"',
                    '\\' => '\\',
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => return Err(AsmError::InvalidEscape { line, escape: other }),
                });
            }
            c => out.push(c),
        }
    }
}

fn is_ident(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn word_token(word: &str, line: usize) -> Result<Token, AsmError> {
    if let Some(name) = word.strip_suffix(':') {
        if is_ident(name) {
            return Ok(Token::LabelDef(name.to_string()));
        }
    } else if is_ident(word) {
        return Ok(Token::Ident(word.to_string()));
    } else if word
        .trim_start_matches('-')
        .as_bytes()
        .first()
        .is_some_and(|b| b.is_ascii_digit())
    {
        return parse_number(word)
            .map(Token::Number)
            .ok_or_else(|| AsmError::InvalidNumber {
                line,
                token: word.to_string(),
            });
    }
    Err(AsmError::UnexpectedToken {
        line,
        token: word.to_string(),
    })
}

/// Hex literals are read as 64-bit patterns, so `0xffffffffffffffff` is -1.
fn parse_number(word: &str) -> Option<i64> {
    let (negative, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => {
            let bits = u64::from_str_radix(hex, 16).ok()? as i64;
            if negative {
                bits.checked_neg()
            } else {
                Some(bits)
            }
        }
        None => word.parse().ok(),
    }
}
