//! Two-pass assembler.
//!
//! Syntax:
//! ```text
//! ; Comment
//! START:              ; Define a label
//!     LDA_I 5         ; Immediate
//!     ADD_I 3
//!     STA_Z 0x10      ; Zero-page address
//!     JSR SUBR        ; Absolute address (label or number)
//!     JMP START
//!
//!     ORG 0x0100      ; Advance the location counter (zero fill)
//! SUBR:
//!     LDA COUNT+1     ; Label with offset
//!     RET
//! COUNT:
//!     DB 1, 2, 'x'    ; Bytes
//!     DW 0x1234       ; Little-endian words
//! ```

use crate::cpu::decode::{Opcode, Operand};
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to bytes, with labels relative to address 0.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblerError> {
    assemble_at(source, 0)
}

/// Assemble source code to bytes that will be loaded at `base`.
pub fn assemble_at(source: &str, base: u16) -> Result<Vec<u8>, AssemblerError> {
    let mut asm = Assembler::new(base);
    asm.assemble(source)
}

/// One parsed source line.
#[derive(Debug)]
enum Statement<'a> {
    Instruction { opcode: Opcode, operand: Option<&'a str> },
    Bytes(Vec<&'a str>),
    Words(Vec<&'a str>),
    Org(u32),
}

/// The assembler state.
struct Assembler<'a> {
    base: u16,
    /// Current address (location counter).
    current_addr: u32,
    /// Symbol table (label -> address).
    symbols: HashMap<String, u32>,
    /// Statements from pass 1 with their source line.
    statements: Vec<(usize, Statement<'a>)>,
}

impl<'a> Assembler<'a> {
    fn new(base: u16) -> Self {
        Self {
            base,
            current_addr: base as u32,
            symbols: HashMap::new(),
            statements: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &'a str) -> Result<Vec<u8>, AssemblerError> {
        // Pass 1: parse, size, and collect labels
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: encode with every label known
        let mut output = Vec::new();
        for (line_num, statement) in &self.statements {
            self.emit(statement, *line_num, &mut output)?;
        }
        Ok(output)
    }

    fn process_line(&mut self, line: &'a str, line_num: usize) -> Result<(), AssemblerError> {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            return Ok(());
        }

        // Check for label definition
        let line = match line.find(':') {
            Some(colon_idx) if !line[..colon_idx].contains('\'') => {
                let label = line[..colon_idx].trim();
                self.define_label(label, line_num)?;
                line[colon_idx + 1..].trim()
            }
            _ => line,
        };
        if line.is_empty() {
            return Ok(());
        }

        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((m, r)) => (m, Some(r.trim()).filter(|r| !r.is_empty())),
            None => (line, None),
        };

        let statement = match mnemonic.to_ascii_uppercase().as_str() {
            "ORG" => {
                let operand = rest.ok_or_else(|| syntax(line_num, "ORG requires an address"))?;
                let addr = self.evaluate(operand, line_num)?;
                if !(0..=0xFFFF).contains(&addr) {
                    return Err(AssemblerError::ValueOutOfRange { line: line_num, value: addr });
                }
                if (addr as u32) < self.current_addr {
                    return Err(syntax(line_num, "ORG cannot move backwards"));
                }
                Statement::Org(addr as u32)
            }
            "DB" | "BYTE" => {
                let items = split_list(rest).ok_or_else(|| syntax(line_num, "DB requires values"))?;
                Statement::Bytes(items)
            }
            "DW" | "WORD" => {
                let items = split_list(rest).ok_or_else(|| syntax(line_num, "DW requires values"))?;
                Statement::Words(items)
            }
            _ => {
                let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| {
                    AssemblerError::UnknownMnemonic {
                        line: line_num,
                        mnemonic: mnemonic.to_string(),
                    }
                })?;
                match (opcode.operand(), rest) {
                    (Operand::None, Some(_)) => {
                        return Err(syntax(line_num, &format!("{} takes no operand", mnemonic)));
                    }
                    (Operand::None, None) => {}
                    (_, None) => {
                        return Err(syntax(line_num, &format!("{} requires an operand", mnemonic)));
                    }
                    (_, Some(_)) => {}
                }
                Statement::Instruction { opcode, operand: rest }
            }
        };

        self.current_addr = match &statement {
            Statement::Org(addr) => *addr,
            other => self.current_addr + statement_size(other) as u32,
        };
        if self.current_addr > 0x1_0000 {
            return Err(syntax(line_num, "program extends past the 64K address space"));
        }
        self.statements.push((line_num, statement));
        Ok(())
    }

    fn define_label(&mut self, label: &str, line_num: usize) -> Result<(), AssemblerError> {
        let valid = label
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(syntax(line_num, &format!("invalid label '{}'", label)));
        }
        let key = label.to_ascii_uppercase();
        if self.symbols.contains_key(&key) {
            return Err(AssemblerError::DuplicateLabel { line: line_num, label: label.to_string() });
        }
        self.symbols.insert(key, self.current_addr);
        Ok(())
    }

    fn emit(&self, statement: &Statement<'_>, line_num: usize, output: &mut Vec<u8>) -> Result<(), AssemblerError> {
        match statement {
            Statement::Org(addr) => {
                let target = (*addr - self.base as u32) as usize;
                output.resize(target, 0);
            }
            Statement::Bytes(items) => {
                for item in items {
                    output.push(self.byte_value(item, line_num)?);
                }
            }
            Statement::Words(items) => {
                for item in items {
                    output.extend_from_slice(&self.word_value(item, line_num)?.to_le_bytes());
                }
            }
            Statement::Instruction { opcode, operand } => {
                output.push(opcode.to_byte());
                if let Some(operand) = operand {
                    match opcode.operand() {
                        Operand::None => {}
                        Operand::Immediate => output.push(self.byte_value(operand, line_num)?),
                        Operand::ZeroPage => {
                            let addr = self.evaluate(operand, line_num)?;
                            if !(0..=0xFF).contains(&addr) {
                                return Err(AssemblerError::ValueOutOfRange { line: line_num, value: addr });
                            }
                            output.push(addr as u8);
                        }
                        Operand::Absolute => {
                            output.extend_from_slice(&self.word_value(operand, line_num)?.to_le_bytes());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// A byte operand: 0..=255, or -128..=-1 as two's complement.
    fn byte_value(&self, text: &str, line_num: usize) -> Result<u8, AssemblerError> {
        let value = self.evaluate(text, line_num)?;
        if !(-128..=0xFF).contains(&value) {
            return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
        }
        Ok(value as u8)
    }

    fn word_value(&self, text: &str, line_num: usize) -> Result<u16, AssemblerError> {
        let value = self.evaluate(text, line_num)?;
        if !(0..=0xFFFF).contains(&value) {
            return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
        }
        Ok(value as u16)
    }

    /// Evaluate `term` or `term+n` / `term-n` where a term is a number or label.
    fn evaluate(&self, text: &str, line_num: usize) -> Result<i64, AssemblerError> {
        let text = text.trim();
        if let Some(idx) = text.rfind(|c: char| c == '+' || c == '-').filter(|&i| i > 0 && !text.starts_with('\'')) {
            let lhs = self.evaluate(&text[..idx], line_num)?;
            let rhs = self.term(text[idx + 1..].trim(), line_num)?;
            return Ok(if text.as_bytes()[idx] == b'+' { lhs + rhs } else { lhs - rhs });
        }
        self.term(text, line_num)
    }

    fn term(&self, text: &str, line_num: usize) -> Result<i64, AssemblerError> {
        if text.is_empty() {
            return Err(syntax(line_num, "missing value"));
        }
        if let Some(value) = parse_number(text) {
            return Ok(value);
        }
        if text.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '\'') {
            return Err(syntax(line_num, &format!("invalid number '{}'", text)));
        }
        self.symbols
            .get(&text.to_ascii_uppercase())
            .map(|&addr| addr as i64)
            .ok_or_else(|| AssemblerError::UndefinedLabel { line: line_num, label: text.to_string() })
    }
}

/// Bytes a statement occupies (ORG handled by the caller).
fn statement_size(statement: &Statement<'_>) -> usize {
    match statement {
        Statement::Instruction { opcode, .. } => 1 + opcode.operand().len(),
        Statement::Bytes(items) => items.len(),
        Statement::Words(items) => 2 * items.len(),
        Statement::Org(_) => 0,
    }
}

/// Remove a `;` comment, ignoring semicolons inside character literals.
fn strip_comment(line: &str) -> &str {
    let mut in_char = false;
    for (idx, c) in line.char_indices() {
        match c {
            '\'' => in_char = !in_char,
            ';' if !in_char => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn split_list(rest: Option<&str>) -> Option<Vec<&str>> {
    let items: Vec<&str> = rest?.split(',').map(str::trim).collect();
    if items.iter().any(|item| item.is_empty()) {
        return None;
    }
    Some(items)
}

/// Parse decimal, `0x` hex, `0b` binary, or a `'c'` character literal.
fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else if digits.len() == 3 && digits.starts_with('\'') && digits.ends_with('\'') {
        let c = digits.chars().nth(1)?;
        if !c.is_ascii() {
            return None;
        }
        c as i64
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

fn syntax(line: usize, message: &str) -> AssemblerError {
    AssemblerError::SyntaxError { line, message: message.to_string() }
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },
}
