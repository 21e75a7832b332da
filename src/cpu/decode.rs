//! Instruction decoder.
//!
//! Every instruction is one opcode byte followed by zero, one or two operand
//! bytes. The operand shape is a fixed property of the opcode, so decoding is
//! split in two: [`decode`] maps an opcode byte to its [`Opcode`] and operand
//! length, and [`Instruction::from_parts`] combines it with the fetched
//! operand bytes.

use serde::{Serialize, Deserialize};
use std::fmt;
use thiserror::Error;

/// Operand shape of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// No operand bytes.
    None,
    /// One byte used as the value itself.
    Immediate,
    /// One byte used as an address in the first 256 bytes.
    ZeroPage,
    /// Two bytes, low first, forming a 16-bit address.
    Absolute,
}

impl Operand {
    /// Number of operand bytes following the opcode.
    pub const fn len(self) -> usize {
        match self {
            Operand::None => 0,
            Operand::Immediate | Operand::ZeroPage => 1,
            Operand::Absolute => 2,
        }
    }
}

/// Opcode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Nop,
    Hlt,
    LdaZ,
    LdaI,
    Lda,
    StaZ,
    Sta,
    Add,
    Sub,
    AddI,
    SubI,
    Jmz,
    Jmp,
    Jsr,
    Ret,
    Jmn,
    /// Any byte outside the table. Executes as a one-byte no-op.
    Unknown(u8),
}

impl Opcode {
    /// Every defined opcode, in encoding order.
    pub const ALL: [Opcode; 16] = [
        Opcode::Nop,
        Opcode::Hlt,
        Opcode::LdaZ,
        Opcode::LdaI,
        Opcode::Lda,
        Opcode::StaZ,
        Opcode::Sta,
        Opcode::Add,
        Opcode::Sub,
        Opcode::AddI,
        Opcode::SubI,
        Opcode::Jmz,
        Opcode::Jmp,
        Opcode::Jsr,
        Opcode::Ret,
        Opcode::Jmn,
    ];

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Hlt,
            0x10 => Opcode::LdaZ,
            0x11 => Opcode::LdaI,
            0x12 => Opcode::Lda,
            0x20 => Opcode::StaZ,
            0x22 => Opcode::Sta,
            0x30 => Opcode::Add,
            0x31 => Opcode::Sub,
            0x32 => Opcode::AddI,
            0x33 => Opcode::SubI,
            0x40 => Opcode::Jmz,
            0x41 => Opcode::Jmp,
            0x42 => Opcode::Jsr,
            0x43 => Opcode::Ret,
            0x44 => Opcode::Jmn,
            other => Opcode::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Nop => 0x00,
            Opcode::Hlt => 0x01,
            Opcode::LdaZ => 0x10,
            Opcode::LdaI => 0x11,
            Opcode::Lda => 0x12,
            Opcode::StaZ => 0x20,
            Opcode::Sta => 0x22,
            Opcode::Add => 0x30,
            Opcode::Sub => 0x31,
            Opcode::AddI => 0x32,
            Opcode::SubI => 0x33,
            Opcode::Jmz => 0x40,
            Opcode::Jmp => 0x41,
            Opcode::Jsr => 0x42,
            Opcode::Ret => 0x43,
            Opcode::Jmn => 0x44,
            Opcode::Unknown(byte) => byte,
        }
    }

    pub fn operand(self) -> Operand {
        match self {
            Opcode::Nop | Opcode::Hlt | Opcode::Ret | Opcode::Unknown(_) => Operand::None,
            Opcode::LdaI | Opcode::AddI | Opcode::SubI => Operand::Immediate,
            Opcode::LdaZ | Opcode::StaZ => Operand::ZeroPage,
            Opcode::Lda
            | Opcode::Sta
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Jmz
            | Opcode::Jmp
            | Opcode::Jsr
            | Opcode::Jmn => Operand::Absolute,
        }
    }

    /// Assembler mnemonic. Unknown opcodes have none.
    pub fn mnemonic(self) -> Option<&'static str> {
        let name = match self {
            Opcode::Nop => "NOP",
            Opcode::Hlt => "HLT",
            Opcode::LdaZ => "LDA_Z",
            Opcode::LdaI => "LDA_I",
            Opcode::Lda => "LDA",
            Opcode::StaZ => "STA_Z",
            Opcode::Sta => "STA",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::AddI => "ADD_I",
            Opcode::SubI => "SUB_I",
            Opcode::Jmz => "JMZ",
            Opcode::Jmp => "JMP",
            Opcode::Jsr => "JSR",
            Opcode::Ret => "RET",
            Opcode::Jmn => "JMN",
            Opcode::Unknown(_) => return None,
        };
        Some(name)
    }

    /// Look up an opcode by mnemonic (case-insensitive).
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        Self::ALL.into_iter().find(|op| op.mnemonic() == Some(upper.as_str()))
    }

    /// True for instructions that recompute the flags.
    pub fn affects_flags(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::AddI | Opcode::SubI)
    }
}

/// Decode an opcode byte into its opcode and operand length.
#[inline]
pub fn decode(byte: u8) -> (Opcode, usize) {
    let opcode = Opcode::from_byte(byte);
    (opcode, opcode.operand().len())
}

/// A fully decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Data Transfer ====================

    /// No operation
    Nop,

    /// Load accumulator from zero page: ACC := [addr]
    LdaZ { addr: u8 },

    /// Load accumulator with an immediate: ACC := value
    LdaI { value: u8 },

    /// Load accumulator: ACC := [addr]
    Lda { addr: u16 },

    /// Store accumulator to zero page: [addr] := ACC
    StaZ { addr: u8 },

    /// Store accumulator: [addr] := ACC
    Sta { addr: u16 },

    // ==================== Arithmetic ====================

    /// Add with carry: ACC := ACC + [addr] + C
    Add { addr: u16 },

    /// Subtract with borrow: ACC := ACC - [addr] - C
    Sub { addr: u16 },

    /// Add immediate with carry: ACC := ACC + value + C
    AddI { value: u8 },

    /// Subtract immediate with borrow: ACC := ACC - value - C
    SubI { value: u8 },

    // ==================== Control Flow ====================

    /// Jump if zero flag set
    Jmz { addr: u16 },

    /// Unconditional jump
    Jmp { addr: u16 },

    /// Jump if negative flag set
    Jmn { addr: u16 },

    /// Push return address and jump
    Jsr { addr: u16 },

    /// Pop return address
    Ret,

    /// End the current run of steps
    Hlt,

    /// Byte with no opcode assigned
    Unknown(u8),
}

impl Instruction {
    /// Build an instruction from an opcode and its operand bytes.
    ///
    /// `operands` must hold at least `opcode.operand().len()` bytes.
    pub fn from_parts(opcode: Opcode, operands: &[u8]) -> Result<Self, DecodeError> {
        let needed = opcode.operand().len();
        if operands.len() < needed {
            return Err(DecodeError::Truncated {
                opcode: opcode.to_byte(),
                needed,
                available: operands.len(),
            });
        }
        let mut bytes = [0u8; 2];
        bytes[..needed].copy_from_slice(&operands[..needed]);
        Ok(Self::with_operands(opcode, bytes))
    }

    /// Build an instruction from its opcode and a full operand pair.
    ///
    /// Bytes beyond the opcode's operand length are ignored.
    pub fn with_operands(opcode: Opcode, operands: [u8; 2]) -> Self {
        let byte = || operands[0];
        let word = || u16::from_le_bytes(operands);

        match opcode {
            Opcode::Nop => Instruction::Nop,
            Opcode::Hlt => Instruction::Hlt,
            Opcode::LdaZ => Instruction::LdaZ { addr: byte() },
            Opcode::LdaI => Instruction::LdaI { value: byte() },
            Opcode::Lda => Instruction::Lda { addr: word() },
            Opcode::StaZ => Instruction::StaZ { addr: byte() },
            Opcode::Sta => Instruction::Sta { addr: word() },
            Opcode::Add => Instruction::Add { addr: word() },
            Opcode::Sub => Instruction::Sub { addr: word() },
            Opcode::AddI => Instruction::AddI { value: byte() },
            Opcode::SubI => Instruction::SubI { value: byte() },
            Opcode::Jmz => Instruction::Jmz { addr: word() },
            Opcode::Jmp => Instruction::Jmp { addr: word() },
            Opcode::Jsr => Instruction::Jsr { addr: word() },
            Opcode::Ret => Instruction::Ret,
            Opcode::Jmn => Instruction::Jmn { addr: word() },
            Opcode::Unknown(b) => Instruction::Unknown(b),
        }
    }

    /// Decode the instruction at the start of `bytes`.
    ///
    /// Returns the instruction and the number of bytes it occupies.
    pub fn decode_from(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (&first, rest) = bytes.split_first().ok_or(DecodeError::Empty)?;
        let (opcode, len) = decode(first);
        let instr = Self::from_parts(opcode, rest)?;
        Ok((instr, 1 + len))
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Nop => Opcode::Nop,
            Instruction::LdaZ { .. } => Opcode::LdaZ,
            Instruction::LdaI { .. } => Opcode::LdaI,
            Instruction::Lda { .. } => Opcode::Lda,
            Instruction::StaZ { .. } => Opcode::StaZ,
            Instruction::Sta { .. } => Opcode::Sta,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Sub { .. } => Opcode::Sub,
            Instruction::AddI { .. } => Opcode::AddI,
            Instruction::SubI { .. } => Opcode::SubI,
            Instruction::Jmz { .. } => Opcode::Jmz,
            Instruction::Jmp { .. } => Opcode::Jmp,
            Instruction::Jmn { .. } => Opcode::Jmn,
            Instruction::Jsr { .. } => Opcode::Jsr,
            Instruction::Ret => Opcode::Ret,
            Instruction::Hlt => Opcode::Hlt,
            Instruction::Unknown(byte) => Opcode::Unknown(*byte),
        }
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        1 + self.opcode().operand().len()
    }
}

/// Encode an instruction to its byte form.
pub fn encode(instr: &Instruction) -> Vec<u8> {
    let mut bytes = vec![instr.opcode().to_byte()];
    match *instr {
        Instruction::LdaZ { addr } | Instruction::StaZ { addr } => bytes.push(addr),
        Instruction::LdaI { value } | Instruction::AddI { value } | Instruction::SubI { value } => {
            bytes.push(value)
        }
        Instruction::Lda { addr }
        | Instruction::Sta { addr }
        | Instruction::Add { addr }
        | Instruction::Sub { addr }
        | Instruction::Jmz { addr }
        | Instruction::Jmp { addr }
        | Instruction::Jmn { addr }
        | Instruction::Jsr { addr } => bytes.extend_from_slice(&addr.to_le_bytes()),
        Instruction::Nop | Instruction::Ret | Instruction::Hlt | Instruction::Unknown(_) => {}
    }
    bytes
}

/// Assembly text. Unknown bytes print as a `DB` directive so the listing
/// re-assembles to the same bytes.
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().mnemonic().unwrap_or("DB");
        match *self {
            Instruction::LdaZ { addr } | Instruction::StaZ { addr } => {
                write!(f, "{} 0x{:02X}", name, addr)
            }
            Instruction::LdaI { value } | Instruction::AddI { value } | Instruction::SubI { value } => {
                write!(f, "{} {}", name, value)
            }
            Instruction::Lda { addr }
            | Instruction::Sta { addr }
            | Instruction::Add { addr }
            | Instruction::Sub { addr }
            | Instruction::Jmz { addr }
            | Instruction::Jmp { addr }
            | Instruction::Jmn { addr }
            | Instruction::Jsr { addr } => write!(f, "{} 0x{:04X}", name, addr),
            Instruction::Unknown(byte) => write!(f, "{} 0x{:02X}", name, byte),
            Instruction::Nop | Instruction::Ret | Instruction::Hlt => write!(f, "{}", name),
        }
    }
}

/// Errors that can occur while decoding a byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no bytes to decode")]
    Empty,

    #[error("opcode {opcode:#04x} needs {needed} operand bytes, {available} available")]
    Truncated { opcode: u8, needed: usize, available: usize },
}
