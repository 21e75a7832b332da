//! Disassembler.
//!
//! Converts a byte stream back to assembler syntax. The listing re-assembles
//! to the same bytes.

use crate::cpu::decode::{encode, Instruction};

/// One decoded line of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub addr: u16,
    pub bytes: Vec<u8>,
    pub text: String,
}

/// Decode `bytes` (loaded at `base`) into listing lines.
///
/// An instruction cut off by the end of the slice is listed as `DB` bytes.
pub fn disassemble_lines(bytes: &[u8], base: u16) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let addr = base.wrapping_add(offset as u16);
        match Instruction::decode_from(&bytes[offset..]) {
            Ok((instr, len)) => {
                lines.push(Line {
                    addr,
                    bytes: bytes[offset..offset + len].to_vec(),
                    text: instr.to_string(),
                });
                offset += len;
            }
            Err(_) => {
                let rest = &bytes[offset..];
                let values: Vec<String> = rest.iter().map(|b| format!("0x{:02X}", b)).collect();
                lines.push(Line {
                    addr,
                    bytes: rest.to_vec(),
                    text: format!("DB {}", values.join(", ")),
                });
                offset = bytes.len();
            }
        }
    }

    lines
}

/// Disassemble a single instruction to text.
pub fn disassemble_instruction(instr: &Instruction) -> String {
    instr.to_string()
}

/// Disassemble a byte slice loaded at `base` to a full listing.
pub fn disassemble(bytes: &[u8], base: u16) -> String {
    let mut output = String::new();
    output.push_str("; ACC8 Disassembly\n");
    output.push_str("; -----------------\n\n");
    output.push_str(&format!("    ORG 0x{:04X}\n", base));

    for line in disassemble_lines(bytes, base) {
        let hex: Vec<String> = line.bytes.iter().map(|b| format!("{:02X}", b)).collect();
        output.push_str(&format!("    {:<20} ; {:04X}: {}\n", line.text, line.addr, hex.join(" ")));
    }

    output
}

/// Encoded bytes of an instruction as a hex string, e.g. `"12 34 02"`.
pub fn hex_bytes(instr: &Instruction) -> String {
    encode(instr)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
