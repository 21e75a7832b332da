//! Register file.
//!
//! The machine has four registers:
//! - PC: 16-bit program counter (offset of the next opcode byte)
//! - ACC: 8-bit accumulator, the only general-purpose register
//! - SP: 16-bit call-stack pointer (offset of the next free frame)
//! - FLAGS: carry, zero and negative bits

use serde::{Serialize, Deserialize};

/// Status flags, recomputed by arithmetic instructions only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags {
    /// Unsigned overflow out of ADD, or borrow out of SUB.
    pub carry: bool,
    /// Last arithmetic result was zero.
    pub zero: bool,
    /// Bit 7 of the last arithmetic result was set.
    pub negative: bool,
}

impl Flags {
    pub const CARRY: u8 = 0x01;
    pub const ZERO: u8 = 0x02;
    pub const NEGATIVE: u8 = 0x04;

    /// Flags for an arithmetic result with the given carry/borrow.
    pub fn from_result(value: u8, carry: bool) -> Self {
        Self {
            carry,
            zero: value == 0,
            negative: value & 0x80 != 0,
        }
    }

    /// Pack into a byte (`C = bit 0`, `Z = bit 1`, `N = bit 2`).
    pub fn bits(self) -> u8 {
        let mut bits = 0;
        if self.carry {
            bits |= Self::CARRY;
        }
        if self.zero {
            bits |= Self::ZERO;
        }
        if self.negative {
            bits |= Self::NEGATIVE;
        }
        bits
    }

    /// Unpack from a byte, ignoring unused bits.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            carry: bits & Self::CARRY != 0,
            zero: bits & Self::ZERO != 0,
            negative: bits & Self::NEGATIVE != 0,
        }
    }
}

impl std::fmt::Display for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = if self.carry { 'C' } else { '-' };
        let z = if self.zero { 'Z' } else { '-' };
        let n = if self.negative { 'N' } else { '-' };
        write!(f, "{}{}{}", n, z, c)
    }
}

/// The register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub pc: u16,
    pub acc: u8,
    pub sp: u16,
    pub flags: Flags,
}

impl Registers {
    /// Registers as `init` leaves them.
    pub fn new(heap_start: u16, stack_start: u16) -> Self {
        Self {
            pc: heap_start,
            acc: 0,
            sp: stack_start,
            flags: Flags::default(),
        }
    }

    /// Zero the accumulator and flags and point PC and SP at their regions.
    pub fn reset(&mut self, heap_start: u16, stack_start: u16) {
        *self = Self::new(heap_start, stack_start);
    }

    /// Store an arithmetic result and its flags.
    pub fn set_result(&mut self, value: u8, carry: bool) {
        self.acc = value;
        self.flags = Flags::from_result(value, carry);
    }

    /// Set the program counter to an absolute address.
    pub fn jump(&mut self, addr: u16) {
        self.pc = addr;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(0, 0)
    }
}
