//! The 8-bit accumulator machine.
//!
//! - one linear byte memory holding a program/data region and a call stack
//! - 4 registers: PC, ACC (accumulator), SP (call-stack pointer), FLAGS
//! - 16-opcode instruction set with immediate, zero-page and absolute operands

pub mod alu;
pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use memory::{Memory, MemoryError};
pub use registers::{Flags, Registers};
pub use decode::{decode, encode, Instruction, Opcode, Operand, DecodeError};
pub use execute::{Vm, StepReport, ExecutionFault, FaultKind, VmSnapshot, TraceEntry};
