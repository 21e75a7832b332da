//! # ACC8
//!
//! A minimal 8-bit accumulator virtual machine.
//!
//! One accumulator, a program counter, a call-stack pointer and three status
//! flags, running over a single linear byte memory. The host owns a [`Vm`],
//! loads a program into its memory, and drives it with [`Vm::steps`], a
//! bounded number of instructions at a time.

pub mod config;
pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use config::{VmConfig, ConfigError};
pub use cpu::{Vm, StepReport, ExecutionFault, FaultKind, Flags, Memory, Registers, Instruction, Opcode};
pub use asm::{assemble, assemble_at, disassemble, AssemblerError, ProgramImage, load_image, save_image};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
