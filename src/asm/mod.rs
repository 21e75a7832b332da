//! Assembler and disassembler for ACC8 programs.
//!
//! This module provides:
//! - A two-pass assembler (text → bytes)
//! - A disassembler (bytes → text)
//! - Program image files (hex text and raw binary)

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, assemble_at, AssemblerError};
pub use disasm::disassemble;
pub use image::{ProgramImage, ImageError, load_image, save_image};
