//! TUI debugger for the ACC8 machine.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and flag view
//! - Hex memory view with PC and stack-top highlighting
//! - Call-stack view
//! - Step/run/breakpoint controls
//! - Disassembly from the PC

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
