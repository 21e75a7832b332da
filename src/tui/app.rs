//! Debugger application state and logic.

use crate::asm::disasm::disassemble_lines;
use crate::cpu::TraceEntry;
use crate::Vm;
use std::collections::HashSet;

/// Instructions executed per tick while running continuously.
const RUN_CHUNK: u32 = 64;

/// Bytes shown per memory row.
pub const ROW_BYTES: usize = 8;

/// Debugger application state.
pub struct DebuggerApp {
    /// The VM being debugged.
    pub vm: Vm,
    /// Original program for reference.
    pub program: Vec<u8>,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<u16>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset, in rows.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a new debugger around a VM that already holds the program.
    pub fn new(vm: Vm, program: Vec<u8>) -> Self {
        let mem_scroll = vm.heap_start() as usize / ROW_BYTES;
        Self {
            vm,
            program,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            mem_scroll,
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        let pc = self.vm.pc();
        match self.vm.step() {
            Ok(instr) => {
                self.status = TraceEntry::new(pc, &instr, &self.vm).to_string();
                if instr == crate::Instruction::Hlt {
                    self.running = false;
                    self.status = format!("Halted at {:04X} after {} cycles", pc, self.vm.cycles);
                }
            }
            Err(e) => {
                self.status = format!("Fault: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or fault.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one chunk of continuous execution, stopping at breakpoints.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        for i in 0..RUN_CHUNK {
            // Don't stop on the breakpoint we are resuming from
            let pc = self.vm.pc();
            if i > 0 && self.breakpoints.contains(&pc) {
                self.running = false;
                self.status = format!("Breakpoint at PC={:04X}", pc);
                return;
            }

            self.step();
            if !self.running {
                return;
            }
        }
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.vm.pc();
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at PC={:04X}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={:04X}", pc);
        }
    }

    /// Reset VM to initial state with the program reloaded.
    pub fn reset(&mut self) {
        self.vm.reset();
        self.running = false;
        self.status = match self.vm.load_program(&self.program) {
            Ok(()) => "Reset. Ready.".into(),
            Err(e) => format!("Reload failed: {}", e),
        };
    }

    pub fn scroll_up(&mut self) {
        self.mem_scroll = self.mem_scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        let rows = self.vm.capacity().div_ceil(ROW_BYTES);
        if self.mem_scroll + 1 < rows {
            self.mem_scroll += 1;
        }
    }

    /// Get disassembly starting at the current PC.
    ///
    /// Instructions are variable length, so the listing runs forward from
    /// the PC rather than centering on it.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u16, String, bool)> {
        let pc = self.vm.pc();
        let window = self.vm.mem.slice(pc as usize, lines * 3);

        disassemble_lines(window, pc)
            .into_iter()
            .take(lines)
            .map(|line| (line.addr, line.text, line.addr == pc))
            .collect()
    }
}

/// Run the debugger on a VM that already holds `program` at its heap.
pub fn run_debugger(vm: Vm, program: Vec<u8>) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(vm, program);

    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => app.scroll_up(),
                        KeyCode::Down => app.scroll_down(),
                        _ => {}
                    }
                }
            }
        }

        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
