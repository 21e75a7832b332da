//! ACC8 - CLI Entry Point
//!
//! Commands:
//! - `acc8 run <program>` - Run an ASM source or program image
//! - `acc8 debug <program>` - Interactive debugger
//! - `acc8 asm <source>` - Assemble to a program image
//! - `acc8 disasm <image>` - Disassemble a program image
//! - `acc8 test` - Built-in self-test

use acc8::cpu::{ExecutionFault, TraceEntry, VmSnapshot};
use acc8::{Vm, VmConfig};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "acc8")]
#[command(version = "0.1.0")]
#[command(about = "A minimal 8-bit accumulator virtual machine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Memory layout options shared by `run` and `debug`.
#[derive(Args, Clone)]
struct LayoutArgs {
    /// JSON file with `capacity`, `heap_start` and `stack_start`
    #[arg(long)]
    config: Option<String>,
    /// Memory size in bytes
    #[arg(long)]
    capacity: Option<usize>,
    /// Program/data region offset (decimal or 0x hex)
    #[arg(long, value_parser = parse_u16)]
    heap_start: Option<u16>,
    /// Call-stack region offset (decimal or 0x hex)
    #[arg(long, value_parser = parse_u16)]
    stack_start: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts, faults or hits the step limit
    Run {
        /// Path to the ASM source or program image
        program: String,
        /// Maximum number of instructions to run
        #[arg(short, long, default_value = "100000")]
        max_steps: u64,
        /// Instructions per `steps` call
        #[arg(long, default_value = "1000")]
        chunk: u32,
        /// Show one trace line per instruction
        #[arg(short, long)]
        trace: bool,
        /// Emit trace and final state as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Interactive debugger
    Debug {
        /// Path to the ASM source or program image
        program: String,
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Assemble source to a program image (.hex text or .bin raw)
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
        /// Load address the labels resolve against
        #[arg(long, default_value = "0", value_parser = parse_u16)]
        base: u16,
    },
    /// Disassemble a program image
    Disasm {
        /// Path to the image file
        image: String,
        /// Load address of the first byte
        #[arg(long, default_value = "0", value_parser = parse_u16)]
        base: u16,
    },
    /// Run the built-in self-test
    Test,
}

/// Final state of a `run`, for JSON output.
#[derive(Serialize)]
struct RunSummary {
    executed: u64,
    halted: bool,
    fault: Option<ExecutionFault>,
    state: VmSnapshot,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, max_steps, chunk, trace, json, layout }) => {
            run_program(&program, max_steps, chunk, trace, json, &layout);
        }
        Some(Commands::Debug { program, layout }) => {
            debug_program(&program, &layout);
        }
        Some(Commands::Asm { source, output, base }) => {
            assemble_file(&source, output, base);
        }
        Some(Commands::Disasm { image, base }) => {
            disassemble_file(&image, base);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("ACC8 v0.1.0");
            println!("A minimal 8-bit accumulator virtual machine");
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn parse_u16(text: &str) -> Result<u16, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid 16-bit value '{}': {}", text, e))
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

/// Resolve the layout: defaults, then the JSON file, then flags.
fn build_config(layout: &LayoutArgs) -> VmConfig {
    let mut config = match &layout.config {
        Some(path) => VmConfig::from_json_file(path)
            .unwrap_or_else(|e| fail(format!("Failed to load config {}: {}", path, e))),
        None => VmConfig::default(),
    };
    if let Some(capacity) = layout.capacity {
        config.capacity = capacity;
    }
    if let Some(heap_start) = layout.heap_start {
        config.heap_start = heap_start;
    }
    if let Some(stack_start) = layout.stack_start {
        config.stack_start = stack_start;
    }
    config
}

/// Load an `.asm` source (assembled at `base`) or a program image.
fn read_program(path: &str, base: u16) -> Vec<u8> {
    let bytes = if path.ends_with(".asm") {
        let source = std::fs::read_to_string(path)
            .unwrap_or_else(|e| fail(format!("Failed to read file: {}", e)));
        acc8::assemble_at(&source, base)
            .unwrap_or_else(|e| fail(format!("Assembly error: {}", e)))
    } else {
        acc8::load_image(path)
            .unwrap_or_else(|e| fail(format!("Failed to load image: {}", e)))
            .bytes
    };

    if bytes.is_empty() {
        fail("No instructions to execute");
    }
    bytes
}

fn load_vm(path: &str, layout: &LayoutArgs) -> (Vm, Vec<u8>) {
    let config = build_config(layout);
    let mut vm = Vm::new(config).unwrap_or_else(|e| fail(format!("Invalid layout: {}", e)));
    let program = read_program(path, vm.heap_start());
    if let Err(e) = vm.load_program(&program) {
        fail(format!("Failed to load program: {}", e));
    }
    (vm, program)
}

fn run_program(path: &str, max_steps: u64, chunk: u32, trace: bool, json: bool, layout: &LayoutArgs) {
    let (mut vm, program) = load_vm(path, layout);

    if !json {
        println!("🔧 Running: {} ({} bytes at {:04X})", path, program.len(), vm.heap_start());
        println!();
        println!("━━━ Execution ━━━");
    }

    let mut executed = 0u64;
    let mut halted = false;
    let mut fault = None;

    while executed < max_steps && !halted && fault.is_none() {
        if trace {
            let pc = vm.pc();
            match vm.step() {
                Ok(instr) => {
                    executed += 1;
                    halted = instr == acc8::Instruction::Hlt;
                    let entry = TraceEntry::new(pc, &instr, &vm);
                    if json {
                        match serde_json::to_string(&entry) {
                            Ok(line) => println!("{}", line),
                            Err(e) => fail(e),
                        }
                    } else {
                        println!("{}", entry);
                    }
                }
                Err(e) => fault = Some(e),
            }
        } else {
            let n = (max_steps - executed).min(chunk.max(1) as u64) as u32;
            match vm.steps(n) {
                Ok(report) => {
                    executed += report.executed as u64;
                    halted = report.halted;
                }
                Err(e) => {
                    // The faulting instruction itself did not complete
                    executed = vm.cycles;
                    fault = Some(e);
                }
            }
        }
    }

    if json {
        let summary = RunSummary { executed, halted, fault, state: vm.snapshot() };
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => fail(e),
        }
    } else {
        let flags = vm.flags();
        println!();
        println!("━━━ Result ━━━");
        println!("Steps: {}", executed);
        println!("Halted: {}", halted);
        println!("PC:  {:04X}", vm.pc());
        println!("ACC: {:02X} ({})", vm.acc(), vm.acc());
        println!("SP:  {:04X} (depth {})", vm.sp(), vm.call_stack().len());
        println!("Flags: {} (C={} Z={} N={})", flags, flags.carry, flags.zero, flags.negative);

        if !halted && fault.is_none() {
            println!();
            println!("⚠️  Reached step limit ({}). Use --max-steps to increase.", max_steps);
        }
    }

    if let Some(e) = fault {
        fail(format!("Execution fault: {}", e));
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str, layout: &LayoutArgs) {
    let (vm, program) = load_vm(path, layout);

    println!("🚀 Launching debugger...");

    if let Err(e) = acc8::run_debugger(vm, program) {
        fail(format!("Debugger error: {}", e));
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str, _layout: &LayoutArgs) {
    fail("Debugger not available: rebuild with the `tui` feature");
}

fn assemble_file(source_path: &str, output: Option<String>, base: u16) {
    use acc8::{save_image, ProgramImage};

    let out_path = output.unwrap_or_else(|| {
        match source_path.strip_suffix(".asm") {
            Some(stem) => format!("{}.hex", stem),
            None => format!("{}.hex", source_path),
        }
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = std::fs::read_to_string(source_path)
        .unwrap_or_else(|e| fail(format!("Failed to read file: {}", e)));
    let bytes = acc8::assemble_at(&source, base)
        .unwrap_or_else(|e| fail(format!("Assembly error: {}", e)));

    println!("✓ Assembled {} bytes", bytes.len());

    if let Err(e) = save_image(&out_path, &ProgramImage::new(bytes), base) {
        fail(format!("Failed to save image: {}", e));
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str, base: u16) {
    let image = acc8::load_image(image_path)
        .unwrap_or_else(|e| fail(format!("Failed to load image: {}", e)));

    println!("{}", acc8::disassemble(&image.bytes, base));
}

fn run_self_test() {
    use acc8::cpu::FaultKind;

    println!("━━━ ACC8 Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    let cases: [(&str, &str, fn(&Vm, Result<acc8::StepReport, ExecutionFault>) -> bool); 5] = [
        (
            "Load/add/store",
            "LDA_I 5\nADD_I 3\nSTA_Z 0x10\nHLT",
            |vm, r| r.is_ok() && vm.acc() == 8 && vm.read(0x10) == Ok(8) && !vm.flags().zero && !vm.flags().carry,
        ),
        (
            "Subtract borrow",
            "SUB_I 1\nHLT",
            |vm, r| r.is_ok() && vm.acc() == 255 && vm.flags().carry,
        ),
        (
            "Unknown opcode is a no-op",
            "DB 0xFF\nHLT",
            |vm, r| r.is_ok() && vm.acc() == 0 && vm.flags().bits() == 0 && vm.pc() == 2,
        ),
        (
            "Call and return",
            "JSR SUB\nHLT\nSUB: LDA_I 42\nRET",
            |vm, r| r.is_ok() && vm.acc() == 42 && vm.pc() == 4 && vm.sp() == vm.stack_start(),
        ),
        (
            "Return underflow faults",
            "RET",
            |_, r| matches!(r, Err(ExecutionFault { kind: FaultKind::StackUnderflow, pc: 0 })),
        ),
    ];

    for (name, source, check) in cases {
        print!("{}... ", name);
        let ok = match acc8::assemble(source) {
            Ok(bytes) => {
                let mut vm = Vm::default();
                vm.load_program(&bytes).is_ok() && {
                    let result = vm.steps(100);
                    check(&vm, result)
                }
            }
            Err(_) => false,
        };
        if ok { println!("✓"); passed += 1; }
        else { println!("✗"); failed += 1; }
    }

    print!("steps(0) leaves state unchanged... ");
    let mut vm = Vm::default();
    let before = vm.snapshot();
    if vm.steps(0).is_ok() && vm.snapshot() == before {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
