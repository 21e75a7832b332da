//! Execution engine.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//! A [`Vm`] owns its memory and registers; the host drives it with
//! [`Vm::steps`] and inspects it between calls.

use crate::config::{ConfigError, VmConfig, FRAME_SIZE};
use crate::cpu::alu;
use crate::cpu::decode::{self, Instruction};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::Flags;
use crate::cpu::{Memory, Registers};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Result of a [`Vm::steps`] call that did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Instructions executed, including a terminating HLT.
    pub executed: u32,
    /// The call stopped early on HLT.
    pub halted: bool,
}

/// The virtual machine.
#[derive(Clone, Serialize, Deserialize)]
pub struct Vm {
    /// Registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Region layout.
    config: VmConfig,
    /// Instruction count since construction (for profiling).
    pub cycles: u64,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Vm {
    /// Create a VM with zeroed memory and freshly initialized registers.
    pub fn new(config: VmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            regs: Registers::new(config.heap_start, config.stack_start),
            mem: Memory::new(config.capacity),
            config,
            cycles: 0,
            last_instr: None,
        })
    }

    /// Reset the registers: PC to the heap, SP to the stack, ACC and flags
    /// to zero. Memory is left untouched.
    pub fn init(&mut self) {
        self.regs.reset(self.config.heap_start, self.config.stack_start);
        self.last_instr = None;
    }

    /// Reset the registers and zero all memory.
    pub fn reset(&mut self) {
        self.init();
        self.mem.clear();
        self.cycles = 0;
    }

    /// Copy a program into memory at the start of the heap.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), MemoryError> {
        self.mem.load(self.config.heap_start, program)
    }

    /// Execute up to `n` instructions.
    ///
    /// Stops early after a HLT or on the first fault. A fault leaves the PC at
    /// the opcode of the faulting instruction.
    pub fn steps(&mut self, n: u32) -> Result<StepReport, ExecutionFault> {
        let mut executed = 0;
        while executed < n {
            let instr = self.step()?;
            executed += 1;
            if instr == Instruction::Hlt {
                return Ok(StepReport { executed, halted: true });
            }
        }
        Ok(StepReport { executed, halted: false })
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed, or the fault it raised.
    pub fn step(&mut self) -> Result<Instruction, ExecutionFault> {
        let start = self.regs.pc;
        match self.fetch_decode().and_then(|(instr, next)| self.advance(instr, next)) {
            Ok(instr) => {
                self.cycles += 1;
                self.last_instr = Some(instr);
                Ok(instr)
            }
            Err(kind) => {
                self.regs.pc = start;
                Err(ExecutionFault { kind, pc: start })
            }
        }
    }

    /// Fetch the opcode at PC and its operand bytes.
    ///
    /// Returns the instruction and the address following it, which is
    /// `0x10000` for an instruction ending at `0xFFFF`.
    fn fetch_decode(&self) -> Result<(Instruction, u32), FaultKind> {
        let pc = self.regs.pc as u32;
        let (opcode, len) = decode::decode(self.fetch(pc)?);
        let mut operands = [0u8; 2];
        for (addr, slot) in (pc + 1..).zip(operands.iter_mut().take(len)) {
            *slot = self.fetch(addr)?;
        }
        let next = pc + 1 + len as u32;
        Ok((Instruction::with_operands(opcode, operands), next))
    }

    /// Read one instruction byte.
    fn fetch(&self, addr: u32) -> Result<u8, FaultKind> {
        let addr = u16::try_from(addr).map_err(|_| FaultKind::OutOfBounds { addr })?;
        Ok(self.mem.read(addr)?)
    }

    /// Move PC past the instruction and execute it.
    ///
    /// An instruction ending at `0xFFFF` runs only when it transfers control;
    /// falling through would leave PC outside the address space.
    fn advance(&mut self, instr: Instruction, next: u32) -> Result<Instruction, FaultKind> {
        self.regs.pc = match u16::try_from(next) {
            Ok(pc) => pc,
            Err(_) if !self.falls_through(instr) => self.regs.pc,
            Err(_) => return Err(FaultKind::OutOfBounds { addr: next }),
        };
        self.execute(instr)?;
        Ok(instr)
    }

    /// Whether execution continues at the following instruction.
    fn falls_through(&self, instr: Instruction) -> bool {
        match instr {
            Instruction::Jmp { .. } | Instruction::Ret => false,
            Instruction::Jmz { .. } => !self.regs.flags.zero,
            Instruction::Jmn { .. } => !self.regs.flags.negative,
            // JSR pushes the following address
            _ => true,
        }
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction) -> Result<(), FaultKind> {
        match instr {
            // ==================== Data Transfer ====================

            Instruction::LdaZ { addr } => {
                self.regs.acc = self.mem.read(addr as u16)?;
            }

            Instruction::LdaI { value } => {
                self.regs.acc = value;
            }

            Instruction::Lda { addr } => {
                self.regs.acc = self.mem.read(addr)?;
            }

            Instruction::StaZ { addr } => {
                self.mem.write(addr as u16, self.regs.acc)?;
            }

            Instruction::Sta { addr } => {
                self.mem.write(addr, self.regs.acc)?;
            }

            // ==================== Arithmetic ====================

            Instruction::Add { addr } => {
                let operand = self.mem.read(addr)?;
                self.add(operand);
            }

            Instruction::AddI { value } => {
                self.add(value);
            }

            Instruction::Sub { addr } => {
                let operand = self.mem.read(addr)?;
                self.sub(operand);
            }

            Instruction::SubI { value } => {
                self.sub(value);
            }

            // ==================== Control Flow ====================

            Instruction::Jmp { addr } => {
                self.regs.jump(addr);
            }

            Instruction::Jmz { addr } => {
                if self.regs.flags.zero {
                    self.regs.jump(addr);
                }
            }

            Instruction::Jmn { addr } => {
                if self.regs.flags.negative {
                    self.regs.jump(addr);
                }
            }

            Instruction::Jsr { addr } => {
                let return_addr = self.regs.pc;
                self.push(return_addr)?;
                self.regs.jump(addr);
            }

            Instruction::Ret => {
                let return_addr = self.pop()?;
                self.regs.jump(return_addr);
            }

            // ==================== Special ====================

            Instruction::Nop | Instruction::Hlt | Instruction::Unknown(_) => {}
        }

        Ok(())
    }

    fn add(&mut self, operand: u8) {
        let (value, carry) = alu::add(self.regs.acc, operand, self.regs.flags.carry);
        self.regs.set_result(value, carry);
    }

    fn sub(&mut self, operand: u8) {
        let (value, borrow) = alu::sub(self.regs.acc, operand, self.regs.flags.carry);
        self.regs.set_result(value, borrow);
    }

    /// Push a return address onto the call stack.
    fn push(&mut self, value: u16) -> Result<(), FaultKind> {
        let sp = self.regs.sp;
        let next = sp as usize + FRAME_SIZE;
        if next > self.mem.len() {
            return Err(FaultKind::StackOverflow);
        }
        // SP must stay addressable, so the top frame of a 64 KiB buffer is unused
        let next = u16::try_from(next).map_err(|_| FaultKind::StackOverflow)?;
        self.mem.write_word(sp, value)?;
        self.regs.sp = next;
        Ok(())
    }

    /// Pop a return address from the call stack.
    fn pop(&mut self) -> Result<u16, FaultKind> {
        let sp = self.regs.sp;
        if (sp as usize) < self.config.stack_start as usize + FRAME_SIZE {
            return Err(FaultKind::StackUnderflow);
        }
        let top = sp - FRAME_SIZE as u16;
        let value = self.mem.read_word(top)?;
        self.regs.sp = top;
        Ok(value)
    }

    /// Return addresses currently on the call stack, innermost last.
    pub fn call_stack(&self) -> Vec<u16> {
        let start = self.config.stack_start;
        let depth = self.regs.sp.saturating_sub(start) as usize / FRAME_SIZE;
        (0..depth)
            .filter_map(|i| self.mem.read_word(start + (i * FRAME_SIZE) as u16).ok())
            .collect()
    }

    /// Offset of the program/data region.
    pub fn heap_start(&self) -> u16 {
        self.config.heap_start
    }

    /// Offset of the call-stack region.
    pub fn stack_start(&self) -> u16 {
        self.config.stack_start
    }

    /// Memory size in bytes.
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn pc(&self) -> u16 {
        self.regs.pc
    }

    pub fn acc(&self) -> u8 {
        self.regs.acc
    }

    pub fn sp(&self) -> u16 {
        self.regs.sp
    }

    pub fn flags(&self) -> Flags {
        self.regs.flags
    }

    /// Host read of one memory byte.
    pub fn read(&self, addr: u16) -> Result<u8, MemoryError> {
        self.mem.read(addr)
    }

    /// Host write of one memory byte.
    pub fn write(&mut self, addr: u16, value: u8) -> Result<(), MemoryError> {
        self.mem.write(addr, value)
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Register view for dumps and traces.
    pub fn snapshot(&self) -> VmSnapshot {
        VmSnapshot {
            pc: self.regs.pc,
            acc: self.regs.acc,
            sp: self.regs.sp,
            flags: self.regs.flags,
            cycles: self.cycles,
            call_depth: self.call_stack().len(),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        let config = VmConfig::default();
        Self {
            regs: Registers::new(config.heap_start, config.stack_start),
            mem: Memory::new(config.capacity),
            config,
            cycles: 0,
            last_instr: None,
        }
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("config", &self.config)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Serializable register state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub pc: u16,
    pub acc: u8,
    pub sp: u16,
    pub flags: Flags,
    pub cycles: u64,
    pub call_depth: usize,
}

/// One executed instruction, for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Address the instruction was fetched from.
    pub addr: u16,
    /// Assembly text.
    pub instr: String,
    pub acc: u8,
    pub flags: String,
    pub sp: u16,
}

impl TraceEntry {
    pub fn new(addr: u16, instr: &Instruction, vm: &Vm) -> Self {
        Self {
            addr,
            instr: instr.to_string(),
            acc: vm.acc(),
            flags: vm.flags().to_string(),
            sp: vm.sp(),
        }
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04X}: {:<16} ACC={:02X} {} SP={:04X}",
            self.addr, self.instr, self.acc, self.flags, self.sp
        )
    }
}

/// What went wrong during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FaultKind {
    #[error("address {addr:#06x} out of bounds")]
    OutOfBounds { addr: u32 },

    #[error("RET with an empty call stack")]
    StackUnderflow,

    #[error("JSR with a full call stack")]
    StackOverflow,
}

impl From<MemoryError> for FaultKind {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::OutOfBounds(addr) => FaultKind::OutOfBounds { addr },
            MemoryError::ProgramTooLarge { size, .. } => FaultKind::OutOfBounds { addr: size as u32 },
        }
    }
}

/// A fault raised by an instruction. Aborts the current `steps` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} at PC={pc:#06x}")]
pub struct ExecutionFault {
    pub kind: FaultKind,
    /// Address of the faulting instruction's opcode.
    pub pc: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use proptest::prelude::*;

    fn make_program(instructions: &[Instruction]) -> Vec<u8> {
        instructions.iter().flat_map(encode).collect()
    }

    fn vm_with(instructions: &[Instruction]) -> Vm {
        let mut vm = Vm::default();
        vm.load_program(&make_program(instructions)).unwrap();
        vm
    }

    #[test]
    fn test_init_state() {
        let config = VmConfig { capacity: 1024, heap_start: 0x100, stack_start: 0x300 };
        let mut vm = Vm::new(config).unwrap();
        vm.write(0x100, 0x11).unwrap();
        vm.regs.acc = 7;

        vm.init();
        assert_eq!(vm.pc(), 0x100);
        assert_eq!(vm.sp(), 0x300);
        assert_eq!(vm.acc(), 0);
        assert_eq!(vm.flags(), Flags::default());
        assert_eq!(vm.heap_start(), 0x100);
        assert_eq!(vm.stack_start(), 0x300);
        // Memory survives init
        assert_eq!(vm.read(0x100).unwrap(), 0x11);
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let config = VmConfig { capacity: 0, ..VmConfig::default() };
        assert!(Vm::new(config).is_err());
    }

    #[test]
    fn test_load_add_store_scenario() {
        let mut vm = vm_with(&[
            Instruction::LdaI { value: 5 },
            Instruction::AddI { value: 3 },
            Instruction::StaZ { addr: 0x10 },
        ]);

        let report = vm.steps(3).unwrap();

        assert_eq!(report, StepReport { executed: 3, halted: false });
        assert_eq!(vm.acc(), 8);
        assert_eq!(vm.read(0x10).unwrap(), 8);
        assert!(!vm.flags().zero);
        assert!(!vm.flags().carry);
        assert_eq!(vm.pc(), 6);
    }

    #[test]
    fn test_sub_underflow_borrows() {
        let mut vm = vm_with(&[Instruction::SubI { value: 1 }]);
        vm.steps(1).unwrap();
        assert_eq!(vm.acc(), 255);
        assert!(vm.flags().carry);
        assert!(vm.flags().negative);
        assert!(!vm.flags().zero);
    }

    #[test]
    fn test_sub_from_memory() {
        let mut vm = vm_with(&[
            Instruction::LdaI { value: 10 },
            Instruction::Sub { addr: 0x0200 },
        ]);
        vm.write(0x0200, 10).unwrap();
        vm.steps(2).unwrap();
        assert_eq!(vm.acc(), 0);
        assert!(vm.flags().zero);
        assert!(!vm.flags().carry);
    }

    #[test]
    fn test_add_uses_carry_in() {
        let mut vm = vm_with(&[
            Instruction::LdaI { value: 0xFF },
            Instruction::AddI { value: 1 },
            Instruction::LdaI { value: 1 },
            Instruction::Add { addr: 0x0200 },
        ]);
        vm.write(0x0200, 1).unwrap();

        vm.steps(2).unwrap();
        assert_eq!(vm.acc(), 0);
        assert!(vm.flags().carry && vm.flags().zero);

        vm.steps(2).unwrap();
        assert_eq!(vm.acc(), 3);
        assert!(!vm.flags().carry);
    }

    #[test]
    fn test_loads_and_stores_keep_flags() {
        let mut vm = vm_with(&[
            Instruction::SubI { value: 1 },
            Instruction::LdaI { value: 0 },
            Instruction::Sta { addr: 0x0300 },
            Instruction::LdaZ { addr: 0x40 },
        ]);
        vm.steps(1).unwrap();
        let flags = vm.flags();
        vm.steps(3).unwrap();
        assert_eq!(vm.flags(), flags);
        assert_eq!(vm.acc(), 0);
    }

    #[test]
    fn test_steps_zero_is_noop() {
        let mut vm = vm_with(&[Instruction::LdaI { value: 5 }]);
        let before = vm.clone();

        let report = vm.steps(0).unwrap();

        assert_eq!(report.executed, 0);
        assert_eq!(vm.regs, before.regs);
        assert_eq!(vm.mem, before.mem);
    }

    #[test]
    fn test_unknown_opcode_is_single_byte_noop() {
        let mut vm = Vm::default();
        vm.load_program(&[0xFF, 0x11, 0x07]).unwrap();
        vm.regs.acc = 0x42;
        vm.regs.flags = Flags::from_bits(0x05);

        vm.steps(1).unwrap();
        assert_eq!(vm.pc(), 1);
        assert_eq!(vm.acc(), 0x42);
        assert_eq!(vm.flags().bits(), 0x05);

        vm.steps(1).unwrap();
        assert_eq!(vm.acc(), 7);
    }

    #[test]
    fn test_jmp() {
        let mut vm = vm_with(&[
            Instruction::Jmp { addr: 0x0010 },
        ]);
        vm.steps(1).unwrap();
        assert_eq!(vm.pc(), 0x0010);
    }

    #[test]
    fn test_conditional_jumps_taken() {
        let mut vm = vm_with(&[
            Instruction::LdaI { value: 0 },
            Instruction::AddI { value: 0 },
            Instruction::Jmz { addr: 0x0080 },
        ]);
        vm.steps(3).unwrap();
        assert_eq!(vm.pc(), 0x0080);

        let mut vm = vm_with(&[
            Instruction::LdaI { value: 0x7F },
            Instruction::AddI { value: 1 },
            Instruction::Jmn { addr: 0x0090 },
        ]);
        vm.steps(3).unwrap();
        assert_eq!(vm.pc(), 0x0090);
    }

    #[test]
    fn test_conditional_jumps_fall_through() {
        let mut vm = vm_with(&[
            Instruction::LdaI { value: 1 },
            Instruction::AddI { value: 1 },
            Instruction::Jmz { addr: 0x0080 },
            Instruction::Jmn { addr: 0x0080 },
        ]);
        vm.steps(3).unwrap();
        assert_eq!(vm.pc(), 7);
        vm.steps(1).unwrap();
        assert_eq!(vm.pc(), 10);
    }

    #[test]
    fn test_jmz_sees_flag_not_accumulator() {
        // ACC is zero after the load, but the flag still reflects the ADD.
        let mut vm = vm_with(&[
            Instruction::AddI { value: 1 },
            Instruction::LdaI { value: 0 },
            Instruction::Jmz { addr: 0x0080 },
        ]);
        vm.steps(3).unwrap();
        assert_eq!(vm.pc(), 7);
    }

    #[test]
    fn test_jsr_ret() {
        // 0x00: JSR 0x0010 ; 0x03: LDA_I 9 ; 0x10: LDA_I 1 ; RET
        let mut vm = Vm::default();
        vm.load_program(&make_program(&[
            Instruction::Jsr { addr: 0x0010 },
            Instruction::LdaI { value: 9 },
        ]))
        .unwrap();
        vm.mem
            .load(0x10, &make_program(&[Instruction::LdaI { value: 1 }, Instruction::Ret]))
            .unwrap();

        vm.steps(1).unwrap();
        assert_eq!(vm.pc(), 0x10);
        assert_eq!(vm.sp(), vm.stack_start() + 2);
        assert_eq!(vm.call_stack(), vec![3]);
        assert_eq!(vm.mem.read_word(vm.stack_start()).unwrap(), 3);

        vm.steps(2).unwrap();
        assert_eq!(vm.pc(), 3);
        assert_eq!(vm.sp(), vm.stack_start());
        assert_eq!(vm.acc(), 1);

        vm.steps(1).unwrap();
        assert_eq!(vm.acc(), 9);
    }

    #[test]
    fn test_nested_calls() {
        let mut vm = Vm::default();
        // main: JSR a ; HLT     a (0x20): JSR b ; RET     b (0x30): ADD_I 1 ; RET
        vm.load_program(&make_program(&[Instruction::Jsr { addr: 0x20 }, Instruction::Hlt]))
            .unwrap();
        vm.mem
            .load(0x20, &make_program(&[Instruction::Jsr { addr: 0x30 }, Instruction::Ret]))
            .unwrap();
        vm.mem
            .load(0x30, &make_program(&[Instruction::AddI { value: 1 }, Instruction::Ret]))
            .unwrap();

        let report = vm.steps(100).unwrap();

        assert_eq!(report, StepReport { executed: 6, halted: true });
        assert_eq!(vm.acc(), 1);
        assert_eq!(vm.pc(), 4);
        assert_eq!(vm.sp(), vm.stack_start());
    }

    #[test]
    fn test_halt_ends_only_current_call() {
        let mut vm = vm_with(&[
            Instruction::LdaI { value: 1 },
            Instruction::Hlt,
            Instruction::LdaI { value: 2 },
        ]);
        let report = vm.steps(10).unwrap();
        assert_eq!(report, StepReport { executed: 2, halted: true });
        assert_eq!(vm.pc(), 3);

        vm.steps(1).unwrap();
        assert_eq!(vm.acc(), 2);
    }

    #[test]
    fn test_ret_underflow_faults() {
        let mut vm = vm_with(&[Instruction::Nop, Instruction::Ret]);
        let err = vm.steps(5).unwrap_err();
        assert_eq!(err, ExecutionFault { kind: FaultKind::StackUnderflow, pc: 1 });
        assert_eq!(vm.pc(), 1);
        assert_eq!(vm.sp(), vm.stack_start());
    }

    #[test]
    fn test_jsr_overflow_faults() {
        let config = VmConfig { capacity: 64, heap_start: 0, stack_start: 60 };
        let mut vm = Vm::new(config).unwrap();
        // Recurse forever: 0x00: JSR 0x0000
        vm.load_program(&make_program(&[Instruction::Jsr { addr: 0 }])).unwrap();

        let err = vm.steps(10).unwrap_err();
        assert_eq!(err.kind, FaultKind::StackOverflow);
        assert_eq!(err.pc, 0);
        assert_eq!(vm.call_stack(), vec![3, 3]);
    }

    #[test]
    fn test_out_of_bounds_read_faults() {
        let config = VmConfig { capacity: 256, heap_start: 0, stack_start: 128 };
        let mut vm = Vm::new(config).unwrap();
        vm.load_program(&make_program(&[
            Instruction::LdaI { value: 3 },
            Instruction::Lda { addr: 0x1000 },
        ]))
        .unwrap();

        let err = vm.steps(2).unwrap_err();
        assert_eq!(err, ExecutionFault { kind: FaultKind::OutOfBounds { addr: 0x1000 }, pc: 2 });
        assert_eq!(vm.acc(), 3);
        assert_eq!(vm.pc(), 2);
    }

    #[test]
    fn test_out_of_bounds_write_faults() {
        let config = VmConfig { capacity: 256, heap_start: 0, stack_start: 128 };
        let mut vm = Vm::new(config).unwrap();
        vm.load_program(&make_program(&[Instruction::Sta { addr: 0x0100 }])).unwrap();
        let err = vm.steps(1).unwrap_err();
        assert_eq!(err.kind, FaultKind::OutOfBounds { addr: 0x0100 });
    }

    #[test]
    fn test_jump_outside_memory_faults_on_fetch() {
        let config = VmConfig { capacity: 256, heap_start: 0, stack_start: 128 };
        let mut vm = Vm::new(config).unwrap();
        vm.load_program(&make_program(&[Instruction::Jmp { addr: 0x4000 }])).unwrap();

        let err = vm.steps(2).unwrap_err();
        assert_eq!(err, ExecutionFault { kind: FaultKind::OutOfBounds { addr: 0x4000 }, pc: 0x4000 });
    }

    #[test]
    fn test_truncated_operand_at_end_of_memory_faults() {
        let config = VmConfig { capacity: 16, heap_start: 0, stack_start: 8 };
        let mut vm = Vm::new(config).unwrap();
        vm.write(15, 0x41).unwrap();
        vm.regs.pc = 15;

        let err = vm.step().unwrap_err();
        assert_eq!(err, ExecutionFault { kind: FaultKind::OutOfBounds { addr: 16 }, pc: 15 });
        assert_eq!(vm.pc(), 15);
    }

    fn full_vm() -> Vm {
        let config = VmConfig { capacity: 0x1_0000, heap_start: 0, stack_start: 0xFFFC };
        Vm::new(config).unwrap()
    }

    #[test]
    fn test_fall_through_past_top_of_address_space() {
        let mut vm = full_vm();
        vm.write(0xFFFE, 0x32).unwrap();
        vm.write(0xFFFF, 0x01).unwrap();
        vm.regs.pc = 0xFFFE;

        let err = vm.steps(1).unwrap_err();
        assert_eq!(err, ExecutionFault { kind: FaultKind::OutOfBounds { addr: 0x1_0000 }, pc: 0xFFFE });
        assert_eq!(vm.pc(), 0xFFFE);
        assert_eq!(vm.acc(), 0);
        assert_eq!(vm.cycles, 0);
    }

    #[test]
    fn test_jump_ending_at_top_of_address_space() {
        let mut vm = full_vm();
        vm.mem.load(0xFFFD, &encode(&Instruction::Jmp { addr: 0x0010 })).unwrap();
        vm.regs.pc = 0xFFFD;

        let report = vm.steps(1).unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(vm.pc(), 0x0010);
    }

    #[test]
    fn test_conditional_jump_ending_at_top_of_address_space() {
        let mut vm = full_vm();
        vm.mem.load(0xFFFD, &encode(&Instruction::Jmz { addr: 0x0020 })).unwrap();

        vm.regs.pc = 0xFFFD;
        vm.regs.flags.zero = true;
        vm.step().unwrap();
        assert_eq!(vm.pc(), 0x0020);

        vm.regs.pc = 0xFFFD;
        vm.regs.flags.zero = false;
        let err = vm.step().unwrap_err();
        assert_eq!(err.kind, FaultKind::OutOfBounds { addr: 0x1_0000 });
        assert_eq!(vm.pc(), 0xFFFD);
    }

    #[test]
    fn test_call_at_top_of_address_space_needs_return_address() {
        let mut vm = full_vm();
        vm.mem.load(0xFFFD, &encode(&Instruction::Jsr { addr: 0x0000 })).unwrap();
        vm.regs.pc = 0xFFFD;

        let err = vm.step().unwrap_err();
        assert_eq!(err.kind, FaultKind::OutOfBounds { addr: 0x1_0000 });
        assert_eq!(vm.sp(), 0xFFFC);
    }

    #[test]
    fn test_stack_frame_at_top_of_full_buffer() {
        let mut vm = full_vm();
        let program = make_program(&[
            Instruction::Jsr { addr: 0x0003 },
            Instruction::Jsr { addr: 0x0006 },
            Instruction::Ret,
        ]);
        vm.load_program(&program).unwrap();

        let err = vm.steps(3).unwrap_err();
        assert_eq!(err, ExecutionFault { kind: FaultKind::StackOverflow, pc: 3 });
        assert_eq!(vm.sp(), 0xFFFE);
        assert_eq!(vm.call_stack(), vec![3]);
        assert_eq!(vm.read(0xFFFE).unwrap(), 0);

        // The remaining frame still unwinds
        vm.regs.pc = 6;
        vm.step().unwrap();
        assert_eq!(vm.pc(), 3);
        assert_eq!(vm.sp(), 0xFFFC);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut vm = vm_with(&[Instruction::LdaI { value: 0x80 }, Instruction::AddI { value: 0 }]);
        vm.steps(2).unwrap();
        let snap = vm.snapshot();
        assert_eq!(snap.acc, 0x80);
        assert_eq!(snap.cycles, 2);

        let json = serde_json::to_string(&snap).unwrap();
        let back: VmSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_trace_entry_format() {
        let mut vm = vm_with(&[Instruction::LdaI { value: 5 }]);
        let instr = vm.step().unwrap();
        let entry = TraceEntry::new(0, &instr, &vm);
        assert_eq!(entry.to_string(), "0000: LDA_I 5          ACC=05 --- SP=0C00");
    }

    proptest! {
        #[test]
        fn lda_sta_roundtrip(value in any::<u8>(), src in 0x100u16..0xC00, dst in 0x100u16..0xC00) {
            prop_assume!(src != dst);
            let mut vm = vm_with(&[Instruction::Lda { addr: src }, Instruction::Sta { addr: dst }]);
            vm.write(src, value).unwrap();
            vm.steps(2).unwrap();
            prop_assert_eq!(vm.read(dst).unwrap(), value);
            prop_assert_eq!(vm.read(src).unwrap(), value);
        }

        #[test]
        fn add_immediates(a in any::<u8>(), b in any::<u8>()) {
            let mut vm = vm_with(&[Instruction::LdaI { value: a }, Instruction::AddI { value: b }]);
            vm.steps(2).unwrap();
            let wide = a as u16 + b as u16;
            prop_assert_eq!(vm.acc() as u16, wide % 256);
            prop_assert_eq!(vm.flags().carry, wide > 255);
            prop_assert_eq!(vm.flags().zero, vm.acc() == 0);
            prop_assert_eq!(vm.flags().negative, vm.acc() >= 128);
        }

        #[test]
        fn sub_restores_add(a in any::<u8>(), x in 0u8..=255) {
            // Keep carry-in zero throughout by staying below overflow.
            prop_assume!(a as u16 + x as u16 <= 255);
            let mut vm = vm_with(&[
                Instruction::LdaI { value: a },
                Instruction::AddI { value: x },
                Instruction::SubI { value: x },
            ]);
            vm.steps(3).unwrap();
            prop_assert_eq!(vm.acc(), a);
            prop_assert!(!vm.flags().carry);
        }

        #[test]
        fn flags_follow_result(a in any::<u8>(), b in any::<u8>()) {
            let mut vm = vm_with(&[Instruction::LdaI { value: a }, Instruction::SubI { value: b }]);
            vm.steps(2).unwrap();
            prop_assert_eq!(vm.flags().zero, vm.acc() == 0);
            prop_assert_eq!(vm.flags().negative, vm.acc() >= 128);
            prop_assert_eq!(vm.flags().carry, b > a);
        }

        #[test]
        fn nested_calls_unwind(depth in 1usize..64) {
            // Chain of subroutines at 0x100 + 4*i, each calling the next.
            let mut vm = Vm::default();
            vm.load_program(&make_program(&[Instruction::Jsr { addr: 0x100 }, Instruction::Hlt])).unwrap();
            for i in 0..depth {
                let base = 0x100 + 4 * i as u16;
                let body = if i + 1 < depth {
                    make_program(&[Instruction::Jsr { addr: base + 4 }, Instruction::Ret])
                } else {
                    make_program(&[Instruction::AddI { value: 1 }, Instruction::Ret])
                };
                vm.mem.load(base, &body).unwrap();
            }
            let report = vm.steps(10_000).unwrap();
            prop_assert!(report.halted);
            prop_assert_eq!(vm.pc(), 4);
            prop_assert_eq!(vm.sp(), vm.stack_start());
            prop_assert_eq!(vm.acc(), 1);
        }

        #[test]
        fn random_programs_never_exceed_budget(
            program in prop::collection::vec(any::<u8>(), 1..256),
            n in 0u32..512
        ) {
            let config = VmConfig { capacity: 512, heap_start: 0, stack_start: 384 };
            let mut vm = Vm::new(config).unwrap();
            vm.load_program(&program).unwrap();
            match vm.steps(n) {
                Ok(report) => {
                    prop_assert!(report.executed <= n);
                    prop_assert!(report.halted || report.executed == n);
                }
                Err(fault) => prop_assert_eq!(vm.pc(), fault.pc),
            }
            prop_assert!(vm.cycles <= n as u64);
        }
    }
}
