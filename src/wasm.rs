//! WebAssembly bindings for the ACC8 machine.
//!
//! Exposes the host boundary to JavaScript: `init`, `steps`, the region
//! offsets, the program counter, and direct memory access.

use wasm_bindgen::prelude::*;
use crate::{ExecutionFault, Vm, VmConfig};
use crate::asm::assembler::assemble_at;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn start() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly VM wrapper.
#[wasm_bindgen]
pub struct WasmVm {
    vm: Vm,
    halted: bool,
}

#[wasm_bindgen]
impl WasmVm {
    /// Create a VM with the default layout.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self { vm: Vm::default(), halted: false }
    }

    /// Create a VM with a custom layout.
    #[wasm_bindgen]
    pub fn with_layout(capacity: usize, heap_start: u16, stack_start: u16) -> Result<WasmVm, JsError> {
        let config = VmConfig { capacity, heap_start, stack_start };
        let vm = Vm::new(config).map_err(|e| JsError::new(&e.to_string()))?;
        Ok(Self { vm, halted: false })
    }

    /// Reset registers. Memory is kept.
    #[wasm_bindgen]
    pub fn init(&mut self) {
        self.vm.init();
        self.halted = false;
    }

    /// Execute up to `n` instructions. Returns the number executed.
    ///
    /// Check [`WasmVm::halted`] to tell a HLT from an exhausted budget.
    #[wasm_bindgen]
    pub fn steps(&mut self, n: u32) -> Result<u32, JsError> {
        self.run(n).map_err(|e| JsError::new(&e.to_string()))
    }

    /// Whether the last `steps` call stopped on a HLT.
    #[wasm_bindgen]
    pub fn halted(&self) -> bool {
        self.halted
    }

    #[wasm_bindgen]
    pub fn heap_start(&self) -> u16 {
        self.vm.heap_start()
    }

    #[wasm_bindgen]
    pub fn stack_start(&self) -> u16 {
        self.vm.stack_start()
    }

    #[wasm_bindgen]
    pub fn capacity(&self) -> usize {
        self.vm.capacity()
    }

    #[wasm_bindgen]
    pub fn pc(&self) -> u16 {
        self.vm.pc()
    }

    #[wasm_bindgen]
    pub fn acc(&self) -> u8 {
        self.vm.acc()
    }

    #[wasm_bindgen]
    pub fn sp(&self) -> u16 {
        self.vm.sp()
    }

    /// Flags packed as `C = 1`, `Z = 2`, `N = 4`.
    #[wasm_bindgen]
    pub fn flags(&self) -> u8 {
        self.vm.flags().bits()
    }

    /// Read one memory byte.
    #[wasm_bindgen]
    pub fn read(&self, addr: u16) -> Result<u8, JsError> {
        self.vm.read(addr).map_err(|e| JsError::new(&e.to_string()))
    }

    /// Write one memory byte.
    #[wasm_bindgen]
    pub fn write(&mut self, addr: u16, value: u8) -> Result<(), JsError> {
        self.vm.write(addr, value).map_err(|e| JsError::new(&e.to_string()))
    }

    /// Copy program bytes to the heap and reset registers.
    #[wasm_bindgen]
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), JsError> {
        self.vm.load_program(bytes).map_err(|e| JsError::new(&e.to_string()))?;
        self.init();
        Ok(())
    }

    /// Assemble source, load it at the heap and reset registers.
    /// Returns the program size in bytes.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let bytes = assemble_at(source, self.vm.heap_start())
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.load_bytes(&bytes)?;
        Ok(bytes.len())
    }

    /// Copy of a memory window, clipped to the buffer.
    #[wasm_bindgen]
    pub fn memory_slice(&self, start: usize, len: usize) -> js_sys::Uint8Array {
        js_sys::Uint8Array::from(self.vm.mem.slice(start, len))
    }

    /// Registers as a JSON string.
    #[wasm_bindgen]
    pub fn state_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.vm.snapshot()).map_err(|e| JsError::new(&e.to_string()))
    }
}

impl WasmVm {
    fn run(&mut self, n: u32) -> Result<u32, ExecutionFault> {
        self.halted = false;
        let report = self.vm.steps(n)?;
        self.halted = report.halted;
        Ok(report.executed)
    }
}

impl Default for WasmVm {
    fn default() -> Self {
        Self::new()
    }
}
