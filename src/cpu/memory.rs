//! Linear byte memory.
//!
//! One owned buffer holds both the program/data region and the call-stack
//! region. Every address is a 16-bit offset from the start of the buffer.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// A flat, fixed-capacity byte buffer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<u8>,
}

impl Memory {
    /// Create a zeroed memory of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: vec![0; capacity],
        }
    }

    /// Number of addressable bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True for a zero-capacity buffer.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read one byte.
    #[inline]
    pub fn read(&self, addr: u16) -> Result<u8, MemoryError> {
        self.cells
            .get(addr as usize)
            .copied()
            .ok_or(MemoryError::OutOfBounds(addr as u32))
    }

    /// Write one byte.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) -> Result<(), MemoryError> {
        let cell = self.cells
            .get_mut(addr as usize)
            .ok_or(MemoryError::OutOfBounds(addr as u32))?;
        *cell = value;
        Ok(())
    }

    /// Read a little-endian 16-bit value from `addr` and `addr + 1`.
    pub fn read_word(&self, addr: u16) -> Result<u16, MemoryError> {
        let low = self.read(addr)?;
        let high_addr = addr.checked_add(1).ok_or(MemoryError::OutOfBounds(addr as u32 + 1))?;
        let high = self.read(high_addr)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    /// Write a little-endian 16-bit value to `addr` and `addr + 1`.
    ///
    /// Both bytes are checked before either is written.
    pub fn write_word(&mut self, addr: u16, value: u16) -> Result<(), MemoryError> {
        let end = addr as usize + 1;
        if end >= self.cells.len() {
            return Err(MemoryError::OutOfBounds(end as u32));
        }
        let [low, high] = value.to_le_bytes();
        self.cells[addr as usize] = low;
        self.cells[end] = high;
        Ok(())
    }

    /// Copy `bytes` into memory starting at `offset`.
    pub fn load(&mut self, offset: u16, bytes: &[u8]) -> Result<(), MemoryError> {
        let start = offset as usize;
        let available = self.cells.len().saturating_sub(start);
        if bytes.len() > available {
            return Err(MemoryError::ProgramTooLarge {
                size: bytes.len(),
                available,
            });
        }
        self.cells[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Borrow a window of memory, clipped to the buffer.
    pub fn slice(&self, start: usize, count: usize) -> &[u8] {
        let start = start.min(self.cells.len());
        let end = start.saturating_add(count).min(self.cells.len());
        &self.cells[start..end]
    }

    /// Dump memory contents (for debugging).
    pub fn dump(&self, start: usize, count: usize) -> Vec<(usize, u8)> {
        self.slice(start, count)
            .iter()
            .enumerate()
            .map(|(i, &byte)| (start + i, byte))
            .collect()
    }

    /// Zero every byte.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// The whole buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.cells
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|&&b| b != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_bytes", &non_zero)
            .field("capacity", &self.cells.len())
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Address is outside the buffer.
    #[error("memory address {0:#06x} out of range")]
    OutOfBounds(u32),

    /// Program does not fit between its load offset and the end of memory.
    #[error("program size {size} exceeds available space {available}")]
    ProgramTooLarge { size: usize, available: usize },
}
