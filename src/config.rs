//! Memory layout configuration.
//!
//! The host picks the buffer capacity and where the program/data region and
//! the call-stack region begin. Both are plain offsets into the buffer.

use serde::{Serialize, Deserialize};
use std::path::Path;
use thiserror::Error;

/// Largest buffer a 16-bit address can reach.
pub const MAX_CAPACITY: usize = 0x1_0000;

/// Default buffer size in bytes.
pub const DEFAULT_CAPACITY: usize = 0x1000;

/// Default start of the program/data region.
pub const DEFAULT_HEAP_START: u16 = 0x0000;

/// Default start of the call-stack region.
pub const DEFAULT_STACK_START: u16 = 0x0C00;

/// Size of one return-address frame on the call stack.
pub const FRAME_SIZE: usize = 2;

/// Memory layout of a VM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Total bytes in the memory buffer.
    pub capacity: usize,
    /// Offset of the program/data region. `init` points the PC here.
    pub heap_start: u16,
    /// Offset of the call-stack region. Grows upward towards `capacity`.
    pub stack_start: u16,
}

impl VmConfig {
    /// Check that the regions lie inside the buffer.
    ///
    /// Region overlap is the host's business and is not checked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(ConfigError::InvalidCapacity(self.capacity));
        }
        if self.heap_start as usize >= self.capacity {
            return Err(ConfigError::RegionOutOfRange {
                region: "heap",
                start: self.heap_start,
                capacity: self.capacity,
            });
        }
        if self.stack_start as usize + FRAME_SIZE > self.capacity {
            return Err(ConfigError::RegionOutOfRange {
                region: "stack",
                start: self.stack_start,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Number of return addresses the stack region can hold.
    pub fn stack_depth(&self) -> usize {
        let top = self.capacity.min(u16::MAX as usize);
        top.saturating_sub(self.stack_start as usize) / FRAME_SIZE
    }

    /// Parse and validate a JSON layout description.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON layout file from disk.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            heap_start: DEFAULT_HEAP_START,
            stack_start: DEFAULT_STACK_START,
        }
    }
}

/// Errors from building or loading a layout.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("capacity {0} must be between 1 and 65536 bytes")]
    InvalidCapacity(usize),

    #[error("{region} region start {start:#06x} does not fit in {capacity} bytes")]
    RegionOutOfRange {
        region: &'static str,
        start: u16,
        capacity: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = VmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stack_depth(), (0x1000 - 0x0C00) / 2);
    }

    #[test]
    fn test_stack_depth_at_top_of_address_space() {
        let config = VmConfig { capacity: MAX_CAPACITY, heap_start: 0, stack_start: 0xFFFC };
        assert_eq!(config.stack_depth(), 1);
    }

    #[test]
    fn test_rejects_bad_capacity() {
        let config = VmConfig { capacity: 0, ..VmConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCapacity(0))));

        let config = VmConfig { capacity: MAX_CAPACITY + 1, ..VmConfig::default() };
        assert!(config.validate().is_err());

        let config = VmConfig { capacity: MAX_CAPACITY, heap_start: 0, stack_start: 0xFF00 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_stack_without_room() {
        let config = VmConfig { capacity: 256, heap_start: 0, stack_start: 255 };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RegionOutOfRange { region: "stack", .. })
        ));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = VmConfig::from_json(r#"{ "capacity": 2048, "stack_start": 1024 }"#).unwrap();
        assert_eq!(config.capacity, 2048);
        assert_eq!(config.heap_start, DEFAULT_HEAP_START);
        assert_eq!(config.stack_start, 1024);
    }

    #[test]
    fn test_from_json_validates() {
        let err = VmConfig::from_json(r#"{ "capacity": 16 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::RegionOutOfRange { .. }));

        assert!(matches!(VmConfig::from_json("not json"), Err(ConfigError::Parse(_))));
    }
}
