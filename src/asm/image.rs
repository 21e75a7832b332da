//! Program image files.
//!
//! Two formats, chosen by file extension:
//! - `.bin`: raw bytes, loaded verbatim
//! - anything else: hex text
//!   - whitespace-separated two-digit hex bytes
//!   - lines starting with `;` and anything after `;` are comments
//!   - blank lines are ignored

use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// A program image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramImage {
    /// The program bytes, in load order.
    pub bytes: Vec<u8>,
}

impl ProgramImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Get the number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Parse hex text.
    pub fn parse_hex(text: &str) -> Result<Self, ImageError> {
        let mut bytes = Vec::new();

        for (line_num, line) in text.lines().enumerate() {
            let data = match line.find(';') {
                Some(idx) => &line[..idx],
                None => line,
            };

            for token in data.split_whitespace() {
                if token.len() != 2 {
                    return Err(ImageError::ParseError {
                        line: line_num + 1,
                        message: format!("expected a two-digit hex byte, found '{}'", token),
                    });
                }
                let byte = u8::from_str_radix(token, 16).map_err(|e| ImageError::ParseError {
                    line: line_num + 1,
                    message: format!("'{}': {}", token, e),
                })?;
                bytes.push(byte);
            }
        }

        Ok(Self { bytes })
    }

    /// Render as hex text, 16 bytes per line, each line tagged with the
    /// address it loads at.
    pub fn to_hex(&self, base: u16) -> String {
        let mut out = String::new();
        out.push_str("; ACC8 program image\n");
        out.push_str(&format!("; {} bytes\n\n", self.bytes.len()));

        for (row, chunk) in self.bytes.chunks(16).enumerate() {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
            let addr = base as usize + row * 16;
            out.push_str(&format!("{:<47} ; {:04X}\n", hex.join(" "), addr));
        }

        out
    }
}

fn is_binary(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("bin"))
}

/// Load an image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ProgramImage, ImageError> {
    let path = path.as_ref();
    if is_binary(path) {
        return Ok(ProgramImage::new(std::fs::read(path)?));
    }
    let text = std::fs::read_to_string(path)?;
    ProgramImage::parse_hex(&text)
}

/// Save an image to disk, in the format its extension selects.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ProgramImage, base: u16) -> Result<(), ImageError> {
    let path = path.as_ref();
    let mut file = std::fs::File::create(path)?;
    if is_binary(path) {
        file.write_all(&image.bytes)?;
    } else {
        file.write_all(image.to_hex(base).as_bytes())?;
    }
    Ok(())
}

/// Errors that can occur while reading or writing images.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },
}
