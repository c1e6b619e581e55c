//! Error types for the ISF crate.

use thiserror::Error;

/// ISF loading errors.
#[derive(Debug, Error)]
pub enum IsfError {
    #[error("ISF file not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("XZ/LZMA decompression error: {0}")]
    Decompression(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Unsupported ISF format version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid constant data: {0}")]
    InvalidConstantData(String),
}

pub type IsfResult<T> = Result<T, IsfError>;
