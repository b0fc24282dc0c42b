//! Error types for backend code generation.

use thiserror::Error;

/// Error type for backend code generation
#[derive(Debug, Error)]
pub enum CodeGenError {
    /// A construct the reference backend does not handle
    #[error("unsupported by this backend: {0}")]
    Unsupported(String),

    /// Function has more parameters than the calling convention's argument
    /// registers
    #[error("function '{0}' has too many register parameters ({1})")]
    TooManyParameters(String, usize),

    /// An instruction survived to emission that should have been lowered
    /// away earlier
    #[error("unlowered instruction reached emission: {0}")]
    UnloweredInstruction(String),

    /// Formatting failure while building the output text
    #[error("formatting error: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, CodeGenError>;
