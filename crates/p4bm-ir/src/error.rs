//! Error types for the IR crate.

use thiserror::Error;

/// Errors produced while assembling a program.
#[derive(Debug, Error)]
pub enum IrError {
    /// Registering a struct-like type under a name that already exists.
    #[error("duplicate type name: '{name}'")]
    DuplicateTypeName { name: String },
}
