//! Fixture assembly error types.

use thiserror::Error;

/// Errors that can occur while assembling a guest module.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// Imports must be declared before any defined function, because they
    /// occupy the low function indices.
    #[error("import {module}.{name} declared after a defined function")]
    ImportAfterFunction { module: String, name: String },

    /// The same export name was used twice.
    #[error("duplicate export: {0}")]
    DuplicateExport(String),

    /// A start function index that does not exist.
    #[error("start function {0} is out of range")]
    StartOutOfRange(u32),

    /// The assembled module failed validation.
    #[error("WASM validation failed: {0}")]
    ValidationFailed(String),
}

/// Fixture result type alias.
pub type FixtureResult<T> = Result<T, FixtureError>;
