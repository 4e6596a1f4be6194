//! Runtime error types.

use keel_types::ValueKind;
use thiserror::Error;

use crate::trap::TrapRecord;

/// Errors surfaced by the embedding layer.
///
/// A static accessor that finds no function of the requested shape returns
/// `None` rather than an error; everything else that can go wrong at the
/// call boundary lands here.
#[derive(Debug, Error)]
pub enum Error {
    /// Dynamic call whose boxed arguments do not fit the signature.
    #[error("argument mismatch: expected ({expected}), supplied ({supplied})")]
    ArgumentMismatch { expected: String, supplied: String },

    /// Dynamic host callback wrote results of the wrong kind.
    #[error("result mismatch: expected ({expected}), supplied ({supplied})")]
    ResultMismatch { expected: String, supplied: String },

    /// A boxed value cannot be read losslessly as the requested host type.
    #[error("type mismatch: cannot read {requested} from a {stored} value")]
    TypeMismatch {
        requested: &'static str,
        stored: ValueKind,
    },

    /// A null reference was read where a non-null one was required.
    #[error("null {0} where a non-null reference was required")]
    NullReference(ValueKind),

    /// A call chain trapped; carries the originating failure.
    #[error("{0}")]
    Trap(TrapRecord),

    /// Failure raised by a host callback.
    #[error("{0}")]
    Host(String),

    /// A host callback panicked.
    #[error("host callback panicked: {0}")]
    HostPanic(String),

    /// A host function shape the layer cannot represent.
    #[error("unsupported shape: {0}")]
    UnsupportedShape(String),

    /// A value kind the engine cannot carry across its boundary.
    #[error("value kind {0} is not supported by the engine")]
    UnsupportedKind(ValueKind),

    #[error("call depth limit of {0} exceeded")]
    CallDepthExceeded(u32),

    /// A function or reference was used with a store that does not own it.
    #[error("function belongs to a different store")]
    StoreMismatch,

    #[error("memory access out of bounds: offset {offset}, length {len}, memory size {size}")]
    MemoryOutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("link error: {0}")]
    Link(String),

    /// Module decoding, validation or instantiation error from the engine.
    #[error("wasmi: {0}")]
    Engine(#[from] wasmi::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Construct a host failure from any displayable message.
    pub fn host(message: impl std::fmt::Display) -> Self {
        Error::Host(message.to_string())
    }

    /// The text that identifies this failure inside a trap record.
    ///
    /// Host failures and panics keep their original message verbatim.
    pub(crate) fn trap_message(&self) -> String {
        match self {
            Error::Host(message) | Error::HostPanic(message) => message.clone(),
            Error::Trap(record) => record.message().to_string(),
            other => other.to_string(),
        }
    }

    /// Convenience accessor for the trap record, if this is a trap.
    pub fn as_trap(&self) -> Option<&TrapRecord> {
        match self {
            Error::Trap(record) => Some(record),
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, Error>;
