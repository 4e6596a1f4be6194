//! Shared types for the Keel embedding layer.
//!
//! This crate holds the engine-independent half of the call boundary:
//! value kinds, function signatures, the shapes a host can request, and the
//! signature matcher that turns a request into a [`CallPlan`].  Nothing here
//! touches a WebAssembly engine; the matcher is a pure function over two
//! structural descriptions.

mod kind;
mod plan;
mod signature;

pub use kind::{ValueKind, V128};
pub use plan::{
    check_arguments, check_signature, match_signature, CallPlan, ParamSlot, ShapeMismatch,
    ShapeRequest, MAX_RESULT_ARITY,
};
pub use signature::{join_kinds, FunctionSignature, ResultShape};
