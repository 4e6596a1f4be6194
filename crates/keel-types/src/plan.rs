//! Signature matching.
//!
//! A host asks for a function with a particular static shape (parameter
//! kinds plus a [`ResultShape`]).  The matcher compares that request with the
//! function's real [`FunctionSignature`] and either produces a [`CallPlan`]
//! or explains the mismatch.  Matching is exact: no widening, no coercion
//! across kinds, no partial arities.
//!
//! Tuple results stop at [`MAX_RESULT_ARITY`] elements.  Wider requests are a
//! mismatch like any other, so callers probing shapes never see an error for
//! them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signature::join_kinds;
use crate::{FunctionSignature, ResultShape, ValueKind};

/// Widest result tuple a static request may ask for.
///
/// Result reconstruction exists for a closed set of tuple arities; anything
/// wider goes through the dynamic path.
pub const MAX_RESULT_ARITY: usize = 7;

/// A statically typed call shape requested by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeRequest {
    pub params: Vec<ValueKind>,
    pub results: ResultShape,
}

impl ShapeRequest {
    pub fn new(params: Vec<ValueKind>, results: ResultShape) -> Self {
        Self { params, results }
    }
}

/// Where a single host argument lands in the argument buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamSlot {
    pub index: usize,
    pub kind: ValueKind,
}

/// Conversion plan produced by a successful match.
///
/// Stable for the life of an instance, so runtimes may cache it per
/// (export, requested shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPlan {
    slots: Vec<ParamSlot>,
    results: ResultShape,
    signature: FunctionSignature,
}

impl CallPlan {
    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    pub fn result_shape(&self) -> &ResultShape {
        &self.results
    }

    /// Result kinds in declaration order.
    pub fn result_kinds(&self) -> &[ValueKind] {
        self.signature.results()
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }
}

/// Why a requested shape does not fit a signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeMismatch {
    #[error("expected {expected} parameters, requested {requested}")]
    ParamCount { expected: usize, requested: usize },

    #[error("parameter {index} is {expected}, requested {requested}")]
    ParamKind {
        index: usize,
        expected: ValueKind,
        requested: ValueKind,
    },

    #[error("function returns {expected} values, requested {requested}")]
    ResultCount { expected: usize, requested: usize },

    #[error("result {index} is {expected}, requested {requested}")]
    ResultKind {
        index: usize,
        expected: ValueKind,
        requested: ValueKind,
    },

    #[error("result tuples are limited to seven elements, requested {0}")]
    TupleTooWide(usize),

    #[error("arrays are reconstructed dynamically and cannot be requested statically")]
    ArrayRequested,
}

/// Match a static request against a signature, explaining any mismatch.
pub fn check_signature(
    request: &ShapeRequest,
    actual: &FunctionSignature,
) -> Result<CallPlan, ShapeMismatch> {
    let expected = actual.params();
    if request.params.len() != expected.len() {
        return Err(ShapeMismatch::ParamCount {
            expected: expected.len(),
            requested: request.params.len(),
        });
    }
    for (index, (requested, expected)) in request.params.iter().zip(expected).enumerate() {
        if requested != expected {
            return Err(ShapeMismatch::ParamKind {
                index,
                expected: *expected,
                requested: *requested,
            });
        }
    }

    let requested_results = match &request.results {
        ResultShape::Tuple(kinds) if kinds.len() > MAX_RESULT_ARITY => {
            return Err(ShapeMismatch::TupleTooWide(kinds.len()));
        }
        ResultShape::Array(_) => return Err(ShapeMismatch::ArrayRequested),
        shape => shape.kinds(),
    };
    let declared = actual.results();
    if requested_results.len() != declared.len() {
        return Err(ShapeMismatch::ResultCount {
            expected: declared.len(),
            requested: requested_results.len(),
        });
    }
    for (index, (requested, expected)) in requested_results.iter().zip(declared).enumerate() {
        if requested != expected {
            return Err(ShapeMismatch::ResultKind {
                index,
                expected: *expected,
                requested: *requested,
            });
        }
    }

    let slots = request
        .params
        .iter()
        .enumerate()
        .map(|(index, kind)| ParamSlot { index, kind: *kind })
        .collect();
    Ok(CallPlan {
        slots,
        results: request.results.clone(),
        signature: actual.clone(),
    })
}

/// Match a static request against a signature.
///
/// `None` means "no function with this shape", never a failure.
pub fn match_signature(request: &ShapeRequest, actual: &FunctionSignature) -> Option<CallPlan> {
    check_signature(request, actual).ok()
}

/// Call-time check for the dynamic path: supplied argument kinds must equal
/// the declared parameter kinds exactly.
///
/// On mismatch returns `(expected, supplied)` renderings for the error.
pub fn check_arguments(
    signature: &FunctionSignature,
    supplied: &[ValueKind],
) -> Result<(), (String, String)> {
    if signature.params() == supplied {
        Ok(())
    } else {
        Err((join_kinds(signature.params()), join_kinds(supplied)))
    }
}
