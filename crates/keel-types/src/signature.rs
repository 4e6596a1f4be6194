//! Function signatures and requested result shapes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ValueKind;

/// Ordered parameter and result kinds of a function.
///
/// Read once from the compiled module (or inferred from a host closure) and
/// never mutated.  Two signatures are equal iff their kind sequences are
/// pairwise equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionSignature {
    params: Vec<ValueKind>,
    results: Vec<ValueKind>,
}

impl FunctionSignature {
    pub fn new<P, R>(params: P, results: R) -> Self
    where
        P: IntoIterator<Item = ValueKind>,
        R: IntoIterator<Item = ValueKind>,
    {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    pub fn results(&self) -> &[ValueKind] {
        &self.results
    }

    /// Whether any parameter or result has the given kind.
    pub fn mentions(&self, kind: ValueKind) -> bool {
        self.params.iter().chain(&self.results).any(|k| *k == kind)
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> ({})", join_kinds(&self.params), join_kinds(&self.results))
    }
}

/// Render a kind list as `i32, f64, externref`.
pub fn join_kinds(kinds: &[ValueKind]) -> String {
    kinds
        .iter()
        .map(|k| k.wasm_name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The shape in which a caller wants results handed back.
///
/// The static path asks for `Unit`, a `Scalar`, or a fixed-size `Tuple`; the
/// dynamic path always reconstructs an `Array` in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "shape", content = "kinds", rename_all = "lowercase")]
pub enum ResultShape {
    Unit,
    Scalar(ValueKind),
    Tuple(Vec<ValueKind>),
    Array(Vec<ValueKind>),
}

impl ResultShape {
    /// Shape for a statically typed tuple; the empty tuple is `Unit`.
    pub fn tuple(kinds: Vec<ValueKind>) -> Self {
        if kinds.is_empty() {
            ResultShape::Unit
        } else {
            ResultShape::Tuple(kinds)
        }
    }

    /// Number of result slots the shape consumes.
    pub fn arity(&self) -> usize {
        match self {
            ResultShape::Unit => 0,
            ResultShape::Scalar(_) => 1,
            ResultShape::Tuple(kinds) | ResultShape::Array(kinds) => kinds.len(),
        }
    }

    /// Result kinds in slot order.
    pub fn kinds(&self) -> Vec<ValueKind> {
        match self {
            ResultShape::Unit => Vec::new(),
            ResultShape::Scalar(kind) => vec![*kind],
            ResultShape::Tuple(kinds) | ResultShape::Array(kinds) => kinds.clone(),
        }
    }
}

impl fmt::Display for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultShape::Unit => f.write_str("()"),
            ResultShape::Scalar(kind) => write!(f, "{kind}"),
            ResultShape::Tuple(kinds) => write!(f, "({})", join_kinds(kinds)),
            ResultShape::Array(kinds) => write!(f, "[{}]", join_kinds(kinds)),
        }
    }
}
