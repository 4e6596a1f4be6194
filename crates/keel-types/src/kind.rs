use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag of a WebAssembly value as seen across the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// 32-bit integer (sign-agnostic).
    Int32,
    /// 64-bit integer (sign-agnostic).
    Int64,
    /// 32-bit IEEE 754 float.
    Float32,
    /// 64-bit IEEE 754 float.
    Float64,
    /// 128-bit vector, opaque.
    V128,
    /// Nullable function reference.
    FuncRef,
    /// Nullable external (host object) reference.
    ExternRef,
}

impl ValueKind {
    /// All kinds, in declaration order.
    pub const ALL: [ValueKind; 7] = [
        ValueKind::Int32,
        ValueKind::Int64,
        ValueKind::Float32,
        ValueKind::Float64,
        ValueKind::V128,
        ValueKind::FuncRef,
        ValueKind::ExternRef,
    ];

    /// `true` for `FuncRef` and `ExternRef`.
    pub fn is_reference(self) -> bool {
        matches!(self, ValueKind::FuncRef | ValueKind::ExternRef)
    }

    /// The WebAssembly text-format name of the kind.
    pub fn wasm_name(self) -> &'static str {
        match self {
            ValueKind::Int32 => "i32",
            ValueKind::Int64 => "i64",
            ValueKind::Float32 => "f32",
            ValueKind::Float64 => "f64",
            ValueKind::V128 => "v128",
            ValueKind::FuncRef => "funcref",
            ValueKind::ExternRef => "externref",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wasm_name())
    }
}

/// A 128-bit vector value.
///
/// The payload is opaque: equality is bitwise over the 16 little-endian
/// bytes, never lane-wise numeric equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct V128([u8; 16]);

impl V128 {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn from_u128(bits: u128) -> Self {
        Self(bits.to_le_bytes())
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    pub const fn as_u128(self) -> u128 {
        u128::from_le_bytes(self.0)
    }
}

impl From<u128> for V128 {
    fn from(bits: u128) -> Self {
        Self::from_u128(bits)
    }
}

impl From<[u8; 16]> for V128 {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for V128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V128({:#034x})", self.as_u128())
    }
}
