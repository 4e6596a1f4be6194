//! Boxed values: the interchange format of the call boundary.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use keel_types::{ValueKind, V128};

use crate::error::{Error, Result};
use crate::func::Func;
use crate::typed::HostType;

/// A value of any WebAssembly kind, tagged with its [`ValueKind`].
///
/// The variant is the tag, so tag and payload cannot disagree.  Building a
/// box from a host scalar picks the tag from the scalar's type (`u32` lands
/// in an `Int32` slot bit-for-bit, `u64` in `Int64`).
#[derive(Clone, Debug)]
pub enum ValueBox {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    V128(V128),
    FuncRef(Option<Func>),
    ExternRef(Option<ExternRef>),
}

impl ValueBox {
    pub fn kind(&self) -> ValueKind {
        match self {
            ValueBox::Int32(_) => ValueKind::Int32,
            ValueBox::Int64(_) => ValueKind::Int64,
            ValueBox::Float32(_) => ValueKind::Float32,
            ValueBox::Float64(_) => ValueKind::Float64,
            ValueBox::V128(_) => ValueKind::V128,
            ValueBox::FuncRef(_) => ValueKind::FuncRef,
            ValueBox::ExternRef(_) => ValueKind::ExternRef,
        }
    }

    /// Zero for numeric kinds, null for reference kinds.
    pub fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Int32 => ValueBox::Int32(0),
            ValueKind::Int64 => ValueBox::Int64(0),
            ValueKind::Float32 => ValueBox::Float32(0.0),
            ValueKind::Float64 => ValueBox::Float64(0.0),
            ValueKind::V128 => ValueBox::V128(V128::default()),
            ValueKind::FuncRef => ValueBox::FuncRef(None),
            ValueKind::ExternRef => ValueBox::ExternRef(None),
        }
    }

    /// Read the box as host type `T`.
    ///
    /// Fails with [`Error::TypeMismatch`] unless `T` represents the stored
    /// kind losslessly: `i64` accepts `Int32`, `f64` accepts `Float32`, but
    /// `i32` never accepts `Int64` and no numeric type accepts a reference.
    pub fn get<T: HostType>(&self) -> Result<T> {
        T::from_box(self.clone())
    }

    /// `true` for a null `FuncRef` or `ExternRef`.
    pub fn is_null(&self) -> bool {
        matches!(self, ValueBox::FuncRef(None) | ValueBox::ExternRef(None))
    }

    pub(crate) fn mismatch(&self, requested: &'static str) -> Error {
        Error::TypeMismatch {
            requested,
            stored: self.kind(),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for ValueBox {
                fn from(value: $ty) -> Self {
                    ValueBox::$variant(value $(as $cast)?)
                }
            }
        )*
    };
}

impl_from_scalar! {
    i32 => Int32,
    u32 => Int32 as i32,
    i64 => Int64,
    u64 => Int64 as i64,
    f32 => Float32,
    f64 => Float64,
    V128 => V128,
}

impl From<Func> for ValueBox {
    fn from(func: Func) -> Self {
        ValueBox::FuncRef(Some(func))
    }
}

impl From<Option<Func>> for ValueBox {
    fn from(func: Option<Func>) -> Self {
        ValueBox::FuncRef(func)
    }
}

impl From<ExternRef> for ValueBox {
    fn from(object: ExternRef) -> Self {
        ValueBox::ExternRef(Some(object))
    }
}

impl From<Option<ExternRef>> for ValueBox {
    fn from(object: Option<ExternRef>) -> Self {
        ValueBox::ExternRef(object)
    }
}

/// An opaque handle to a host object the guest may hold and pass back.
///
/// Identity is reference identity: two handles are the same object only if
/// they point at the same allocation, regardless of the object's contents.
#[derive(Clone)]
pub struct ExternRef {
    object: Arc<dyn Any + Send + Sync>,
}

impl ExternRef {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            object: Arc::new(value),
        }
    }

    /// Wrap an existing shared allocation without copying it.
    pub fn from_arc<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self { object }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    /// Whether both handles refer to the same host object.
    pub fn ptr_eq(a: &ExternRef, b: &ExternRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&a.object), Arc::as_ptr(&b.object))
    }

    /// A weak handle, useful to observe when the object is finally released.
    pub fn downgrade(&self) -> Weak<dyn Any + Send + Sync> {
        Arc::downgrade(&self.object)
    }

    /// Address-based identity key used by the pin table.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.object) as *const () as usize
    }
}

impl fmt::Debug for ExternRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternRef({:#x})", self.identity())
    }
}

/// Result of a dynamically typed call.
#[derive(Clone, Debug)]
pub enum CallOutcome {
    /// The function declares no results.
    Unit,
    /// Exactly one result.
    Single(ValueBox),
    /// Two or more results, in declaration order.
    Multiple(Vec<ValueBox>),
}

impl CallOutcome {
    pub(crate) fn from_values(values: impl IntoIterator<Item = ValueBox>) -> Self {
        let mut values: Vec<ValueBox> = values.into_iter().collect();
        match values.len() {
            0 => CallOutcome::Unit,
            1 => CallOutcome::Single(values.remove(0)),
            _ => CallOutcome::Multiple(values),
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, CallOutcome::Unit)
    }

    pub fn len(&self) -> usize {
        match self {
            CallOutcome::Unit => 0,
            CallOutcome::Single(_) => 1,
            CallOutcome::Multiple(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_unit()
    }

    pub fn single(&self) -> Option<&ValueBox> {
        match self {
            CallOutcome::Single(value) => Some(value),
            _ => None,
        }
    }

    /// Read a single result as host type `T`.
    pub fn get<T: HostType>(&self) -> Result<T> {
        match self {
            CallOutcome::Single(value) => value.get(),
            other => Err(Error::ResultMismatch {
                expected: ValueKind::wasm_name(T::KIND).to_string(),
                supplied: format!("{} values", other.len()),
            }),
        }
    }

    pub fn into_vec(self) -> Vec<ValueBox> {
        match self {
            CallOutcome::Unit => Vec::new(),
            CallOutcome::Single(value) => vec![value],
            CallOutcome::Multiple(values) => values,
        }
    }
}
