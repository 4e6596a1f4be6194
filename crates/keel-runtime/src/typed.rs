//! Statically typed host values, parameter lists and result shapes.
//!
//! [`HostType`] maps one Rust type to one [`ValueKind`].  Parameter lists
//! and result shapes are built from it by tuple impls; result tuples exist
//! for arities up to eight so that an eight-element request can be *asked*,
//! and then turned down by the matcher like any other mismatch.

use std::marker::PhantomData;
use std::sync::Arc;

use keel_types::{CallPlan, FunctionSignature, ResultShape, ShapeRequest, ValueKind, V128};

use crate::error::{Error, Result};
use crate::func::Func;
use crate::guard::HostCallback;
use crate::marshal::{self, ArgumentVec};
use crate::store::{AsStoreMut, Caller};
use crate::value::{ExternRef, ValueBox};

// ══════════════════════════════════════════════════════════════════════════════
// Single values
// ══════════════════════════════════════════════════════════════════════════════

/// A Rust type that crosses the call boundary as one WebAssembly value.
pub trait HostType: Sized + 'static {
    const KIND: ValueKind;

    fn into_box(self) -> ValueBox;

    /// Read `value`, failing unless this type represents its kind losslessly.
    fn from_box(value: ValueBox) -> Result<Self>;
}

macro_rules! host_numeric {
    ($ty:ty, $kind:ident, |$v:ident| { $($arm:pat => $conv:expr),* $(,)? }) => {
        impl HostType for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn into_box(self) -> ValueBox {
                ValueBox::from(self)
            }

            fn from_box($v: ValueBox) -> Result<Self> {
                match $v {
                    $($arm => Ok($conv),)*
                    other => Err(other.mismatch(stringify!($ty))),
                }
            }
        }
    };
}

host_numeric!(i32, Int32, |value| { ValueBox::Int32(v) => v });
host_numeric!(u32, Int32, |value| { ValueBox::Int32(v) => v as u32 });
host_numeric!(i64, Int64, |value| {
    ValueBox::Int64(v) => v,
    ValueBox::Int32(v) => i64::from(v),
});
host_numeric!(u64, Int64, |value| {
    ValueBox::Int64(v) => v as u64,
    ValueBox::Int32(v) => u64::from(v as u32),
});
host_numeric!(f32, Float32, |value| { ValueBox::Float32(v) => v });
host_numeric!(f64, Float64, |value| {
    ValueBox::Float64(v) => v,
    ValueBox::Float32(v) => f64::from(v),
});
host_numeric!(V128, V128, |value| { ValueBox::V128(v) => v });

impl HostType for Option<Func> {
    const KIND: ValueKind = ValueKind::FuncRef;

    fn into_box(self) -> ValueBox {
        ValueBox::FuncRef(self)
    }

    fn from_box(value: ValueBox) -> Result<Self> {
        match value {
            ValueBox::FuncRef(func) => Ok(func),
            other => Err(other.mismatch("Option<Func>")),
        }
    }
}

impl HostType for Func {
    const KIND: ValueKind = ValueKind::FuncRef;

    fn into_box(self) -> ValueBox {
        ValueBox::FuncRef(Some(self))
    }

    fn from_box(value: ValueBox) -> Result<Self> {
        Option::<Func>::from_box(value)?.ok_or(Error::NullReference(ValueKind::FuncRef))
    }
}

impl HostType for Option<ExternRef> {
    const KIND: ValueKind = ValueKind::ExternRef;

    fn into_box(self) -> ValueBox {
        ValueBox::ExternRef(self)
    }

    fn from_box(value: ValueBox) -> Result<Self> {
        match value {
            ValueBox::ExternRef(object) => Ok(object),
            other => Err(other.mismatch("Option<ExternRef>")),
        }
    }
}

impl HostType for ExternRef {
    const KIND: ValueKind = ValueKind::ExternRef;

    fn into_box(self) -> ValueBox {
        ValueBox::ExternRef(Some(self))
    }

    fn from_box(value: ValueBox) -> Result<Self> {
        Option::<ExternRef>::from_box(value)?.ok_or(Error::NullReference(ValueKind::ExternRef))
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Parameter lists and result shapes
// ══════════════════════════════════════════════════════════════════════════════

/// An ordered list of host-typed parameters.
pub trait HostParams: Sized + 'static {
    fn kinds() -> Vec<ValueKind>;

    fn into_boxes(self) -> ArgumentVec<ValueBox>;

    fn from_boxes(values: &[ValueBox]) -> Result<Self>;
}

/// The host-side shape of a function's results.
pub trait HostResults: Sized + 'static {
    fn shape() -> ResultShape;

    /// Rebuild the host value from results in declaration order.
    fn from_boxes(values: ArgumentVec<ValueBox>) -> Result<Self>;

    /// Write the host value into result slots in declaration order.
    fn store_into(self, slots: &mut [ValueBox]);
}

/// Which side of the call a value list belongs to, for error reporting.
#[derive(Clone, Copy)]
enum Side {
    Params,
    Results,
}

fn take<T: HostType>(
    values: &mut impl Iterator<Item = ValueBox>,
    supplied: usize,
    side: Side,
) -> Result<T> {
    let Some(value) = values.next() else {
        let expected = T::KIND.to_string();
        let supplied = format!("{supplied} values");
        return Err(match side {
            Side::Params => Error::ArgumentMismatch { expected, supplied },
            Side::Results => Error::ResultMismatch { expected, supplied },
        });
    };
    T::from_box(value)
}

impl<T: HostType> HostParams for T {
    fn kinds() -> Vec<ValueKind> {
        vec![T::KIND]
    }

    fn into_boxes(self) -> ArgumentVec<ValueBox> {
        let mut boxes = ArgumentVec::new();
        boxes.push(self.into_box());
        boxes
    }

    fn from_boxes(values: &[ValueBox]) -> Result<Self> {
        take(&mut values.iter().cloned(), values.len(), Side::Params)
    }
}

impl<T: HostType> HostResults for T {
    fn shape() -> ResultShape {
        ResultShape::Scalar(T::KIND)
    }

    fn from_boxes(values: ArgumentVec<ValueBox>) -> Result<Self> {
        let supplied = values.len();
        take(&mut values.into_iter(), supplied, Side::Results)
    }

    fn store_into(self, slots: &mut [ValueBox]) {
        if let Some(slot) = slots.first_mut() {
            *slot = self.into_box();
        }
    }
}

macro_rules! for_each_tuple {
    ($mac:ident) => {
        $mac!(0);
        $mac!(1 A1);
        $mac!(2 A1 A2);
        $mac!(3 A1 A2 A3);
        $mac!(4 A1 A2 A3 A4);
        $mac!(5 A1 A2 A3 A4 A5);
        $mac!(6 A1 A2 A3 A4 A5 A6);
        $mac!(7 A1 A2 A3 A4 A5 A6 A7);
        $mac!(8 A1 A2 A3 A4 A5 A6 A7 A8);
    };
}

macro_rules! impl_tuples {
    ($n:tt $($t:ident)*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<$($t: HostType,)*> HostParams for ($($t,)*) {
            fn kinds() -> Vec<ValueKind> {
                vec![$($t::KIND),*]
            }

            fn into_boxes(self) -> ArgumentVec<ValueBox> {
                let ($($t,)*) = self;
                let mut boxes = ArgumentVec::new();
                $(boxes.push($t.into_box());)*
                boxes
            }

            fn from_boxes(values: &[ValueBox]) -> Result<Self> {
                let supplied = values.len();
                let mut values = values.iter().cloned();
                Ok(($(take::<$t>(&mut values, supplied, Side::Params)?,)*))
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<$($t: HostType,)*> HostResults for ($($t,)*) {
            fn shape() -> ResultShape {
                ResultShape::tuple(vec![$($t::KIND),*])
            }

            fn from_boxes(values: ArgumentVec<ValueBox>) -> Result<Self> {
                let supplied = values.len();
                let mut values = values.into_iter();
                Ok(($(take::<$t>(&mut values, supplied, Side::Results)?,)*))
            }

            fn store_into(self, slots: &mut [ValueBox]) {
                let ($($t,)*) = self;
                let mut slots = slots.iter_mut();
                $(
                    if let Some(slot) = slots.next() {
                        *slot = $t.into_box();
                    }
                )*
            }
        }
    };
}

for_each_tuple!(impl_tuples);

/// What a typed host closure may return: its results directly, or a
/// `Result` whose error becomes a trap.
pub trait HostReturn: 'static {
    type Output: HostResults;

    fn into_result(self) -> Result<Self::Output>;
}

impl<R: HostResults> HostReturn for R {
    type Output = R;

    fn into_result(self) -> Result<R> {
        Ok(self)
    }
}

impl<R: HostResults> HostReturn for Result<R> {
    type Output = R;

    fn into_result(self) -> Result<R> {
        self
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Typed host closures
// ══════════════════════════════════════════════════════════════════════════════

/// A Rust closure usable as a host function.
///
/// Implemented for `Fn(Caller<'_, T>, A1, …, An) -> R` with up to eight
/// parameters.  The declared signature is inferred from the closure's type.
pub trait IntoHostFunc<T, Params, Results>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_host_func(self) -> (FunctionSignature, Arc<HostCallback<T>>);
}

macro_rules! impl_into_host_func {
    ($n:tt $($t:ident)*) => {
        #[allow(non_snake_case)]
        impl<T, F, $($t,)* R> IntoHostFunc<T, ($($t,)*), R> for F
        where
            T: 'static,
            F: Fn(Caller<'_, T>, $($t),*) -> R + Send + Sync + 'static,
            $($t: HostType,)*
            R: HostReturn,
        {
            fn into_host_func(self) -> (FunctionSignature, Arc<HostCallback<T>>) {
                let signature = FunctionSignature::new(
                    vec![$($t::KIND),*],
                    <R::Output as HostResults>::shape().kinds(),
                );
                let func = self;
                let callback = move |caller: Caller<'_, T>,
                                     params: &[ValueBox],
                                     results: &mut [ValueBox]|
                      -> Result<()> {
                    let ($($t,)*) = <($($t,)*) as HostParams>::from_boxes(params)?;
                    let output = func(caller, $($t),*).into_result()?;
                    output.store_into(results);
                    Ok(())
                };
                (signature, Arc::new(callback))
            }
        }
    };
}

for_each_tuple!(impl_into_host_func);

// ══════════════════════════════════════════════════════════════════════════════
// Typed functions
// ══════════════════════════════════════════════════════════════════════════════

/// A function whose signature has been matched against host types `P` and
/// `R` once, so calls skip the per-call type check.
pub struct TypedFunc<P, R> {
    func: Func,
    plan: Arc<CallPlan>,
    _marker: PhantomData<fn(P) -> R>,
}

impl<P, R> Clone for TypedFunc<P, R> {
    fn clone(&self) -> Self {
        Self {
            func: self.func.clone(),
            plan: Arc::clone(&self.plan),
            _marker: PhantomData,
        }
    }
}

impl<P: HostParams, R: HostResults> TypedFunc<P, R> {
    pub(crate) fn new(func: Func, plan: Arc<CallPlan>) -> Self {
        Self {
            func,
            plan,
            _marker: PhantomData,
        }
    }

    pub fn call<S: AsStoreMut>(&self, mut store: S, params: P) -> Result<R> {
        let args = params.into_boxes();
        let results = marshal::invoke(store.as_store_mut(), &self.func, &args)?;
        R::from_boxes(results)
    }

    pub fn func(&self) -> &Func {
        &self.func
    }

    pub fn plan(&self) -> &CallPlan {
        &self.plan
    }
}

impl<P, R> std::fmt::Debug for TypedFunc<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedFunc")
            .field("func", &self.func)
            .field("signature", &self.plan.signature().to_string())
            .finish()
    }
}

/// Static request shape for host types `P` and `R`.
pub(crate) fn shape_request<P: HostParams, R: HostResults>() -> ShapeRequest {
    ShapeRequest::new(P::kinds(), R::shape())
}
