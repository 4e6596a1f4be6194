//! Call marshaller.
//!
//! Converts boxed values to and from the engine's value representation and
//! drives both directions of the call boundary: host → guest through
//! [`invoke`], guest → host through [`dispatch_from_guest`].  Both directions
//! report into the store's [`Bridge`](crate::bridge::Bridge).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use keel_types::{join_kinds, FunctionSignature, ValueKind};
use smallvec::SmallVec;
use tracing::trace;
use wasmi::core::{ValType, F32, F64};
use wasmi::{AsContext, AsContextMut, FuncRef, FuncType, StoreContext, StoreContextMut, Val};

use crate::error::{Error, Result};
use crate::func::{Func, FuncRepr};
use crate::store::{Caller, StoreData};
use crate::value::{ExternRef, ValueBox};

/// Argument and result buffers; calls rarely exceed eight values.
pub(crate) type ArgumentVec<T> = SmallVec<[T; 8]>;

/// Payload of every engine `externref` created by this layer.
pub(crate) struct HostObject(pub(crate) ExternRef);

// ══════════════════════════════════════════════════════════════════════════════
// Types
// ══════════════════════════════════════════════════════════════════════════════

pub(crate) fn value_kind(ty: &ValType) -> ValueKind {
    match ty {
        ValType::I32 => ValueKind::Int32,
        ValType::I64 => ValueKind::Int64,
        ValType::F32 => ValueKind::Float32,
        ValType::F64 => ValueKind::Float64,
        ValType::FuncRef => ValueKind::FuncRef,
        ValType::ExternRef => ValueKind::ExternRef,
        #[allow(unreachable_patterns)]
        _ => ValueKind::V128,
    }
}

pub(crate) fn val_type(kind: ValueKind) -> Result<ValType> {
    match kind {
        ValueKind::Int32 => Ok(ValType::I32),
        ValueKind::Int64 => Ok(ValType::I64),
        ValueKind::Float32 => Ok(ValType::F32),
        ValueKind::Float64 => Ok(ValType::F64),
        ValueKind::FuncRef => Ok(ValType::FuncRef),
        ValueKind::ExternRef => Ok(ValType::ExternRef),
        ValueKind::V128 => Err(Error::UnsupportedKind(ValueKind::V128)),
    }
}

pub(crate) fn signature_of(ty: &FuncType) -> FunctionSignature {
    FunctionSignature::new(
        ty.params().iter().map(value_kind),
        ty.results().iter().map(value_kind),
    )
}

/// Engine function type for a signature, if the engine can represent it.
pub(crate) fn func_type(signature: &FunctionSignature) -> Result<FuncType> {
    let params = signature
        .params()
        .iter()
        .map(|kind| val_type(*kind))
        .collect::<Result<Vec<_>>>()?;
    let results = signature
        .results()
        .iter()
        .map(|kind| val_type(*kind))
        .collect::<Result<Vec<_>>>()?;
    Ok(FuncType::new(params, results))
}

fn zero(ty: &ValType) -> Val {
    match ty {
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(F32::from_bits(0)),
        ValType::F64 => Val::F64(F64::from_bits(0)),
        ValType::FuncRef => Val::FuncRef(FuncRef::null()),
        ValType::ExternRef => Val::ExternRef(wasmi::ExternRef::null()),
        _ => Val::I32(0),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Lowering and lifting
// ══════════════════════════════════════════════════════════════════════════════

/// Convert a boxed value to an engine value.
///
/// Host objects are pinned in the store before the engine sees them.
pub(crate) fn lower<T>(
    ctx: &mut StoreContextMut<'_, StoreData<T>>,
    value: &ValueBox,
) -> Result<Val> {
    Ok(match value {
        ValueBox::Int32(v) => Val::I32(*v),
        ValueBox::Int64(v) => Val::I64(*v),
        ValueBox::Float32(v) => Val::F32(F32::from_bits(v.to_bits())),
        ValueBox::Float64(v) => Val::F64(F64::from_bits(v.to_bits())),
        ValueBox::V128(_) => return Err(Error::UnsupportedKind(ValueKind::V128)),
        ValueBox::FuncRef(None) => Val::FuncRef(FuncRef::null()),
        ValueBox::FuncRef(Some(func)) => {
            func.check_store(ctx.data().id)?;
            let engine_func = func
                .engine_func()
                .ok_or(Error::UnsupportedKind(ValueKind::V128))?;
            Val::FuncRef(FuncRef::new(engine_func))
        }
        ValueBox::ExternRef(None) => Val::ExternRef(wasmi::ExternRef::null()),
        ValueBox::ExternRef(Some(object)) => {
            if ctx.data_mut().pins.pin_object(object) {
                trace!(target: "keel::guard", object = ?object, "pinned host object");
            }
            Val::ExternRef(wasmi::ExternRef::new::<HostObject>(
                ctx.as_context_mut(),
                HostObject(object.clone()),
            ))
        }
    })
}

/// Convert an engine value to a boxed value.
pub(crate) fn lift<T>(ctx: &StoreContext<'_, StoreData<T>>, value: &Val) -> ValueBox {
    match value {
        Val::I32(v) => ValueBox::Int32(*v),
        Val::I64(v) => ValueBox::Int64(*v),
        Val::F32(v) => ValueBox::Float32(f32::from_bits(v.to_bits())),
        Val::F64(v) => ValueBox::Float64(f64::from_bits(v.to_bits())),
        Val::FuncRef(r) => ValueBox::FuncRef(r.func().map(|f| lift_func(ctx, *f))),
        Val::ExternRef(r) => ValueBox::ExternRef(
            r.data(ctx.as_context())
                .and_then(|data| data.downcast_ref::<HostObject>())
                .map(|host| host.0.clone()),
        ),
        #[allow(unreachable_patterns)]
        _ => ValueBox::V128(Default::default()),
    }
}

/// Engine functions that back a pinned callback come back as host functions.
fn lift_func<T>(ctx: &StoreContext<'_, StoreData<T>>, func: wasmi::Func) -> Func {
    let store = ctx.data().id;
    match ctx.data().pins.callback_for_engine(&func) {
        Some(index) => Func::from_host(store, index, func),
        None => Func::from_engine(store, func, None),
    }
}

fn lift_all<T>(ctx: &StoreContext<'_, StoreData<T>>, values: &[Val]) -> ArgumentVec<ValueBox> {
    values.iter().map(|value| lift(ctx, value)).collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// Host → guest
// ══════════════════════════════════════════════════════════════════════════════

/// Invoke `func` with already-checked arguments, returning its results in
/// declaration order.
pub(crate) fn invoke<T>(
    mut ctx: StoreContextMut<'_, StoreData<T>>,
    func: &Func,
    args: &[ValueBox],
) -> Result<ArgumentVec<ValueBox>> {
    func.check_store(ctx.data().id)?;
    match func.repr() {
        FuncRepr::Engine { func, name, .. } => {
            let label = name.clone().unwrap_or_else(|| Arc::from("funcref"));
            call_guest(ctx, *func, label, args)
        }
        FuncRepr::Host { index, .. } => call_host_directly(ctx.as_context_mut(), *index, args),
    }
}

fn call_guest<T>(
    mut ctx: StoreContextMut<'_, StoreData<T>>,
    func: wasmi::Func,
    label: Arc<str>,
    args: &[ValueBox],
) -> Result<ArgumentVec<ValueBox>> {
    let ty = func.ty(&ctx);
    let params = args
        .iter()
        .map(|arg| lower(&mut ctx, arg))
        .collect::<Result<ArgumentVec<Val>>>()?;
    let mut results: ArgumentVec<Val> = ty.results().iter().map(zero).collect();

    ctx.data_mut().bridge.enter_guest(label)?;
    let outcome = func.call(&mut ctx, &params, &mut results);
    let bridge = &mut ctx.data_mut().bridge;
    match outcome {
        Ok(()) => bridge.leave_guest(),
        Err(err) => return Err(bridge.leave_guest_failed(err)),
    }
    Ok(lift_all(&ctx.as_context(), &results))
}

/// Call a host function from the host.  A failure is captured and surfaced
/// exactly as if a guest had made the call.
fn call_host_directly<T>(
    mut ctx: StoreContextMut<'_, StoreData<T>>,
    index: u32,
    args: &[ValueBox],
) -> Result<ArgumentVec<ValueBox>> {
    let label = callback_label(&ctx, index)?;
    ctx.data_mut().bridge.enter_host(label);
    let outcome = run_callback(ctx.as_context_mut(), index, args);
    let bridge = &mut ctx.data_mut().bridge;
    match outcome {
        Ok(values) => {
            bridge.leave_host();
            Ok(values)
        }
        Err(err) => {
            let message = bridge.fail_host(err);
            bridge.leave_host();
            match bridge.take_pending() {
                Some(record) => Err(Error::Trap(record)),
                None => Err(Error::Host(message)),
            }
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Guest → host
// ══════════════════════════════════════════════════════════════════════════════

/// Entry point of every engine-materialized host function.
pub(crate) fn dispatch_from_guest<T>(
    mut caller: wasmi::Caller<'_, StoreData<T>>,
    index: u32,
    params: &[Val],
    results: &mut [Val],
) -> std::result::Result<(), wasmi::Error> {
    let mut ctx = caller.as_context_mut();
    let args = lift_all(&ctx.as_context(), params);
    let label = callback_label(&ctx, index).map_err(|err| wasmi::Error::new(err.to_string()))?;
    ctx.data_mut().bridge.enter_host(label);

    let outcome = match run_callback(ctx.as_context_mut(), index, &args) {
        Ok(values) => lower_into(&mut ctx, &values, results),
        Err(err) => Err(err),
    };

    let bridge = &mut ctx.data_mut().bridge;
    match outcome {
        Ok(()) => {
            bridge.leave_host();
            Ok(())
        }
        Err(err) => {
            let message = bridge.fail_host(err);
            bridge.leave_host();
            Err(wasmi::Error::new(message))
        }
    }
}

fn lower_into<T>(
    ctx: &mut StoreContextMut<'_, StoreData<T>>,
    values: &[ValueBox],
    slots: &mut [Val],
) -> Result<()> {
    for (slot, value) in slots.iter_mut().zip(values) {
        *slot = lower(ctx, value)?;
    }
    Ok(())
}

fn callback_label<T>(ctx: &StoreContextMut<'_, StoreData<T>>, index: u32) -> Result<Arc<str>> {
    ctx.data()
        .pins
        .callback(index)
        .map(|pinned| Arc::clone(&pinned.label))
        .ok_or(Error::StoreMismatch)
}

/// Run a pinned callback with boxed arguments.
///
/// Results are pre-filled with the default of each declared kind, panics are
/// caught here so they never unwind through guest frames, and the written
/// results are checked against the declared signature.
fn run_callback<T>(
    mut ctx: StoreContextMut<'_, StoreData<T>>,
    index: u32,
    args: &[ValueBox],
) -> Result<ArgumentVec<ValueBox>> {
    let (callback, declared) = {
        let pinned = ctx.data().pins.callback(index).ok_or(Error::StoreMismatch)?;
        (Arc::clone(&pinned.callback), pinned.signature.results().to_vec())
    };
    let mut results: ArgumentVec<ValueBox> =
        declared.iter().map(|kind| ValueBox::default_for(*kind)).collect();

    let mark = ctx.data().bridge.mark();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        callback(Caller::new(ctx.as_context_mut()), args, &mut results[..])
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err),
        Err(payload) => {
            ctx.data_mut().bridge.unwind_to(mark);
            return Err(Error::HostPanic(panic_message(payload.as_ref())));
        }
    }

    let written: Vec<ValueKind> = results.iter().map(ValueBox::kind).collect();
    if written != declared {
        return Err(Error::ResultMismatch {
            expected: join_kinds(&declared),
            supplied: join_kinds(&written),
        });
    }
    Ok(results)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
