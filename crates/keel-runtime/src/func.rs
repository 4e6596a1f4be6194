//! Function handles and host function binding.

use std::sync::Arc;

use keel_types::{check_arguments, check_signature, FunctionSignature, ValueKind, MAX_RESULT_ARITY};
use tracing::debug;
use wasmi::{AsContext, StoreContext, StoreContextMut};

use crate::error::{Error, Result};
use crate::guard::{HostCallback, PinnedCallback, UNLINKED_LABEL};
use crate::marshal;
use crate::store::{AsStore, AsStoreMut, Caller, StoreData, StoreId};
use crate::typed::{shape_request, HostParams, HostResults, IntoHostFunc, TypedFunc};
use crate::value::{CallOutcome, ValueBox};

/// A callable function owned by one store: either a guest export (or a
/// guest function reference) or a host function bound into the store.
#[derive(Clone, Debug)]
pub struct Func {
    repr: FuncRepr,
}

#[derive(Clone, Debug)]
pub(crate) enum FuncRepr {
    /// A function the engine can call directly.
    Engine {
        store: StoreId,
        func: wasmi::Func,
        name: Option<Arc<str>>,
    },
    /// A host callback pinned in the store.  `engine` is absent when the
    /// engine cannot represent the callback's signature.
    Host {
        store: StoreId,
        index: u32,
        engine: Option<wasmi::Func>,
    },
}

impl Func {
    /// Bind a typed Rust closure as a host function.
    ///
    /// The signature is inferred from the closure's parameter and return
    /// types.  Fails with [`Error::UnsupportedShape`] if the closure returns a
    /// tuple wider than seven elements.
    pub fn wrap<T: 'static, Params, Results>(
        mut store: impl AsStoreMut<Data = T>,
        func: impl IntoHostFunc<T, Params, Results>,
    ) -> Result<Func> {
        let (signature, callback) = func.into_host_func();
        if signature.results().len() > MAX_RESULT_ARITY {
            return Err(Error::UnsupportedShape(format!(
                "host function returns {} values, at most {MAX_RESULT_ARITY} are supported",
                signature.results().len()
            )));
        }
        Ok(Self::bind(store.as_store_mut(), signature, callback))
    }

    /// Bind a dynamically typed host function.
    ///
    /// `func` receives arguments matching `signature` and writes its results
    /// into slots pre-filled with the default of each declared kind.  Writing
    /// a value of another kind fails the call with [`Error::ResultMismatch`].
    pub fn new<T: 'static>(
        mut store: impl AsStoreMut<Data = T>,
        signature: FunctionSignature,
        func: impl Fn(Caller<'_, T>, &[ValueBox], &mut [ValueBox]) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Func {
        Self::bind(store.as_store_mut(), signature, Arc::new(func))
    }

    fn bind<T: 'static>(
        mut ctx: StoreContextMut<'_, StoreData<T>>,
        signature: FunctionSignature,
        callback: Arc<HostCallback<T>>,
    ) -> Func {
        let store = ctx.data().id;
        let ty = if signature.mentions(ValueKind::V128) {
            None
        } else {
            marshal::func_type(&signature).ok()
        };
        let index = ctx.data_mut().pins.pin_callback(PinnedCallback {
            label: Arc::from(UNLINKED_LABEL),
            signature: signature.clone(),
            callback,
        });
        let engine = ty.map(|ty| {
            wasmi::Func::new(&mut ctx, ty, move |caller, params, results| {
                marshal::dispatch_from_guest(caller, index, params, results)
            })
        });
        if let Some(func) = &engine {
            ctx.data_mut().pins.register_engine_func(func, index);
        }
        debug!(
            target: "keel::func",
            index,
            signature = %signature,
            importable = engine.is_some(),
            "bound host function"
        );
        Func {
            repr: FuncRepr::Host {
                store,
                index,
                engine,
            },
        }
    }

    pub(crate) fn from_engine(store: StoreId, func: wasmi::Func, name: Option<Arc<str>>) -> Func {
        Func {
            repr: FuncRepr::Engine { store, func, name },
        }
    }

    pub(crate) fn from_host(store: StoreId, index: u32, engine: wasmi::Func) -> Func {
        Func {
            repr: FuncRepr::Host {
                store,
                index,
                engine: Some(engine),
            },
        }
    }

    pub(crate) fn repr(&self) -> &FuncRepr {
        &self.repr
    }

    pub(crate) fn check_store(&self, id: StoreId) -> Result<()> {
        let owner = match &self.repr {
            FuncRepr::Engine { store, .. } | FuncRepr::Host { store, .. } => *store,
        };
        if owner == id {
            Ok(())
        } else {
            Err(Error::StoreMismatch)
        }
    }

    /// The engine function backing this handle, if there is one.
    pub(crate) fn engine_func(&self) -> Option<wasmi::Func> {
        match &self.repr {
            FuncRepr::Engine { func, .. } => Some(*func),
            FuncRepr::Host { engine, .. } => *engine,
        }
    }

    pub(crate) fn host_index(&self) -> Option<u32> {
        match &self.repr {
            FuncRepr::Host { index, .. } => Some(*index),
            FuncRepr::Engine { .. } => None,
        }
    }

    /// Export name, for functions obtained from an instance.
    pub fn name(&self) -> Option<&str> {
        match &self.repr {
            FuncRepr::Engine { name, .. } => name.as_deref(),
            FuncRepr::Host { .. } => None,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self.repr, FuncRepr::Host { .. })
    }

    pub fn signature(&self, store: impl AsStore) -> Result<FunctionSignature> {
        self.signature_in(&store.as_store())
    }

    pub(crate) fn signature_in<T>(
        &self,
        ctx: &StoreContext<'_, StoreData<T>>,
    ) -> Result<FunctionSignature> {
        self.check_store(ctx.data().id)?;
        match &self.repr {
            FuncRepr::Engine { func, .. } => Ok(marshal::signature_of(&func.ty(ctx))),
            FuncRepr::Host { index, .. } => ctx
                .data()
                .pins
                .callback(*index)
                .map(|pinned| pinned.signature.clone())
                .ok_or(Error::StoreMismatch),
        }
    }

    /// Dynamically typed call.
    ///
    /// Supplied argument kinds must equal the declared parameter kinds
    /// exactly; otherwise the call fails with [`Error::ArgumentMismatch`]
    /// before anything runs.
    pub fn call(&self, mut store: impl AsStoreMut, args: &[ValueBox]) -> Result<CallOutcome> {
        let ctx = store.as_store_mut();
        let signature = self.signature_in(&ctx.as_context())?;
        let supplied: Vec<ValueKind> = args.iter().map(ValueBox::kind).collect();
        check_arguments(&signature, &supplied)
            .map_err(|(expected, supplied)| Error::ArgumentMismatch { expected, supplied })?;
        let results = marshal::invoke(ctx, self, args)?;
        Ok(CallOutcome::from_values(results))
    }

    /// Static view of this function for host types `P` and `R`.
    ///
    /// `None` if the shape does not match exactly; never an error.
    pub fn typed<P: HostParams, R: HostResults>(
        &self,
        store: impl AsStore,
    ) -> Option<TypedFunc<P, R>> {
        let signature = self.signature(store).ok()?;
        match check_signature(&shape_request::<P, R>(), &signature) {
            Ok(plan) => Some(TypedFunc::new(self.clone(), Arc::new(plan))),
            Err(reason) => {
                debug!(target: "keel::func", %signature, %reason, "typed view rejected");
                None
            }
        }
    }
}
