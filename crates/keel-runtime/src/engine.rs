//! Engine, modules, linking and instances.

use std::any::TypeId;
use std::sync::Arc;

use keel_types::{check_signature, CallPlan, FunctionSignature, ValueKind};
use serde::Serialize;
use tracing::debug;
use wasmi::{AsContext, ExternType, StoreContext};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::func::Func;
use crate::marshal;
use crate::memory::Memory;
use crate::store::{AsStore, AsStoreMut, StoreData, StoreId};
use crate::typed::{shape_request, HostParams, HostResults, IntoHostFunc, TypedFunc};

// ══════════════════════════════════════════════════════════════════════════════
// Engine
// ══════════════════════════════════════════════════════════════════════════════

/// Compilation context shared by modules and stores.
#[derive(Clone)]
pub struct Engine {
    inner: wasmi::Engine,
    config: Arc<RuntimeConfig>,
}

impl Engine {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: wasmi::Engine::default(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn config_arc(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    pub(crate) fn inner(&self) -> &wasmi::Engine {
        &self.inner
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Module
// ══════════════════════════════════════════════════════════════════════════════

/// A compiled guest module.
#[derive(Clone)]
pub struct Module {
    inner: wasmi::Module,
}

/// A function export of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportDescription {
    pub name: String,
    pub signature: FunctionSignature,
}

/// A function import of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportDescription {
    pub module: String,
    pub name: String,
    pub signature: FunctionSignature,
}

/// Function-level view of a module's interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescription {
    pub exports: Vec<ExportDescription>,
    pub imports: Vec<ImportDescription>,
    /// Names of exported memories.
    pub memories: Vec<String>,
}

impl ModuleDescription {
    pub fn export(&self, name: &str) -> Option<&FunctionSignature> {
        self.exports
            .iter()
            .find(|export| export.name == name)
            .map(|export| &export.signature)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Module {
    /// Decode, validate and compile `bytes`.
    pub fn new(engine: &Engine, bytes: &[u8]) -> Result<Self> {
        let inner = wasmi::Module::new(engine.inner(), bytes)?;
        Ok(Self { inner })
    }

    pub fn describe(&self) -> ModuleDescription {
        let mut exports = Vec::new();
        let mut memories = Vec::new();
        for export in self.inner.exports() {
            match export.ty() {
                ExternType::Func(ty) => exports.push(ExportDescription {
                    name: export.name().to_string(),
                    signature: marshal::signature_of(ty),
                }),
                ExternType::Memory(_) => memories.push(export.name().to_string()),
                _ => {}
            }
        }
        let imports = self
            .inner
            .imports()
            .filter_map(|import| match import.ty() {
                ExternType::Func(ty) => Some(ImportDescription {
                    module: import.module().to_string(),
                    name: import.name().to_string(),
                    signature: marshal::signature_of(ty),
                }),
                _ => None,
            })
            .collect();
        ModuleDescription {
            exports,
            imports,
            memories,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Linker
// ══════════════════════════════════════════════════════════════════════════════

/// Resolves module imports against host functions.
pub struct Linker<T> {
    inner: wasmi::Linker<StoreData<T>>,
}

impl<T: 'static> Linker<T> {
    pub fn new(engine: &Engine) -> Self {
        Self {
            inner: wasmi::Linker::new(engine.inner()),
        }
    }

    /// Bind `func` under `module`.`name`.
    ///
    /// The function's trap frames are labelled `module.name` from now on.
    /// Host functions whose signature the engine cannot represent are
    /// rejected with [`Error::UnsupportedKind`].
    pub fn define(
        &mut self,
        mut store: impl AsStoreMut<Data = T>,
        module: &str,
        name: &str,
        func: &Func,
    ) -> Result<&mut Self> {
        let mut ctx = store.as_store_mut();
        func.check_store(ctx.data().id)?;
        let Some(engine_func) = func.engine_func() else {
            return Err(Error::UnsupportedKind(ValueKind::V128));
        };
        if let Some(index) = func.host_index() {
            let label = Arc::from(format!("{module}.{name}"));
            if !ctx.data_mut().pins.relabel(index, label) {
                debug!(target: "keel::linker", module, name, "callback keeps its first name");
            }
        }
        self.inner
            .define(module, name, engine_func)
            .map_err(|err| Error::Link(err.to_string()))?;
        debug!(target: "keel::linker", module, name, "defined import");
        Ok(self)
    }

    /// Wrap `func` as a typed host function and bind it in one step.
    pub fn func_wrap<Params, Results>(
        &mut self,
        mut store: impl AsStoreMut<Data = T>,
        module: &str,
        name: &str,
        func: impl IntoHostFunc<T, Params, Results>,
    ) -> Result<&mut Self> {
        let func = Func::wrap(&mut store, func)?;
        self.define(&mut store, module, name, &func)
    }

    /// Instantiate `module`, running its start function inside the bridge.
    pub fn instantiate(
        &self,
        mut store: impl AsStoreMut<Data = T>,
        module: &Module,
    ) -> Result<Instance> {
        let mut ctx = store.as_store_mut();
        let pre = self
            .inner
            .instantiate(&mut ctx, &module.inner)
            .map_err(|err| Error::Link(err.to_string()))?;

        ctx.data_mut().bridge.enter_guest(Arc::from("start"))?;
        let started = pre.start(&mut ctx);
        let bridge = &mut ctx.data_mut().bridge;
        let inner = match started {
            Ok(instance) => {
                bridge.leave_guest();
                instance
            }
            Err(err) => return Err(bridge.leave_guest_failed(err)),
        };

        let data = ctx.data_mut();
        let id = data.next_instance;
        data.next_instance += 1;
        debug!(target: "keel::linker", instance = id, "instantiated module");
        Ok(Instance {
            inner,
            store: data.id,
            id,
        })
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Instance
// ══════════════════════════════════════════════════════════════════════════════

/// An instantiated module.
#[derive(Clone, Debug)]
pub struct Instance {
    inner: wasmi::Instance,
    store: StoreId,
    id: u64,
}

impl Instance {
    /// Dynamic accessor: the named function export, if any.
    ///
    /// `None` as well when `store` does not own this instance.
    pub fn get_func(&self, store: impl AsStore, name: &str) -> Option<Func> {
        let ctx = store.as_store();
        if ctx.data().id != self.store {
            return None;
        }
        let func = self.inner.get_func(&ctx, name)?;
        Some(Func::from_engine(self.store, func, Some(Arc::from(name))))
    }

    /// Static accessor: the named function export viewed with host types
    /// `P` and `R`.
    ///
    /// Returns `None` when no export has exactly this shape, including
    /// result tuples wider than seven elements.  Plans are cached per
    /// instance, name and host types unless disabled in the configuration.
    pub fn get_typed_func<P: HostParams, R: HostResults>(
        &self,
        mut store: impl AsStoreMut,
        name: &str,
    ) -> Option<TypedFunc<P, R>> {
        let mut ctx = store.as_store_mut();
        let func = self.get_func(&ctx, name)?;
        let key = (self.id, name.to_string(), TypeId::of::<(P, R)>());
        let caching = ctx.data().config.cache_plans;

        if caching {
            if let Some(cached) = ctx.data().plans.get(&key) {
                return cached.clone().map(|plan| TypedFunc::new(func, plan));
            }
            debug!(target: "keel::instance", export = name, "plan cache miss");
        }

        let plan = self.plan_for::<P, R, _>(&func, &ctx.as_context(), name);
        if caching {
            ctx.data_mut().plans.insert(key, plan.clone());
        }
        plan.map(|plan| TypedFunc::new(func, plan))
    }

    fn plan_for<P: HostParams, R: HostResults, D>(
        &self,
        func: &Func,
        ctx: &StoreContext<'_, StoreData<D>>,
        name: &str,
    ) -> Option<Arc<CallPlan>> {
        let signature = func.signature_in(ctx).ok()?;
        let request = shape_request::<P, R>();
        match check_signature(&request, &signature) {
            Ok(plan) => {
                debug!(target: "keel::instance", export = name, %signature, "planned typed call");
                Some(Arc::new(plan))
            }
            Err(reason) => {
                debug!(
                    target: "keel::instance",
                    export = name,
                    %signature,
                    requested = ?request,
                    %reason,
                    "no export with requested shape"
                );
                None
            }
        }
    }

    pub fn get_memory(&self, store: impl AsStore, name: &str) -> Option<Memory> {
        let ctx = store.as_store();
        if ctx.data().id != self.store {
            return None;
        }
        let memory = self.inner.get_memory(&ctx, name)?;
        Some(Memory::new(self.store, memory))
    }
}
