//! Stores, callers and store contexts.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use keel_types::CallPlan;
use tracing::info;
use wasmi::{AsContext, AsContextMut, StoreContext, StoreContextMut};

use crate::bridge::{Bridge, CallState};
use crate::config::RuntimeConfig;
use crate::engine::Engine;
use crate::guard::{PinCounts, PinTable};
use crate::value::ExternRef;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    fn next() -> Self {
        StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Key of a cached static-accessor plan: instance, export name and the
/// requested host parameter/result types.
pub(crate) type PlanKey = (u64, String, TypeId);

/// Everything the engine store carries on behalf of the embedding layer.
///
/// Only reachable through [`AsStore`] / [`AsStoreMut`]; its contents are
/// private to this crate.
#[doc(hidden)]
pub struct StoreData<T> {
    pub(crate) id: StoreId,
    pub(crate) user: T,
    pub(crate) bridge: Bridge,
    pub(crate) pins: PinTable<T>,
    pub(crate) plans: HashMap<PlanKey, Option<Arc<CallPlan>>>,
    pub(crate) next_instance: u64,
    pub(crate) config: Arc<RuntimeConfig>,
}

/// Owner of all guest-visible state, host data, pinned references and the
/// call chain of one logical thread of execution.
pub struct Store<T> {
    inner: wasmi::Store<StoreData<T>>,
}

impl<T: 'static> Store<T> {
    pub fn new(engine: &Engine, data: T) -> Self {
        let config = Arc::clone(engine.config_arc());
        let data = StoreData {
            id: StoreId::next(),
            user: data,
            bridge: Bridge::new(&config),
            pins: PinTable::new(),
            plans: HashMap::new(),
            next_instance: 0,
            config,
        };
        Self {
            inner: wasmi::Store::new(engine.inner(), data),
        }
    }
}

impl<T> Store<T> {
    pub fn id(&self) -> StoreId {
        self.inner.data().id
    }

    pub fn data(&self) -> &T {
        &self.inner.data().user
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.inner.data_mut().user
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.data().config
    }

    pub fn call_state(&self) -> CallState {
        self.inner.data().bridge.state()
    }

    /// How many callbacks and host objects the store currently pins.
    pub fn pinned(&self) -> PinCounts {
        self.inner.data().pins.counts()
    }

    /// Whether `object` has crossed into this store's guests.
    pub fn is_pinned(&self, object: &ExternRef) -> bool {
        self.inner.data().pins.is_pinned(object)
    }

    /// Tear the store down, releasing every pinned callback and host object.
    pub fn dispose(mut self) -> PinCounts {
        let id = self.id();
        let released = self.inner.data_mut().pins.release();
        self.inner.data_mut().plans.clear();
        info!(
            target: "keel::store",
            store = ?id,
            callbacks = released.callbacks,
            objects = released.objects,
            "store disposed"
        );
        released
    }
}

/// Store handle passed to host callbacks.
///
/// Usable wherever a store is expected, so a callback can call back into the
/// guest.
pub struct Caller<'a, T> {
    ctx: StoreContextMut<'a, StoreData<T>>,
}

impl<'a, T> Caller<'a, T> {
    pub(crate) fn new(ctx: StoreContextMut<'a, StoreData<T>>) -> Self {
        Self { ctx }
    }

    pub fn data(&self) -> &T {
        &self.ctx.data().user
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.ctx.data_mut().user
    }

    pub fn store_id(&self) -> StoreId {
        self.ctx.data().id
    }

    pub fn call_state(&self) -> CallState {
        self.ctx.data().bridge.state()
    }
}

/// Types that give shared access to a store.
pub trait AsStore {
    type Data;

    fn as_store(&self) -> StoreContext<'_, StoreData<Self::Data>>;
}

/// Types that give exclusive access to a store.
pub trait AsStoreMut: AsStore {
    fn as_store_mut(&mut self) -> StoreContextMut<'_, StoreData<Self::Data>>;
}

impl<T> AsStore for Store<T> {
    type Data = T;

    fn as_store(&self) -> StoreContext<'_, StoreData<T>> {
        self.inner.as_context()
    }
}

impl<T> AsStoreMut for Store<T> {
    fn as_store_mut(&mut self) -> StoreContextMut<'_, StoreData<T>> {
        self.inner.as_context_mut()
    }
}

impl<T> AsStore for Caller<'_, T> {
    type Data = T;

    fn as_store(&self) -> StoreContext<'_, StoreData<T>> {
        self.ctx.as_context()
    }
}

impl<T> AsStoreMut for Caller<'_, T> {
    fn as_store_mut(&mut self) -> StoreContextMut<'_, StoreData<T>> {
        self.ctx.as_context_mut()
    }
}

impl<T> AsStore for StoreContext<'_, StoreData<T>> {
    type Data = T;

    fn as_store(&self) -> StoreContext<'_, StoreData<T>> {
        self.as_context()
    }
}

impl<T> AsStore for StoreContextMut<'_, StoreData<T>> {
    type Data = T;

    fn as_store(&self) -> StoreContext<'_, StoreData<T>> {
        self.as_context()
    }
}

impl<T> AsStoreMut for StoreContextMut<'_, StoreData<T>> {
    fn as_store_mut(&mut self) -> StoreContextMut<'_, StoreData<T>> {
        self.as_context_mut()
    }
}

impl<S: AsStore + ?Sized> AsStore for &S {
    type Data = S::Data;

    fn as_store(&self) -> StoreContext<'_, StoreData<Self::Data>> {
        (**self).as_store()
    }
}

impl<S: AsStore + ?Sized> AsStore for &mut S {
    type Data = S::Data;

    fn as_store(&self) -> StoreContext<'_, StoreData<Self::Data>> {
        (**self).as_store()
    }
}

impl<S: AsStoreMut + ?Sized> AsStoreMut for &mut S {
    fn as_store_mut(&mut self) -> StoreContextMut<'_, StoreData<Self::Data>> {
        (**self).as_store_mut()
    }
}
