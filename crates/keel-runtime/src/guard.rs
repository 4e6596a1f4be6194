//! Reference lifetime guard.
//!
//! Every host callback bound into a store and every host object that crosses
//! into the guest as an `externref` is held here by a strong handle.  Entries
//! are only released by [`Store::dispose`](crate::Store::dispose) (or by
//! dropping the store); dropping the host's own handles never unpins them.

use std::collections::HashMap;
use std::sync::Arc;

use keel_types::FunctionSignature;
use serde::Serialize;

use crate::error::Result;
use crate::store::Caller;
use crate::value::{ExternRef, ValueBox};

/// Type-erased host callback as stored in the pin table.
///
/// Typed closures are adapted to this form when they are wrapped, so the
/// marshaller has a single dispatch path for every host function.
pub(crate) type HostCallback<T> =
    dyn Fn(Caller<'_, T>, &[ValueBox], &mut [ValueBox]) -> Result<()> + Send + Sync;

/// A pinned host callback together with its declared signature.
pub(crate) struct PinnedCallback<T> {
    pub(crate) label: Arc<str>,
    pub(crate) signature: FunctionSignature,
    pub(crate) callback: Arc<HostCallback<T>>,
}

/// Number of entries held by a pin table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PinCounts {
    pub callbacks: usize,
    pub objects: usize,
}

/// Frame label of a callback that has not been linked under a name yet.
pub(crate) const UNLINKED_LABEL: &str = "host";

pub(crate) struct PinTable<T> {
    callbacks: Vec<PinnedCallback<T>>,
    /// Callback slots keyed by the engine function materialized for them.
    engine_funcs: HashMap<String, u32>,
    /// Host objects keyed by allocation address.
    objects: HashMap<usize, ExternRef>,
}

impl<T> PinTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: Vec::new(),
            engine_funcs: HashMap::new(),
            objects: HashMap::new(),
        }
    }

    /// Pin a callback and return its slot index.  Slots are never reused.
    pub(crate) fn pin_callback(&mut self, callback: PinnedCallback<T>) -> u32 {
        let index = self.callbacks.len() as u32;
        self.callbacks.push(callback);
        index
    }

    pub(crate) fn callback(&self, index: u32) -> Option<&PinnedCallback<T>> {
        self.callbacks.get(index as usize)
    }

    /// Name a callback after its first linked binding.  Later bindings of
    /// the same callback keep that name.
    pub(crate) fn relabel(&mut self, index: u32, label: Arc<str>) -> bool {
        match self.callbacks.get_mut(index as usize) {
            Some(pinned) if &*pinned.label == UNLINKED_LABEL => {
                pinned.label = label;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn register_engine_func(&mut self, func: &wasmi::Func, index: u32) {
        self.engine_funcs.insert(engine_key(func), index);
    }

    /// Callback slot behind an engine function, if it is one of ours.
    pub(crate) fn callback_for_engine(&self, func: &wasmi::Func) -> Option<u32> {
        if self.engine_funcs.is_empty() {
            return None;
        }
        self.engine_funcs.get(&engine_key(func)).copied()
    }

    /// Pin a host object.  Returns `false` if it was already pinned.
    pub(crate) fn pin_object(&mut self, object: &ExternRef) -> bool {
        let key = object.identity();
        if self.objects.contains_key(&key) {
            return false;
        }
        self.objects.insert(key, object.clone());
        true
    }

    pub(crate) fn is_pinned(&self, object: &ExternRef) -> bool {
        self.objects.contains_key(&object.identity())
    }

    pub(crate) fn counts(&self) -> PinCounts {
        PinCounts {
            callbacks: self.callbacks.len(),
            objects: self.objects.len(),
        }
    }

    /// Drop every pinned entry, returning how many were held.
    pub(crate) fn release(&mut self) -> PinCounts {
        let counts = self.counts();
        self.callbacks.clear();
        self.engine_funcs.clear();
        self.objects.clear();
        counts
    }
}

/// Identity of an engine function handle.
///
/// wasmi handles have no equality; their debug form names the owning store
/// and the entity index, which is unique for the lifetime of the store.
fn engine_key(func: &wasmi::Func) -> String {
    format!("{func:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::ValueKind;

    fn noop_callback(label: &str) -> PinnedCallback<()> {
        PinnedCallback {
            label: label.into(),
            signature: FunctionSignature::new(Vec::<ValueKind>::new(), Vec::<ValueKind>::new()),
            callback: Arc::new(
                |_caller: Caller<'_, ()>, _: &[ValueBox], _: &mut [ValueBox]| -> Result<()> {
                    Ok(())
                },
            ),
        }
    }

    #[test]
    fn callback_slots_are_stable() {
        let mut table = PinTable::new();
        let a = table.pin_callback(noop_callback("a"));
        let b = table.pin_callback(noop_callback("b"));
        assert_eq!((a, b), (0, 1));
        assert!(!table.relabel(b, "env.b".into()));
        assert_eq!(&*table.callback(b).unwrap().label, "b");
        assert!(table.callback(2).is_none());
    }

    #[test]
    fn first_linked_name_is_kept() {
        let mut table = PinTable::new();
        let index = table.pin_callback(noop_callback(UNLINKED_LABEL));
        assert!(table.relabel(index, "env.first".into()));
        assert!(!table.relabel(index, "other.second".into()));
        assert_eq!(&*table.callback(index).unwrap().label, "env.first");
        assert!(table.callback(2).is_none());
    }

    #[test]
    fn objects_are_pinned_by_identity() {
        let mut table: PinTable<()> = PinTable::new();
        let first = ExternRef::new(String::from("same"));
        let second = ExternRef::new(String::from("same"));

        assert!(table.pin_object(&first));
        assert!(!table.pin_object(&first.clone()));
        assert!(!table.is_pinned(&second));
        assert!(table.pin_object(&second));
        assert_eq!(table.counts().objects, 2);
    }

    #[test]
    fn pinned_object_outlives_host_handles_until_release() {
        let mut table: PinTable<()> = PinTable::new();
        let object = ExternRef::new(vec![1u8, 2, 3]);
        let weak = object.downgrade();
        table.pin_object(&object);
        drop(object);
        assert!(weak.upgrade().is_some());

        let released = table.release();
        assert_eq!(
            released,
            PinCounts {
                callbacks: 0,
                objects: 1
            }
        );
        assert!(weak.upgrade().is_none());
    }
}
