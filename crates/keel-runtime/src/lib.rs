//! Keel: the call boundary of a WebAssembly embedding.
//!
//! Keel sits between a host program and the [wasmi] engine and owns the parts
//! of an embedding that are easy to get wrong:
//!
//! - **Values** ([`ValueBox`], [`ExternRef`]): a tagged value of any
//!   WebAssembly kind, convertible to and from host types without loss.
//! - **Signature matching** ([`Instance::get_typed_func`], [`Func::typed`]):
//!   a statically typed request either matches an export exactly or yields
//!   `None`, so hosts can try shapes without handling errors.
//! - **Call marshalling** ([`TypedFunc::call`], [`Func::call`]): packs
//!   arguments, calls, and rebuilds results as a scalar, a tuple, or a
//!   [`CallOutcome`].
//! - **Trap propagation**: a failing host callback unwinds the guest and
//!   surfaces once, as [`Error::Trap`], with its original message intact.
//! - **Reference pinning**: host callbacks and host objects that reach a guest
//!   stay alive until [`Store::dispose`].
//!
//! # Example
//!
//! ```no_run
//! use keel_runtime::{Caller, Engine, Linker, Module, Store};
//!
//! # fn run(wasm: &[u8]) -> keel_runtime::Result<()> {
//! let engine = Engine::default();
//! let module = Module::new(&engine, wasm)?;
//! let mut store = Store::new(&engine, ());
//! let mut linker = Linker::new(&engine);
//! linker.func_wrap(&mut store, "env", "double", |_: Caller<'_, ()>, x: i32| x * 2)?;
//! let instance = linker.instantiate(&mut store, &module)?;
//!
//! if let Some(add) = instance.get_typed_func::<(i32, i32), i32>(&mut store, "add") {
//!     assert_eq!(add.call(&mut store, (40, 2))?, 42);
//! }
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod engine;
mod error;
mod func;
mod guard;
mod marshal;
mod memory;
mod store;
mod trap;
mod typed;
mod value;

pub use bridge::CallState;
pub use config::{RuntimeConfig, DEFAULT_MAX_CALL_DEPTH};
pub use engine::{
    Engine, ExportDescription, ImportDescription, Instance, Linker, Module, ModuleDescription,
};
pub use error::{Error, Result};
pub use func::Func;
pub use guard::PinCounts;
pub use memory::Memory;
pub use store::{AsStore, AsStoreMut, Caller, Store, StoreData, StoreId};
pub use trap::{Frame, FrameKind, TrapOrigin, TrapRecord};
pub use typed::{HostParams, HostResults, HostReturn, HostType, IntoHostFunc, TypedFunc};
pub use value::{CallOutcome, ExternRef, ValueBox};

pub use keel_types::{
    CallPlan, FunctionSignature, ResultShape, ShapeMismatch, ShapeRequest, ValueKind, V128,
    MAX_RESULT_ARITY,
};
