//! Guest modules for exercising the Keel call boundary.
//!
//! [`builder::GuestModule`] assembles small WebAssembly modules with
//! `wasm-encoder` and validates them with `wasmparser`.  [`modules`] holds the
//! canned modules the runtime's integration tests instantiate.

pub mod builder;
pub mod error;
pub mod modules;

pub use builder::GuestModule;
pub use error::{FixtureError, FixtureResult};
pub use modules::{
    callback_module, echo_module, failing_start_module, memory_module, GREETING, PAGE_SIZE,
    WIDEST_TUPLE,
};
