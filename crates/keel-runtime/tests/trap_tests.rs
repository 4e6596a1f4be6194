//! Trap propagation tests.
//!
//! A failure raised by a host callback must reach the top-level caller once,
//! with its message intact, no matter how many guest and host frames sit in
//! between.  Engine traps surface the same way with a guest origin.

use keel_fixtures::{callback_module, failing_start_module, GuestModule};
use keel_runtime::{
    CallState, Caller, Engine, Error, Frame, FrameKind, Func, FunctionSignature, Instance, Linker,
    Module, Result, RuntimeConfig, Store, TrapOrigin, ValueBox, ValueKind,
};
use wasm_encoder::{Instruction, ValType};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Host {
    /// Guest function that `env.reenter` calls back into.
    reenter: Option<Func>,
    /// Replace a failure seen by `env.reenter` with a fresh one.
    wrap_reentry_errors: bool,
    panic_in_fail: bool,
    observed: Vec<CallState>,
}

fn link_callbacks(store: &mut Store<Host>, linker: &mut Linker<Host>) {
    linker
        .func_wrap(
            &mut *store,
            "env",
            "fail",
            |caller: Caller<'_, Host>, x: i32| -> Result<i32> {
                if caller.data().panic_in_fail {
                    panic!("fail panicked with {x}");
                }
                Err(Error::host(format!("fail called with {x}")))
            },
        )
        .unwrap()
        .func_wrap(
            &mut *store,
            "env",
            "double",
            |mut caller: Caller<'_, Host>, x: i32| {
                let state = caller.call_state();
                caller.data_mut().observed.push(state);
                x.wrapping_mul(2)
            },
        )
        .unwrap()
        .func_wrap(
            &mut *store,
            "env",
            "reenter",
            |mut caller: Caller<'_, Host>, x: i32| -> Result<i32> {
                let target = caller
                    .data()
                    .reenter
                    .clone()
                    .ok_or_else(|| Error::host("no reentry target"))?;
                let wrap = caller.data().wrap_reentry_errors;
                match target.call(&mut caller, &[ValueBox::from(x)]) {
                    Ok(outcome) => outcome.get::<i32>(),
                    Err(err) if wrap => Err(Error::host(format!("outer saw: {err}"))),
                    Err(err) => Err(err),
                }
            },
        )
        .unwrap();
}

fn callback_instance(config: RuntimeConfig) -> (Store<Host>, Instance) {
    let engine = Engine::new(config);
    let module = Module::new(&engine, &callback_module().expect("callback module")).unwrap();
    let mut store = Store::new(&engine, Host::default());
    let mut linker = Linker::new(&engine);
    link_callbacks(&mut store, &mut linker);
    let instance = linker.instantiate(&mut store, &module).expect("instantiate");
    (store, instance)
}

fn default_instance() -> (Store<Host>, Instance) {
    callback_instance(RuntimeConfig::default())
}

fn call_i32(store: &mut Store<Host>, instance: &Instance, name: &str, arg: i32) -> Result<i32> {
    let func = instance
        .get_typed_func::<i32, i32>(&mut *store, name)
        .expect("export has shape (i32) -> i32");
    func.call(store, arg)
}

fn frame_names(frames: &[Frame]) -> Vec<String> {
    frames.iter().map(|frame| frame.to_string()).collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// Host callback failures
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn host_failure_message_survives_the_guest() {
    let (mut store, instance) = default_instance();
    let err = call_i32(&mut store, &instance, "call_fail", 3).unwrap_err();

    let record = err.as_trap().expect("a trap");
    assert_eq!(record.message(), "fail called with 3");
    assert_eq!(record.origin(), TrapOrigin::HostCallback);
    assert_eq!(
        frame_names(record.frames()),
        ["guest:call_fail", "host:env.fail"]
    );
    assert_eq!(err.to_string(), "wasm trap: fail called with 3");
}

#[test]
fn host_failure_through_dynamic_call() {
    let (mut store, instance) = default_instance();
    let call_fail = instance.get_func(&store, "call_fail").unwrap();
    let err = call_fail
        .call(&mut store, &[ValueBox::from(11i32)])
        .unwrap_err();
    assert_eq!(err.as_trap().unwrap().message(), "fail called with 11");
}

#[test]
fn successful_callback_sees_host_callback_state() {
    let (mut store, instance) = default_instance();
    assert_eq!(call_i32(&mut store, &instance, "double_then_add", 20).unwrap(), 41);
    assert_eq!(store.data().observed, [CallState::InHostCallback]);
    assert_eq!(store.call_state(), CallState::Idle);
}

#[test]
fn store_is_usable_after_a_trap() {
    let (mut store, instance) = default_instance();
    assert!(call_i32(&mut store, &instance, "call_fail", 1).is_err());
    assert_eq!(store.call_state(), CallState::Idle);
    assert_eq!(call_i32(&mut store, &instance, "call_double", 4).unwrap(), 8);

    let again = call_i32(&mut store, &instance, "call_fail", 2).unwrap_err();
    assert_eq!(again.as_trap().unwrap().message(), "fail called with 2");
}

#[test]
fn callback_linked_twice_keeps_its_first_name() {
    let engine = Engine::default();
    let mut store = Store::new(&engine, Host::default());
    let refuse = Func::wrap(&mut store, |_: Caller<'_, Host>, x: i32| -> Result<i32> {
        Err(Error::host(format!("refused {x}")))
    })
    .unwrap();
    let mut linker = Linker::new(&engine);
    linker
        .define(&mut store, "env", "refuse", &refuse)
        .unwrap()
        .define(&mut store, "alt", "refuse", &refuse)
        .unwrap();

    let err = refuse.call(&mut store, &[ValueBox::from(2i32)]).unwrap_err();
    let record = err.as_trap().expect("a trap");
    assert_eq!(frame_names(record.frames()), ["host:env.refuse"]);
}

#[test]
fn direct_host_call_failure_is_a_trap() {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let refuse = Func::wrap(&mut store, |_: Caller<'_, ()>, x: i32| -> Result<i32> {
        Err(Error::host(format!("refused {x}")))
    })
    .unwrap();

    let err = refuse.call(&mut store, &[ValueBox::from(5i32)]).unwrap_err();
    let record = err.as_trap().unwrap();
    assert_eq!(record.message(), "refused 5");
    assert_eq!(record.frames().len(), 1);
    assert_eq!(record.frames()[0].kind, FrameKind::Host);
    assert_eq!(store.call_state(), CallState::Idle);
}

// ══════════════════════════════════════════════════════════════════════════════
// Nested failures
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn reentrant_call_succeeds() {
    let (mut store, instance) = default_instance();
    let target = instance.get_func(&store, "call_double");
    store.data_mut().reenter = target;
    assert_eq!(call_i32(&mut store, &instance, "call_reenter", 5).unwrap(), 10);
    assert_eq!(store.data().observed, [CallState::InHostCallback]);
}

#[test]
fn innermost_failure_reaches_the_top() {
    let (mut store, instance) = default_instance();
    let target = instance.get_func(&store, "call_fail");
    store.data_mut().reenter = target;

    let err = call_i32(&mut store, &instance, "call_reenter", 9).unwrap_err();
    let record = err.as_trap().unwrap();
    assert_eq!(record.message(), "fail called with 9");
    assert_eq!(record.origin(), TrapOrigin::HostCallback);
    assert_eq!(
        frame_names(record.frames()),
        [
            "guest:call_reenter",
            "host:env.reenter",
            "guest:call_fail",
            "host:env.fail"
        ]
    );
    assert_eq!(store.call_state(), CallState::Idle);
}

#[test]
fn callback_that_replaces_the_failure_raises_a_new_trap() {
    let (mut store, instance) = default_instance();
    let target = instance.get_func(&store, "call_fail");
    store.data_mut().reenter = target;
    store.data_mut().wrap_reentry_errors = true;

    let err = call_i32(&mut store, &instance, "call_reenter", 4).unwrap_err();
    let record = err.as_trap().unwrap();
    assert_eq!(
        record.message(),
        "outer saw: wasm trap: fail called with 4"
    );
    assert_eq!(
        frame_names(record.frames()),
        ["guest:call_reenter", "host:env.reenter"]
    );
}

#[test]
fn call_depth_limit_traps() {
    let config = RuntimeConfig {
        max_call_depth: 1,
        ..RuntimeConfig::default()
    };
    let (mut store, instance) = callback_instance(config);
    let target = instance.get_func(&store, "call_double");
    store.data_mut().reenter = target;

    let err = call_i32(&mut store, &instance, "call_reenter", 5).unwrap_err();
    let record = err.as_trap().unwrap();
    assert_eq!(record.message(), "call depth limit of 1 exceeded");
    assert!(store.data().observed.is_empty());

    assert_eq!(call_i32(&mut store, &instance, "call_double", 5).unwrap(), 10);
}

// ══════════════════════════════════════════════════════════════════════════════
// Panics and result mismatches
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn panicking_callback_becomes_a_trap() {
    let (mut store, instance) = default_instance();
    store.data_mut().panic_in_fail = true;

    let err = call_i32(&mut store, &instance, "call_fail", 3).unwrap_err();
    let record = err.as_trap().unwrap();
    assert_eq!(record.origin(), TrapOrigin::HostPanic);
    assert_eq!(record.message(), "fail panicked with 3");

    assert_eq!(store.call_state(), CallState::Idle);
    assert_eq!(call_i32(&mut store, &instance, "call_double", 3).unwrap(), 6);
}

#[test]
fn dynamic_callback_writing_wrong_kind_traps() {
    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let signature = FunctionSignature::new([ValueKind::Int32], [ValueKind::Int32]);
    let sloppy = Func::new(&mut store, signature, |_caller, params, results| {
        results[0] = ValueBox::from(i64::from(params[0].get::<i32>()?));
        Ok(())
    });

    let err = sloppy.call(&mut store, &[ValueBox::from(1i32)]).unwrap_err();
    assert_eq!(
        err.as_trap().unwrap().message(),
        "result mismatch: expected (i32), supplied (i64)"
    );

    let mut module = GuestModule::new();
    let bad = module
        .import_func("env", "bad", &[ValType::I32], &[ValType::I32])
        .unwrap();
    module.export_func(
        "run",
        &[ValType::I32],
        &[ValType::I32],
        vec![Instruction::LocalGet(0), Instruction::Call(bad)],
    );
    let module = Module::new(&engine, &module.finish().unwrap()).unwrap();
    let mut linker = Linker::new(&engine);
    linker.define(&mut store, "env", "bad", &sloppy).unwrap();
    let instance = linker.instantiate(&mut store, &module).unwrap();
    let run = instance.get_typed_func::<i32, i32>(&mut store, "run").unwrap();

    let err = run.call(&mut store, 1).unwrap_err();
    let record = err.as_trap().unwrap();
    assert!(record.message().starts_with("result mismatch"));
    assert_eq!(frame_names(record.frames()), ["guest:run", "host:env.bad"]);
}

// ══════════════════════════════════════════════════════════════════════════════
// Engine traps
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn unreachable_is_a_guest_trap() {
    let (mut store, instance) = default_instance();
    let trap = instance
        .get_typed_func::<(), ()>(&mut store, "trap_unreachable")
        .unwrap();
    let err = trap.call(&mut store, ()).unwrap_err();
    let record = err.as_trap().unwrap();
    assert_eq!(record.origin(), TrapOrigin::Guest);
    assert!(!record.message().is_empty());
    assert_eq!(frame_names(record.frames()), ["guest:trap_unreachable"]);
}

#[test]
fn division_by_zero_is_a_guest_trap() {
    let (mut store, instance) = default_instance();
    let div = instance
        .get_typed_func::<(i32, i32), i32>(&mut store, "div")
        .unwrap();
    assert_eq!(div.call(&mut store, (9, 3)).unwrap(), 3);

    let err = div.call(&mut store, (1, 0)).unwrap_err();
    assert_eq!(err.as_trap().unwrap().origin(), TrapOrigin::Guest);
    assert_eq!(store.call_state(), CallState::Idle);
}

#[test]
fn frames_are_omitted_when_disabled() {
    let config = RuntimeConfig {
        capture_frames: false,
        ..RuntimeConfig::default()
    };
    let (mut store, instance) = callback_instance(config);
    let err = call_i32(&mut store, &instance, "call_fail", 3).unwrap_err();
    let record = err.as_trap().unwrap();
    assert_eq!(record.message(), "fail called with 3");
    assert!(record.frames().is_empty());
    assert_eq!(record.backtrace(), "");
}

// ══════════════════════════════════════════════════════════════════════════════
// Start functions and linking
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn failing_start_function_traps_instantiation() {
    let engine = Engine::default();
    let module = Module::new(&engine, &failing_start_module().unwrap()).unwrap();
    let mut store = Store::new(&engine, Host::default());
    let mut linker = Linker::new(&engine);
    link_callbacks(&mut store, &mut linker);

    let err = linker.instantiate(&mut store, &module).unwrap_err();
    let record = err.as_trap().expect("start failure is a trap");
    assert_eq!(record.message(), "fail called with 7");
    assert_eq!(frame_names(record.frames()), ["guest:start", "host:env.fail"]);
    assert_eq!(store.call_state(), CallState::Idle);
}

#[test]
fn missing_import_is_a_link_error() {
    let engine = Engine::default();
    let module = Module::new(&engine, &callback_module().unwrap()).unwrap();
    let mut store = Store::new(&engine, Host::default());
    let linker = Linker::new(&engine);
    let err = linker.instantiate(&mut store, &module).unwrap_err();
    assert!(matches!(err, Error::Link(_)));
}

#[test]
fn trap_record_serializes() {
    let (mut store, instance) = default_instance();
    let err = call_i32(&mut store, &instance, "call_fail", 3).unwrap_err();
    let json = serde_json::to_value(err.as_trap().unwrap()).unwrap();
    assert_eq!(json["message"], "fail called with 3");
    assert_eq!(json["origin"], "host_callback");
    assert_eq!(json["frames"][1]["kind"], "host");
    assert_eq!(json["frames"][1]["name"], "env.fail");
}
