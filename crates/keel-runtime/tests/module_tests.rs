//! Module description, memory access, configuration and plan caching.

use keel_fixtures::{callback_module, echo_module, memory_module, GREETING, PAGE_SIZE};
use keel_runtime::{
    Engine, Error, FunctionSignature, Instance, Linker, Module, RuntimeConfig, Store, ValueKind,
};

use ValueKind::{Int32, Int64};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn compile(engine: &Engine, wasm: Vec<u8>) -> Module {
    Module::new(engine, &wasm).expect("fixture compiles")
}

fn instantiate(engine: &Engine, wasm: Vec<u8>) -> (Store<()>, Instance) {
    let module = compile(engine, wasm);
    let mut store = Store::new(engine, ());
    let instance = Linker::new(engine)
        .instantiate(&mut store, &module)
        .expect("instantiate");
    (store, instance)
}

// ══════════════════════════════════════════════════════════════════════════════
// Module description
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn describe_lists_exports_with_signatures() {
    let engine = Engine::default();
    let module = compile(&engine, echo_module().unwrap());
    let description = module.describe();

    assert_eq!(
        description.export("add"),
        Some(&FunctionSignature::new([Int32, Int32], [Int32]))
    );
    assert_eq!(
        description.export("echo_i64"),
        Some(&FunctionSignature::new([Int64], [Int64]))
    );
    assert_eq!(description.export("tuple_8").unwrap().results().len(), 8);
    assert!(description.export("missing").is_none());
    assert!(description.imports.is_empty());
    assert!(description.memories.is_empty());
}

#[test]
fn describe_lists_imports() {
    let engine = Engine::default();
    let description = compile(&engine, callback_module().unwrap()).describe();
    let names: Vec<String> = description
        .imports
        .iter()
        .map(|import| format!("{}.{}", import.module, import.name))
        .collect();
    assert_eq!(names, ["env.fail", "env.double", "env.reenter"]);
    assert!(description
        .imports
        .iter()
        .all(|import| import.signature == FunctionSignature::new([Int32], [Int32])));
}

#[test]
fn describe_lists_memories_and_serializes() {
    let engine = Engine::default();
    let description = compile(&engine, memory_module().unwrap()).describe();
    assert_eq!(description.memories, ["memory"]);

    let json: serde_json::Value = serde_json::from_str(&description.to_json().unwrap()).unwrap();
    assert_eq!(json["memories"][0], "memory");
    let load8 = json["exports"]
        .as_array()
        .unwrap()
        .iter()
        .find(|export| export["name"] == "load8")
        .unwrap();
    assert_eq!(load8["signature"]["params"][0], "int32");
}

#[test]
fn invalid_bytes_fail_to_compile() {
    let engine = Engine::default();
    let err = Module::new(&engine, b"definitely not wasm").err().unwrap();
    assert!(matches!(err, Error::Engine(_)));
}

// ══════════════════════════════════════════════════════════════════════════════
// Memory
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn memory_reads_initial_data() {
    let engine = Engine::default();
    let (store, instance) = instantiate(&engine, memory_module().unwrap());
    let memory = instance.get_memory(&store, "memory").expect("exported memory");
    assert_eq!(memory.size(&store).unwrap(), PAGE_SIZE);
    assert_eq!(memory.read_bytes(&store, 0, GREETING.len()).unwrap(), GREETING);
}

#[test]
fn host_writes_are_visible_to_the_guest_and_back() {
    let engine = Engine::default();
    let (mut store, instance) = instantiate(&engine, memory_module().unwrap());
    let memory = instance.get_memory(&store, "memory").unwrap();

    memory.write(&mut store, 100, b"xyz").unwrap();
    let load8 = instance.get_typed_func::<i32, i32>(&mut store, "load8").unwrap();
    assert_eq!(load8.call(&mut store, 101).unwrap(), i32::from(b'y'));

    let store8 = instance
        .get_typed_func::<(i32, i32), ()>(&mut store, "store8")
        .unwrap();
    store8.call(&mut store, (200, 0x141)).unwrap();
    let mut byte = [0u8; 1];
    memory.read(&store, 200, &mut byte).unwrap();
    assert_eq!(byte, [0x41]);
}

#[test]
fn memory_access_is_bounds_checked() {
    let engine = Engine::default();
    let (mut store, instance) = instantiate(&engine, memory_module().unwrap());
    let memory = instance.get_memory(&store, "memory").unwrap();

    let err = memory.read_bytes(&store, PAGE_SIZE - 2, 4).unwrap_err();
    assert!(matches!(
        err,
        Error::MemoryOutOfBounds {
            offset,
            len: 4,
            size: PAGE_SIZE
        } if offset == PAGE_SIZE - 2
    ));
    assert!(memory.write(&mut store, PAGE_SIZE, b"x").is_err());
    assert!(memory.write(&mut store, PAGE_SIZE - 1, b"x").is_ok());
}

#[test]
fn missing_memory_is_none() {
    let engine = Engine::default();
    let (store, instance) = instantiate(&engine, echo_module().unwrap());
    assert!(instance.get_memory(&store, "memory").is_none());
}

// ══════════════════════════════════════════════════════════════════════════════
// Configuration and plan caching
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn store_sees_engine_configuration() {
    let config = RuntimeConfig::from_json(r#"{ "max_call_depth": 4 }"#).unwrap();
    let engine = Engine::new(config.clone());
    let store = Store::new(&engine, ());
    assert_eq!(store.config(), &config);
    assert_eq!(engine.config().max_call_depth, 4);
}

#[test]
fn cached_plans_answer_repeat_lookups() {
    let engine = Engine::default();
    let (mut store, instance) = instantiate(&engine, echo_module().unwrap());
    for _ in 0..3 {
        let add = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, "add")
            .unwrap();
        assert_eq!(add.call(&mut store, (2, 3)).unwrap(), 5);
        assert!(instance
            .get_typed_func::<(i64, i64), i64>(&mut store, "add")
            .is_none());
    }
}

#[test]
fn plans_work_without_caching() {
    let engine = Engine::new(RuntimeConfig {
        cache_plans: false,
        ..RuntimeConfig::default()
    });
    let (mut store, instance) = instantiate(&engine, echo_module().unwrap());
    for _ in 0..2 {
        let add = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, "add")
            .unwrap();
        assert_eq!(add.call(&mut store, (2, 3)).unwrap(), 5);
    }
    assert!(instance
        .get_typed_func::<(), (i32, i32)>(&mut store, "add")
        .is_none());
}

#[test]
fn plans_are_per_instance() {
    let engine = Engine::default();
    let echo = compile(&engine, echo_module().unwrap());
    let memory = compile(&engine, memory_module().unwrap());
    let mut store = Store::new(&engine, ());
    let linker = Linker::new(&engine);
    let first = linker.instantiate(&mut store, &echo).unwrap();
    let second = linker.instantiate(&mut store, &memory).unwrap();

    assert!(first.get_typed_func::<i32, i32>(&mut store, "echo_i32").is_some());
    assert!(second.get_typed_func::<i32, i32>(&mut store, "echo_i32").is_none());
    assert!(second.get_typed_func::<i32, i32>(&mut store, "load8").is_some());
}
