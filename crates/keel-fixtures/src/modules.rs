//! Canned guest modules.
//!
//! Each function returns validated module bytes.  Export names and
//! behaviour are part of the fixture contract that the runtime tests rely
//! on; see the per-module docs.

use wasm_encoder::{Instruction, MemArg, ValType};

use crate::builder::GuestModule;
use crate::error::FixtureResult;

/// Widest tuple export in [`echo_module`] (`tuple_8`).
pub const WIDEST_TUPLE: u32 = 8;

/// Guest memory page size.
pub const PAGE_SIZE: usize = 65_536;

/// Bytes placed at offset 0 of [`memory_module`]'s memory.
pub const GREETING: &[u8] = b"hello";

fn echo(module: &mut GuestModule, name: &str, ty: ValType) {
    module.export_func(name, &[ty], &[ty], vec![Instruction::LocalGet(0)]);
}

/// Exports with no imports:
///
/// | export           | type                         | behaviour                 |
/// |------------------|------------------------------|---------------------------|
/// | `echo_<kind>`    | `(k) -> k` for i32 … externref | returns its argument    |
/// | `add`            | `(i32, i32) -> i32`          | wrapping sum              |
/// | `noop`           | `() -> ()`                   | nothing                   |
/// | `answer`         | `() -> i32`                  | 42                        |
/// | `tuple_<n>`      | `() -> (i32 × n)`, n = 2..=8 | literals `1..=n`          |
/// | `mixed`          | `() -> (i32, i64, f64)`      | `(1, 2, 3.5)`             |
/// | `stash`          | `(externref) -> ()`          | stores into table slot 0  |
/// | `unstash`        | `() -> externref`            | loads table slot 0        |
pub fn echo_module() -> FixtureResult<Vec<u8>> {
    let mut module = GuestModule::new();
    module.externref_table(1);

    echo(&mut module, "echo_i32", ValType::I32);
    echo(&mut module, "echo_i64", ValType::I64);
    echo(&mut module, "echo_f32", ValType::F32);
    echo(&mut module, "echo_f64", ValType::F64);
    echo(&mut module, "echo_funcref", ValType::FUNCREF);
    echo(&mut module, "echo_externref", ValType::EXTERNREF);

    module.export_func(
        "add",
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        vec![
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32Add,
        ],
    );
    module.export_func("noop", &[], &[], vec![]);
    module.export_func("answer", &[], &[ValType::I32], vec![Instruction::I32Const(42)]);

    for n in 2..=WIDEST_TUPLE {
        let results = vec![ValType::I32; n as usize];
        let body = (1..=n as i32).map(Instruction::I32Const).collect();
        module.export_func(&format!("tuple_{n}"), &[], &results, body);
    }

    module.export_func(
        "mixed",
        &[],
        &[ValType::I32, ValType::I64, ValType::F64],
        vec![
            Instruction::I32Const(1),
            Instruction::I64Const(2),
            Instruction::F64Const(3.5),
        ],
    );

    module.export_func(
        "stash",
        &[ValType::EXTERNREF],
        &[],
        vec![
            Instruction::I32Const(0),
            Instruction::LocalGet(0),
            Instruction::TableSet(0),
        ],
    );
    module.export_func(
        "unstash",
        &[],
        &[ValType::EXTERNREF],
        vec![Instruction::I32Const(0), Instruction::TableGet(0)],
    );

    module.finish()
}

/// Imports `env.fail`, `env.double` and `env.reenter`, all `(i32) -> i32`.
///
/// | export             | type                 | behaviour                       |
/// |--------------------|----------------------|---------------------------------|
/// | `call_fail`        | `(i32) -> i32`       | forwards to `env.fail`          |
/// | `call_double`      | `(i32) -> i32`       | forwards to `env.double`        |
/// | `call_reenter`     | `(i32) -> i32`       | forwards to `env.reenter`       |
/// | `double_then_add`  | `(i32) -> i32`       | `env.double(x) + 1`             |
/// | `trap_unreachable` | `() -> ()`           | executes `unreachable`          |
/// | `div`              | `(i32, i32) -> i32`  | signed division (traps on zero) |
pub fn callback_module() -> FixtureResult<Vec<u8>> {
    let mut module = GuestModule::new();
    let i32_unary = (&[ValType::I32][..], &[ValType::I32][..]);

    let fail = module.import_func("env", "fail", i32_unary.0, i32_unary.1)?;
    let double = module.import_func("env", "double", i32_unary.0, i32_unary.1)?;
    let reenter = module.import_func("env", "reenter", i32_unary.0, i32_unary.1)?;

    for (name, target) in [
        ("call_fail", fail),
        ("call_double", double),
        ("call_reenter", reenter),
    ] {
        module.export_func(
            name,
            i32_unary.0,
            i32_unary.1,
            vec![Instruction::LocalGet(0), Instruction::Call(target)],
        );
    }
    module.export_func(
        "double_then_add",
        i32_unary.0,
        i32_unary.1,
        vec![
            Instruction::LocalGet(0),
            Instruction::Call(double),
            Instruction::I32Const(1),
            Instruction::I32Add,
        ],
    );
    module.export_func("trap_unreachable", &[], &[], vec![Instruction::Unreachable]);
    module.export_func(
        "div",
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        vec![
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32DivS,
        ],
    );

    module.finish()
}

/// One exported page of memory named `memory` with [`GREETING`] at offset 0.
///
/// | export     | type                | behaviour                      |
/// |------------|---------------------|--------------------------------|
/// | `load8`    | `(i32) -> i32`      | unsigned byte at address       |
/// | `store8`   | `(i32, i32) -> ()`  | stores low byte at address     |
pub fn memory_module() -> FixtureResult<Vec<u8>> {
    let mut module = GuestModule::new();
    module.memory("memory", 1).data(0, GREETING);

    let byte = MemArg {
        offset: 0,
        align: 0,
        memory_index: 0,
    };
    module.export_func(
        "load8",
        &[ValType::I32],
        &[ValType::I32],
        vec![Instruction::LocalGet(0), Instruction::I32Load8U(byte)],
    );
    module.export_func(
        "store8",
        &[ValType::I32, ValType::I32],
        &[],
        vec![
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32Store8(byte),
        ],
    );

    module.finish()
}

/// Imports `env.fail: (i32) -> i32` and calls it with 7 from the start
/// function, dropping the result.
pub fn failing_start_module() -> FixtureResult<Vec<u8>> {
    let mut module = GuestModule::new();
    let fail = module.import_func("env", "fail", &[ValType::I32], &[ValType::I32])?;
    let start = module.internal_func(
        &[],
        &[],
        Vec::new(),
        vec![
            Instruction::I32Const(7),
            Instruction::Call(fail),
            Instruction::Drop,
        ],
    );
    module.start(start);
    module.finish()
}
