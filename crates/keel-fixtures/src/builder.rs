//! Guest module assembler.
//!
//! A small, order-aware wrapper over `wasm-encoder`: declare imports, then
//! functions (each optionally exported), optional memory, data and an
//! `externref` table, and call [`GuestModule::finish`] to get validated
//! bytes.  Function types are de-duplicated automatically.

use std::collections::HashSet;

use wasm_encoder::{
    CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, ImportSection, Instruction, MemorySection, MemoryType, Module, RefType,
    StartSection, TableSection, TableType, TypeSection, ValType,
};

use crate::error::{FixtureError, FixtureResult};

type FuncSig = (Vec<ValType>, Vec<ValType>);

struct Import {
    module: String,
    name: String,
    ty: u32,
}

struct Defined {
    export: Option<String>,
    ty: u32,
    locals: Vec<(u32, ValType)>,
    body: Vec<Instruction<'static>>,
}

struct MemoryDef {
    export: Option<String>,
    min_pages: u64,
}

/// Builder for a single guest module.
#[derive(Default)]
pub struct GuestModule {
    types: Vec<FuncSig>,
    imports: Vec<Import>,
    functions: Vec<Defined>,
    memory: Option<MemoryDef>,
    data: Vec<(i32, Vec<u8>)>,
    externref_slots: Option<u64>,
    start: Option<u32>,
}

impl GuestModule {
    pub fn new() -> Self {
        Self::default()
    }

    fn type_index(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        let sig = (params.to_vec(), results.to_vec());
        if let Some(pos) = self.types.iter().position(|t| *t == sig) {
            return pos as u32;
        }
        self.types.push(sig);
        (self.types.len() - 1) as u32
    }

    /// Declare an imported function and return its function index.
    pub fn import_func(
        &mut self,
        module: &str,
        name: &str,
        params: &[ValType],
        results: &[ValType],
    ) -> FixtureResult<u32> {
        if !self.functions.is_empty() {
            return Err(FixtureError::ImportAfterFunction {
                module: module.to_string(),
                name: name.to_string(),
            });
        }
        let ty = self.type_index(params, results);
        self.imports.push(Import {
            module: module.to_string(),
            name: name.to_string(),
            ty,
        });
        Ok((self.imports.len() - 1) as u32)
    }

    /// Define an exported function.  `body` must not include the final `end`.
    pub fn export_func(
        &mut self,
        name: &str,
        params: &[ValType],
        results: &[ValType],
        body: Vec<Instruction<'static>>,
    ) -> u32 {
        self.define(Some(name.to_string()), params, results, Vec::new(), body)
    }

    /// Define a function that is not exported, with extra locals.
    pub fn internal_func(
        &mut self,
        params: &[ValType],
        results: &[ValType],
        locals: Vec<(u32, ValType)>,
        body: Vec<Instruction<'static>>,
    ) -> u32 {
        self.define(None, params, results, locals, body)
    }

    fn define(
        &mut self,
        export: Option<String>,
        params: &[ValType],
        results: &[ValType],
        locals: Vec<(u32, ValType)>,
        body: Vec<Instruction<'static>>,
    ) -> u32 {
        let ty = self.type_index(params, results);
        self.functions.push(Defined {
            export,
            ty,
            locals,
            body,
        });
        (self.imports.len() + self.functions.len() - 1) as u32
    }

    /// Add a linear memory of `min_pages` pages, exported as `export`.
    pub fn memory(&mut self, export: &str, min_pages: u64) -> &mut Self {
        self.memory = Some(MemoryDef {
            export: Some(export.to_string()),
            min_pages,
        });
        self
    }

    /// Add an active data segment at `offset` of memory 0.
    pub fn data(&mut self, offset: i32, bytes: &[u8]) -> &mut Self {
        self.data.push((offset, bytes.to_vec()));
        self
    }

    /// Add table 0 holding `slots` external references.
    pub fn externref_table(&mut self, slots: u64) -> &mut Self {
        self.externref_slots = Some(slots);
        self
    }

    pub fn start(&mut self, func: u32) -> &mut Self {
        self.start = Some(func);
        self
    }

    /// Assemble and validate the module.
    pub fn finish(&self) -> FixtureResult<Vec<u8>> {
        let mut module = Module::new();

        // 1. Types
        let mut types = TypeSection::new();
        for (params, results) in &self.types {
            types.ty().function(params.clone(), results.clone());
        }
        module.section(&types);

        // 2. Imports
        if !self.imports.is_empty() {
            let mut imports = ImportSection::new();
            for import in &self.imports {
                imports.import(&import.module, &import.name, EntityType::Function(import.ty));
            }
            module.section(&imports);
        }

        // 3. Function declarations
        let mut funcs = FunctionSection::new();
        for func in &self.functions {
            funcs.function(func.ty);
        }
        module.section(&funcs);

        // 4. Table
        if let Some(slots) = self.externref_slots {
            let mut tables = TableSection::new();
            tables.table(TableType {
                element_type: RefType::EXTERNREF,
                table64: false,
                minimum: slots,
                maximum: None,
                shared: false,
            });
            module.section(&tables);
        }

        // 5. Memory
        if let Some(memory) = &self.memory {
            let mut memories = MemorySection::new();
            memories.memory(MemoryType {
                minimum: memory.min_pages,
                maximum: None,
                memory64: false,
                shared: false,
                page_size_log2: None,
            });
            module.section(&memories);
        }

        // 6. Exports
        let mut exports = ExportSection::new();
        let mut seen = HashSet::new();
        let base = self.imports.len() as u32;
        for (offset, func) in self.functions.iter().enumerate() {
            if let Some(name) = &func.export {
                if !seen.insert(name.as_str()) {
                    return Err(FixtureError::DuplicateExport(name.clone()));
                }
                exports.export(name, ExportKind::Func, base + offset as u32);
            }
        }
        if let Some(MemoryDef {
            export: Some(name), ..
        }) = &self.memory
        {
            if !seen.insert(name.as_str()) {
                return Err(FixtureError::DuplicateExport(name.clone()));
            }
            exports.export(name, ExportKind::Memory, 0);
        }
        module.section(&exports);

        // 7. Start
        if let Some(start) = self.start {
            if start as usize >= self.imports.len() + self.functions.len() {
                return Err(FixtureError::StartOutOfRange(start));
            }
            module.section(&StartSection {
                function_index: start,
            });
        }

        // 8. Code
        let mut code = CodeSection::new();
        for func in &self.functions {
            let mut f = Function::new(func.locals.iter().copied());
            for instruction in &func.body {
                f.instruction(instruction);
            }
            f.instruction(&Instruction::End);
            code.function(&f);
        }
        module.section(&code);

        // 9. Data
        if !self.data.is_empty() {
            let mut data = DataSection::new();
            for (offset, bytes) in &self.data {
                data.active(0, &ConstExpr::i32_const(*offset), bytes.iter().copied());
            }
            module.section(&data);
        }

        let bytes = module.finish();
        wasmparser::validate(&bytes).map_err(|e| FixtureError::ValidationFailed(format!("{e}")))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_are_deduplicated() {
        let mut module = GuestModule::new();
        module.export_func("a", &[ValType::I32], &[ValType::I32], vec![Instruction::LocalGet(0)]);
        module.export_func("b", &[ValType::I32], &[ValType::I32], vec![Instruction::LocalGet(0)]);
        assert_eq!(module.types.len(), 1);
        assert!(module.finish().is_ok());
    }

    #[test]
    fn imports_take_low_indices() {
        let mut module = GuestModule::new();
        let imported = module.import_func("env", "f", &[], &[]).unwrap();
        let defined = module.export_func("g", &[], &[], vec![Instruction::Call(imported)]);
        assert_eq!((imported, defined), (0, 1));
        assert!(module.finish().is_ok());
    }

    #[test]
    fn import_after_function_is_rejected() {
        let mut module = GuestModule::new();
        module.export_func("g", &[], &[], vec![]);
        let err = module.import_func("env", "f", &[], &[]).unwrap_err();
        assert!(matches!(err, FixtureError::ImportAfterFunction { .. }));
    }

    #[test]
    fn duplicate_export_is_rejected() {
        let mut module = GuestModule::new();
        module.export_func("g", &[], &[], vec![]);
        module.export_func("g", &[], &[], vec![]);
        assert!(matches!(module.finish(), Err(FixtureError::DuplicateExport(_))));
    }

    #[test]
    fn invalid_body_fails_validation() {
        let mut module = GuestModule::new();
        module.export_func("bad", &[], &[ValType::I32], vec![]);
        assert!(matches!(module.finish(), Err(FixtureError::ValidationFailed(_))));
    }
}
