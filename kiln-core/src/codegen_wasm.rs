//! WASM backend.
//!
//! Translates a checked [`HirModule`] plus the libraries it calls into
//! one self-contained wasm module using `wasm-encoder`. Library code is
//! linked statically: every function of each referenced library is
//! copied into the output.
//!
//! Function index space: the host intrinsics (imported from `env`),
//! then the unit's declared functions, then `main`, then libraries in
//! the order they were passed in.
//!
//! Memory layout: string literals live in an active data segment
//! starting at [`DATA_OFFSET`]. Each one is a little-endian `u32`
//! byte length followed by its UTF-8 bytes, padded to 4 bytes. A
//! `str` value is the address of its length prefix.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection,
    Function, FunctionSection, ImportSection, Instruction, MemorySection, MemoryType, Module,
    TypeSection, ValType,
};

use crate::ast::{BinaryOp, UnaryOp};
use crate::builtins::{HOST_MODULE, INTRINSICS, Intrinsic};
use crate::error::CoreError;
use crate::hir::{Callee, HirExpr, HirExprKind, HirFunction, HirModule, HirStmt};
use crate::library::Library;

/// Address of the first string literal. Address 0 is never a valid `str`.
pub const DATA_OFFSET: u32 = 8;
/// Upper bound on the literal data of one module.
pub const MAX_DATA_BYTES: usize = 16 * 1024 * 1024;
const PAGE_SIZE: u64 = 65_536;

pub const MEMORY_EXPORT: &str = "memory";
pub const ENTRY_EXPORT: &str = "main";

pub fn generate_wasm(module: &HirModule, libraries: &[Arc<Library>]) -> Result<Vec<u8>, CoreError> {
    let main = module
        .main
        .as_ref()
        .ok_or_else(|| CoreError::Codegen("module has no entry point".to_string()))?;

    let import_count = INTRINSICS.len() as u32;
    let user_base = import_count;
    let main_index = user_base + module.functions.len() as u32;

    let mut library_bases = BTreeMap::new();
    let mut next = main_index + 1;
    for &index in &module.libraries_used {
        let library = libraries
            .get(index)
            .ok_or_else(|| CoreError::Codegen(format!("library #{index} is not available")))?;
        library_bases.insert(index, next);
        next += library.module().functions.len() as u32;
    }

    let user_linkage = Linkage {
        local_base: user_base,
        library_bases: &library_bases,
    };

    // (function, linkage) in index-space order, after the imports.
    let mut bodies: Vec<(&HirFunction, Linkage<'_>)> = module
        .functions
        .iter()
        .map(|function| (function, user_linkage))
        .collect();
    bodies.push((main, user_linkage));
    for (&index, &base) in &library_bases {
        let linkage = Linkage {
            local_base: base,
            library_bases: &library_bases,
        };
        if let Some(library) = libraries.get(index) {
            bodies.extend(library.module().functions.iter().map(|f| (f, linkage)));
        }
    }

    let mut types = TypeTable::default();
    let mut imports = ImportSection::new();
    for intrinsic in INTRINSICS {
        let ty = types.index(1, false);
        imports.import(HOST_MODULE, intrinsic.import_name(), EntityType::Function(ty));
    }

    let mut functions = FunctionSection::new();
    let mut code = CodeSection::new();
    let mut strings = StringPool::default();
    for (function, linkage) in &bodies {
        let ty = types.index(function.param_count, !function.result.is_unit());
        functions.function(ty);
        let body = FunctionEmitter::new(function, *linkage, &mut strings).emit()?;
        code.function(&body);
    }

    let data = strings.finish()?;
    let end = DATA_OFFSET as u64 + data.len() as u64;
    let pages = end.div_ceil(PAGE_SIZE).max(1);

    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: pages,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });

    let mut exports = ExportSection::new();
    exports.export(MEMORY_EXPORT, ExportKind::Memory, 0);
    exports.export(ENTRY_EXPORT, ExportKind::Func, main_index);

    let mut output = Module::new();
    output.section(&types.section);
    output.section(&imports);
    output.section(&functions);
    output.section(&memories);
    output.section(&exports);
    output.section(&code);
    if !data.is_empty() {
        let mut segments = DataSection::new();
        segments.active(0, &ConstExpr::i32_const(DATA_OFFSET as i32), data);
        output.section(&segments);
    }
    Ok(output.finish())
}

/// Function types keyed by arity, since every value is an `i32`.
#[derive(Default)]
struct TypeTable {
    section: TypeSection,
    indices: HashMap<(u32, bool), u32>,
}

impl TypeTable {
    fn index(&mut self, params: u32, has_result: bool) -> u32 {
        if let Some(index) = self.indices.get(&(params, has_result)) {
            return *index;
        }
        let index = self.section.len();
        let results: &[ValType] = if has_result { &[ValType::I32] } else { &[] };
        self.section.ty().function(
            std::iter::repeat_n(ValType::I32, params as usize),
            results.iter().copied(),
        );
        self.indices.insert((params, has_result), index);
        index
    }
}

#[derive(Default)]
struct StringPool {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StringPool {
    fn intern(&mut self, value: &str) -> u32 {
        if let Some(offset) = self.offsets.get(value) {
            return *offset;
        }
        let offset = DATA_OFFSET + self.data.len() as u32;
        self.data
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.data.extend_from_slice(value.as_bytes());
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        self.offsets.insert(value.to_string(), offset);
        offset
    }

    fn finish(self) -> Result<Vec<u8>, CoreError> {
        if self.data.len() > MAX_DATA_BYTES {
            return Err(CoreError::DataTooLarge(self.data.len()));
        }
        Ok(self.data)
    }
}

/// Maps callees of one unit (user code or a library) to function indices.
#[derive(Clone, Copy)]
struct Linkage<'a> {
    local_base: u32,
    library_bases: &'a BTreeMap<usize, u32>,
}

impl Linkage<'_> {
    fn index(&self, callee: Callee) -> Result<u32, CoreError> {
        match callee {
            Callee::Local(index) => Ok(self.local_base + index),
            Callee::Intrinsic(intrinsic) => Ok(intrinsic.import_index()),
            Callee::Library { library, function } => self
                .library_bases
                .get(&library)
                .map(|base| base + function)
                .ok_or_else(|| CoreError::Codegen(format!("library #{library} was not linked"))),
        }
    }
}

struct FunctionEmitter<'a> {
    function: &'a HirFunction,
    linkage: Linkage<'a>,
    strings: &'a mut StringPool,
    body: Function,
}

impl<'a> FunctionEmitter<'a> {
    fn new(function: &'a HirFunction, linkage: Linkage<'a>, strings: &'a mut StringPool) -> Self {
        let locals = function.locals[function.param_count as usize..]
            .iter()
            .map(|_| ValType::I32);
        FunctionEmitter {
            function,
            linkage,
            strings,
            body: Function::new_with_locals_types(locals),
        }
    }

    fn emit(mut self) -> Result<Function, CoreError> {
        let function = self.function;
        self.stmts(&function.body)?;
        if !function.result.is_unit() {
            // Checked functions return on every path.
            self.body.instruction(&Instruction::Unreachable);
        }
        self.body.instruction(&Instruction::End);
        Ok(self.body)
    }

    fn stmts(&mut self, stmts: &[HirStmt]) -> Result<(), CoreError> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &HirStmt) -> Result<(), CoreError> {
        match stmt {
            HirStmt::Set { local, value } => {
                self.expr(value)?;
                self.body.instruction(&Instruction::LocalSet(local.0));
            }
            HirStmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.expr(cond)?;
                self.body.instruction(&Instruction::If(BlockType::Empty));
                self.stmts(then_body)?;
                if !else_body.is_empty() {
                    self.body.instruction(&Instruction::Else);
                    self.stmts(else_body)?;
                }
                self.body.instruction(&Instruction::End);
            }
            HirStmt::While { cond, body } => {
                self.body.instruction(&Instruction::Block(BlockType::Empty));
                self.body.instruction(&Instruction::Loop(BlockType::Empty));
                self.expr(cond)?;
                self.body.instruction(&Instruction::I32Eqz);
                self.body.instruction(&Instruction::BrIf(1));
                self.stmts(body)?;
                self.body.instruction(&Instruction::Br(0));
                self.body.instruction(&Instruction::End);
                self.body.instruction(&Instruction::End);
            }
            HirStmt::Return(value) => {
                if let Some(value) = value {
                    self.expr(value)?;
                }
                self.body.instruction(&Instruction::Return);
            }
            HirStmt::Expr(value) => {
                self.expr(value)?;
                if !value.ty.is_unit() {
                    self.body.instruction(&Instruction::Drop);
                }
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &HirExpr) -> Result<(), CoreError> {
        match &expr.kind {
            HirExprKind::Int(value) => {
                self.body.instruction(&Instruction::I32Const(*value));
            }
            HirExprKind::Bool(value) => {
                self.body.instruction(&Instruction::I32Const(i32::from(*value)));
            }
            HirExprKind::Str(value) => {
                let offset = self.strings.intern(value);
                self.body.instruction(&Instruction::I32Const(offset as i32));
            }
            HirExprKind::Local(local) => {
                self.body.instruction(&Instruction::LocalGet(local.0));
            }
            HirExprKind::Call { callee, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let index = self.linkage.index(*callee)?;
                self.body.instruction(&Instruction::Call(index));
            }
            HirExprKind::Unary { op, operand } => match op {
                UnaryOp::Neg => {
                    self.body.instruction(&Instruction::I32Const(0));
                    self.expr(operand)?;
                    self.body.instruction(&Instruction::I32Sub);
                }
                UnaryOp::Not => {
                    self.expr(operand)?;
                    self.body.instruction(&Instruction::I32Eqz);
                }
            },
            HirExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs)?,
            HirExprKind::Assert { cond, message } => {
                self.expr(cond)?;
                self.body.instruction(&Instruction::I32Eqz);
                self.body.instruction(&Instruction::If(BlockType::Empty));
                self.expr(message)?;
                self.body
                    .instruction(&Instruction::Call(Intrinsic::Panic.import_index()));
                self.body.instruction(&Instruction::End);
            }
            HirExprKind::Error => {
                return Err(CoreError::Codegen(format!(
                    "unresolved expression in `{}`",
                    self.function.name
                )));
            }
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, lhs: &HirExpr, rhs: &HirExpr) -> Result<(), CoreError> {
        let result = BlockType::Result(ValType::I32);
        match op {
            BinaryOp::And => {
                self.expr(lhs)?;
                self.body.instruction(&Instruction::If(result));
                self.expr(rhs)?;
                self.body.instruction(&Instruction::Else);
                self.body.instruction(&Instruction::I32Const(0));
                self.body.instruction(&Instruction::End);
                return Ok(());
            }
            BinaryOp::Or => {
                self.expr(lhs)?;
                self.body.instruction(&Instruction::If(result));
                self.body.instruction(&Instruction::I32Const(1));
                self.body.instruction(&Instruction::Else);
                self.expr(rhs)?;
                self.body.instruction(&Instruction::End);
                return Ok(());
            }
            _ => {}
        }

        self.expr(lhs)?;
        self.expr(rhs)?;
        let instruction = arithmetic_instruction(op).ok_or_else(|| {
            CoreError::Codegen(format!("operator `{}` has no direct encoding", op.symbol()))
        })?;
        self.body.instruction(&instruction);
        Ok(())
    }
}

fn arithmetic_instruction(op: BinaryOp) -> Option<Instruction<'static>> {
    let instruction = match op {
        BinaryOp::Add => Instruction::I32Add,
        BinaryOp::Sub => Instruction::I32Sub,
        BinaryOp::Mul => Instruction::I32Mul,
        // Traps on a zero divisor and on `i32::MIN / -1`.
        BinaryOp::Div => Instruction::I32DivS,
        BinaryOp::Rem => Instruction::I32RemS,
        BinaryOp::Lt => Instruction::I32LtS,
        BinaryOp::Le => Instruction::I32LeS,
        BinaryOp::Gt => Instruction::I32GtS,
        BinaryOp::Ge => Instruction::I32GeS,
        BinaryOp::Eq => Instruction::I32Eq,
        BinaryOp::Ne => Instruction::I32Ne,
        BinaryOp::And | BinaryOp::Or => return None,
    };
    Some(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::typecheck::{CheckOptions, check_unit};

    fn compile(source: &str, libraries: &[Arc<Library>]) -> Vec<u8> {
        let lexed = lex(source);
        let unit = parse(source, &lexed).unit.expect("unit");
        let options = CheckOptions {
            libraries,
            ..CheckOptions::default()
        };
        let checked = check_unit(&unit, &options);
        assert!(
            checked.diagnostics.iter().all(|d| !d.is_error()),
            "{:?}",
            checked.diagnostics
        );
        generate_wasm(&checked.module, libraries).expect("codegen")
    }

    fn validate(bytes: &[u8]) {
        wasmparser::Validator::new()
            .validate_all(bytes)
            .expect("module validates");
    }

    #[test]
    fn emits_valid_module_for_control_flow() {
        let bytes = compile(
            "fn sum(n: int) -> int { let total = 0; while n > 0 { total = total + n; n = n - 1; } return total; }\n\
             let ok = sum(3) == 6 && !false || true;\n\
             if ok { print(\"yes\"); } else { print(-1); }\n\
             assert(ok, \"sum\");",
            &[],
        );
        validate(&bytes);
    }

    #[test]
    fn links_library_functions() {
        let math = Arc::new(
            Library::from_source(
                "math",
                "fn square(x: int) -> int { return x * x; }\nfn cube(x: int) -> int { return square(x) * x; }",
            )
            .expect("library"),
        );
        let bytes = compile("print(math.cube(3));", &[math]);
        validate(&bytes);
    }

    #[test]
    fn interns_each_literal_once() {
        let mut pool = StringPool::default();
        let first = pool.intern("hi");
        let again = pool.intern("hi");
        let other = pool.intern("there");
        assert_eq!(first, DATA_OFFSET);
        assert_eq!(first, again);
        assert_eq!(other, DATA_OFFSET + 8);
        let data = pool.finish().expect("data");
        assert_eq!(&data[..6], &[2, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn runs_under_wasmi() {
        use wasmi::{Caller, Engine, Linker, Store};

        let bytes = compile("fn fact(n: int) -> int { if n <= 1 { return 1; } return n * fact(n - 1); }\nprint(fact(5));", &[]);
        let engine = Engine::default();
        let module = wasmi::Module::new(&engine, &bytes[..]).expect("module");
        let mut store = Store::new(&engine, Vec::<i32>::new());
        let mut linker = Linker::<Vec<i32>>::new(&engine);
        for intrinsic in INTRINSICS {
            let name = intrinsic.import_name();
            linker
                .func_wrap(HOST_MODULE, name, |mut caller: Caller<'_, Vec<i32>>, value: i32| {
                    caller.data_mut().push(value);
                })
                .expect("define");
        }
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), ()>(&store, ENTRY_EXPORT)
            .expect("main");
        main.call(&mut store, ()).expect("run");
        assert_eq!(store.data(), &vec![120]);
    }
}
