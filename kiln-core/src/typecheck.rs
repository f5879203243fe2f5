//! Name resolution, type checking and lints.
//!
//! Lowers a parsed [`SourceUnit`] into [`HirModule`]. Checking never
//! stops at the first error: every problem becomes a diagnostic and
//! the offending expression gets [`Type::Error`], which is accepted
//! everywhere so one mistake is reported once.
//!
//! Function declarations are hoisted and see only their parameters
//! and their own locals. The remaining top-level statements form the
//! body of `main`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::ast::{self, BinaryOp, ExprKind, Item, SourceUnit, StmtKind, UnaryOp};
use crate::builtins::{BuiltinKind, Intrinsic, find_builtin, output_intrinsic};
use crate::diagnostic::{Diagnostic, codes};
use crate::hir::{Callee, HirExpr, HirExprKind, HirFunction, HirModule, HirStmt, LocalId};
use crate::library::Library;
use crate::span::Span;
use crate::types::{FunctionSignature, Type};

#[derive(Debug, Clone, Default)]
pub struct CheckOptions<'a> {
    /// Libraries the unit may call into, by position.
    pub libraries: &'a [Arc<Library>],
    /// More libraries may still arrive; unknown library names are
    /// reported as not loaded yet instead of unknown.
    pub libraries_pending: bool,
    /// Only function declarations are allowed and no `main` is built.
    pub library_mode: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub module: HirModule,
    /// Signatures of declared functions, parallel to `module.functions`.
    pub signatures: Vec<FunctionSignature>,
    /// Type of every local and parameter, keyed by its declaring name span.
    pub bindings: BTreeMap<Span, Type>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn check_unit(unit: &SourceUnit, options: &CheckOptions<'_>) -> CheckResult {
    let mut checker = Checker {
        options,
        signatures: Vec::new(),
        function_index: HashMap::new(),
        bindings: BTreeMap::new(),
        diagnostics: Vec::new(),
        libraries_used: BTreeSet::new(),
    };

    let declarations: Vec<&ast::FunctionDecl> = unit
        .items
        .iter()
        .filter_map(|item| match item {
            Item::Function(function) => Some(function),
            Item::Statement(_) => None,
        })
        .collect();

    for function in &declarations {
        checker.declare(function);
    }

    let functions = declarations
        .iter()
        .enumerate()
        .map(|(index, function)| checker.check_function(index, function))
        .collect();

    let statements: Vec<&ast::Stmt> = unit
        .items
        .iter()
        .filter_map(|item| match item {
            Item::Statement(stmt) => Some(stmt),
            Item::Function(_) => None,
        })
        .collect();

    let main = if options.library_mode {
        for stmt in statements {
            checker.diagnostics.push(Diagnostic::error(
                codes::ITEM_NOT_ALLOWED,
                "libraries may only contain function declarations",
                stmt.span,
            ));
        }
        None
    } else {
        Some(checker.check_main(&statements))
    };

    CheckResult {
        module: HirModule {
            functions,
            main,
            libraries_used: checker.libraries_used,
        },
        signatures: checker.signatures,
        bindings: checker.bindings,
        diagnostics: checker.diagnostics,
    }
}

struct Checker<'a> {
    options: &'a CheckOptions<'a>,
    signatures: Vec<FunctionSignature>,
    function_index: HashMap<String, u32>,
    bindings: BTreeMap<Span, Type>,
    diagnostics: Vec<Diagnostic>,
    libraries_used: BTreeSet<usize>,
}

/// Locals and lexical scopes of the function being checked.
struct Frame {
    locals: Vec<Slot>,
    scopes: Vec<Vec<(String, LocalId)>>,
    result: Type,
    is_main: bool,
}

struct Slot {
    name: String,
    ty: Type,
    span: Span,
    used: bool,
    param: bool,
}

impl Frame {
    fn new(result: Type, is_main: bool) -> Self {
        Frame {
            locals: Vec::new(),
            scopes: vec![Vec::new()],
            result,
            is_main,
        }
    }

    fn declare(&mut self, name: &ast::Ident, ty: Type, param: bool) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(Slot {
            name: name.name.clone(),
            ty,
            span: name.span,
            used: false,
            param,
        });
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.name.clone(), id));
        }
        id
    }

    fn lookup(&self, name: &str) -> Option<LocalId> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(candidate, _)| candidate == name)
            .map(|(_, id)| *id)
    }

    fn slot(&mut self, id: LocalId) -> &mut Slot {
        &mut self.locals[id.0 as usize]
    }

    fn into_locals(self) -> Vec<Type> {
        self.locals.into_iter().map(|slot| slot.ty).collect()
    }
}

impl<'a> Checker<'a> {
    fn error(&mut self, code: &'static str, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::error(code, message, span));
    }

    fn resolve_type(&mut self, ty: &ast::TypeRef) -> Type {
        match Type::from_name(&ty.name) {
            Some(resolved) => resolved,
            None => {
                self.error(
                    codes::UNKNOWN_TYPE,
                    format!("unknown type `{}`", ty.name),
                    ty.span,
                );
                Type::Error
            }
        }
    }

    fn declare(&mut self, function: &ast::FunctionDecl) {
        let mut params = Vec::with_capacity(function.params.len());
        for param in &function.params {
            if params.iter().any(|(name, _)| name == &param.name.name) {
                self.error(
                    codes::DUPLICATE_DEFINITION,
                    format!("parameter `{}` is declared twice", param.name.name),
                    param.name.span,
                );
            }
            let ty = self.resolve_type(&param.ty);
            if ty.is_unit() {
                self.error(
                    codes::TYPE_MISMATCH,
                    "parameters cannot have type `unit`",
                    param.ty.span,
                );
            }
            params.push((param.name.name.clone(), ty));
        }
        let result = match &function.result {
            Some(ty) => self.resolve_type(ty),
            None => Type::Unit,
        };

        let name = &function.name;
        if find_builtin(&name.name).is_some() {
            self.error(
                codes::DUPLICATE_DEFINITION,
                format!("`{}` is a built-in function and cannot be redefined", name.name),
                name.span,
            );
        } else if self.function_index.contains_key(&name.name) {
            self.error(
                codes::DUPLICATE_DEFINITION,
                format!("function `{}` is already defined", name.name),
                name.span,
            );
        } else {
            self.function_index
                .insert(name.name.clone(), self.signatures.len() as u32);
        }

        self.signatures.push(FunctionSignature {
            name: name.name.clone(),
            params,
            result,
            docs: function.docs.clone(),
        });
    }

    fn check_function(&mut self, index: usize, function: &ast::FunctionDecl) -> HirFunction {
        let signature = self.signatures[index].clone();
        let mut frame = Frame::new(signature.result, false);
        for (param, (_, ty)) in function.params.iter().zip(&signature.params) {
            frame.declare(&param.name, *ty, true);
            self.bindings.insert(param.name.span, *ty);
        }

        let (body, terminates) = self.check_block(&function.body.stmts, &mut frame);
        if !terminates && !signature.result.is_unit() && !signature.result.is_error() {
            self.error(
                codes::MISSING_RETURN,
                format!(
                    "function `{}` may finish without returning a value of type `{}`",
                    signature.name, signature.result
                ),
                function.name.span,
            );
        }

        HirFunction {
            name: signature.name,
            param_count: signature.params.len() as u32,
            locals: frame.into_locals(),
            result: signature.result,
            body,
        }
    }

    fn check_main(&mut self, statements: &[&ast::Stmt]) -> HirFunction {
        let mut frame = Frame::new(Type::Unit, true);
        let (body, _) = self.check_stmts(statements.iter().copied(), &mut frame);
        self.report_unused(&mut frame);
        HirFunction {
            name: "main".to_string(),
            param_count: 0,
            locals: frame.into_locals(),
            result: Type::Unit,
            body,
        }
    }

    /// Checks a block in a fresh scope. Returns the lowered body and
    /// whether every path through it returns.
    fn check_block(&mut self, stmts: &[ast::Stmt], frame: &mut Frame) -> (Vec<HirStmt>, bool) {
        frame.scopes.push(Vec::new());
        let checked = self.check_stmts(stmts.iter(), frame);
        self.report_unused(frame);
        frame.scopes.pop();
        checked
    }

    fn check_stmts<'s>(
        &mut self,
        stmts: impl Iterator<Item = &'s ast::Stmt>,
        frame: &mut Frame,
    ) -> (Vec<HirStmt>, bool) {
        let mut body = Vec::new();
        let mut terminates = false;
        let mut reported_unreachable = false;
        for stmt in stmts {
            if terminates && !reported_unreachable && stmt.kind != StmtKind::Empty {
                self.diagnostics.push(Diagnostic::warning(
                    codes::UNREACHABLE_CODE,
                    "unreachable statement",
                    stmt.span,
                ));
                reported_unreachable = true;
            }
            let stmt_terminates = self.check_stmt(stmt, frame, &mut body);
            terminates |= stmt_terminates;
        }
        (body, terminates)
    }

    /// Reports unused lets of the innermost scope.
    fn report_unused(&mut self, frame: &mut Frame) {
        let Some(scope) = frame.scopes.last() else {
            return;
        };
        for (_, id) in scope {
            let slot = &frame.locals[id.0 as usize];
            if !slot.used && !slot.param && !slot.name.starts_with('_') {
                self.diagnostics.push(Diagnostic::warning(
                    codes::UNUSED_LOCAL,
                    format!("unused local `{}`", slot.name),
                    slot.span,
                ));
            }
        }
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt, frame: &mut Frame, out: &mut Vec<HirStmt>) -> bool {
        match &stmt.kind {
            StmtKind::Empty => {
                self.diagnostics.push(Diagnostic::hidden(
                    codes::EMPTY_STATEMENT,
                    "empty statement",
                    stmt.span,
                ));
                false
            }
            StmtKind::Let { name, ty, init } => {
                let value = self.check_expr(init, frame);
                let declared = ty.as_ref().map(|ty| (self.resolve_type(ty), ty.span));
                let local_ty = match declared {
                    Some((declared, span)) if declared.is_unit() => {
                        self.error(codes::TYPE_MISMATCH, "locals cannot have type `unit`", span);
                        Type::Error
                    }
                    Some((declared, _)) => {
                        if !value.ty.accepts(declared) {
                            self.mismatch(declared, value.ty, init.span);
                        }
                        declared
                    }
                    None if value.ty.is_unit() => {
                        self.error(
                            codes::TYPE_MISMATCH,
                            "cannot bind a value of type `unit`",
                            init.span,
                        );
                        Type::Error
                    }
                    None => value.ty,
                };
                let local = frame.declare(name, local_ty, false);
                self.bindings.insert(name.span, local_ty);
                out.push(HirStmt::Set { local, value });
                false
            }
            StmtKind::Assign { target, value } => {
                let value = self.check_expr(value, frame);
                match frame.lookup(&target.name) {
                    Some(local) => {
                        let expected = frame.slot(local).ty;
                        if !value.ty.accepts(expected) {
                            self.mismatch(expected, value.ty, stmt.span);
                        }
                        out.push(HirStmt::Set { local, value });
                    }
                    None if self.function_index.contains_key(&target.name)
                        || find_builtin(&target.name).is_some() =>
                    {
                        self.error(
                            codes::INVALID_ASSIGNMENT,
                            format!("cannot assign to function `{}`", target.name),
                            target.span,
                        );
                    }
                    None => {
                        self.error(
                            codes::UNKNOWN_NAME,
                            format!("cannot find local `{}` in this scope", target.name),
                            target.span,
                        );
                    }
                }
                false
            }
            StmtKind::If {
                cond,
                then_block,
                else_branch,
            } => {
                let cond = self.check_condition(cond, frame);
                let (then_body, then_returns) = self.check_block(&then_block.stmts, frame);
                let (else_body, else_returns) = match else_branch {
                    Some(ast::ElseBranch::Block(block)) => self.check_block(&block.stmts, frame),
                    Some(ast::ElseBranch::If(nested)) => {
                        let mut body = Vec::new();
                        let returns = self.check_stmt(nested, frame, &mut body);
                        (body, returns)
                    }
                    None => (Vec::new(), false),
                };
                out.push(HirStmt::If {
                    cond,
                    then_body,
                    else_body,
                });
                then_returns && else_returns
            }
            StmtKind::While { cond, body } => {
                let cond = self.check_condition(cond, frame);
                let (body, _) = self.check_block(&body.stmts, frame);
                out.push(HirStmt::While { cond, body });
                false
            }
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|expr| (self.check_expr(expr, frame), expr.span));
                let result = frame.result;
                match value {
                    Some((_, span)) if frame.is_main => {
                        self.error(
                            codes::INVALID_RETURN,
                            "top-level code cannot return a value",
                            span,
                        );
                        out.push(HirStmt::Return(None));
                    }
                    Some((_, span)) if result.is_unit() => {
                        self.error(
                            codes::INVALID_RETURN,
                            "this function does not return a value",
                            span,
                        );
                        out.push(HirStmt::Return(None));
                    }
                    Some((value, span)) => {
                        if !value.ty.accepts(result) {
                            self.mismatch(result, value.ty, span);
                        }
                        out.push(HirStmt::Return(Some(value)));
                    }
                    None if !result.is_unit() && !result.is_error() => {
                        self.error(
                            codes::INVALID_RETURN,
                            format!("expected a return value of type `{result}`"),
                            stmt.span,
                        );
                        out.push(HirStmt::Return(None));
                    }
                    None => out.push(HirStmt::Return(None)),
                }
                true
            }
            StmtKind::Expr(expr) => {
                let value = self.check_expr(expr, frame);
                let is_call = matches!(expr.kind, ExprKind::Call { .. });
                if !is_call && !value.ty.is_unit() && !value.ty.is_error() {
                    self.diagnostics.push(Diagnostic::info(
                        codes::DISCARDED_VALUE,
                        format!("value of type `{}` is discarded", value.ty),
                        expr.span,
                    ));
                }
                out.push(HirStmt::Expr(value));
                false
            }
        }
    }

    fn check_condition(&mut self, cond: &ast::Expr, frame: &mut Frame) -> HirExpr {
        let value = self.check_expr(cond, frame);
        if !value.ty.accepts(Type::Bool) {
            self.mismatch(Type::Bool, value.ty, cond.span);
        }
        value
    }

    fn mismatch(&mut self, expected: Type, found: Type, span: Span) {
        self.error(
            codes::TYPE_MISMATCH,
            format!("expected `{expected}`, found `{found}`"),
            span,
        );
    }

    fn check_expr(&mut self, expr: &ast::Expr, frame: &mut Frame) -> HirExpr {
        match &expr.kind {
            ExprKind::Int(value) => HirExpr::new(HirExprKind::Int(*value), Type::Int),
            ExprKind::Bool(value) => HirExpr::new(HirExprKind::Bool(*value), Type::Bool),
            ExprKind::Str(value) => HirExpr::new(HirExprKind::Str(value.clone()), Type::Str),
            ExprKind::Name(ident) => self.check_name(ident, frame),
            ExprKind::Path { library, member } => {
                self.error(
                    codes::NOT_CALLABLE,
                    format!(
                        "library function `{}.{}` must be called",
                        library.name, member.name
                    ),
                    expr.span,
                );
                HirExpr::error()
            }
            ExprKind::Call { callee, args } => self.check_call(callee, args, expr.span, frame),
            ExprKind::Unary { op, operand } => {
                let operand = self.check_expr(operand, frame);
                let expected = match op {
                    UnaryOp::Neg => Type::Int,
                    UnaryOp::Not => Type::Bool,
                };
                if !operand.ty.accepts(expected) {
                    let symbol = match op {
                        UnaryOp::Neg => "-",
                        UnaryOp::Not => "!",
                    };
                    self.error(
                        codes::INVALID_OPERANDS,
                        format!("operator `{symbol}` cannot be applied to `{}`", operand.ty),
                        expr.span,
                    );
                    return HirExpr::error();
                }
                HirExpr::new(
                    HirExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    expected,
                )
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.check_expr(lhs, frame);
                let rhs = self.check_expr(rhs, frame);
                let Some(ty) = binary_result(*op, lhs.ty, rhs.ty) else {
                    self.error(
                        codes::INVALID_OPERANDS,
                        format!(
                            "operator `{}` cannot be applied to `{}` and `{}`",
                            op.symbol(),
                            lhs.ty,
                            rhs.ty
                        ),
                        expr.span,
                    );
                    return HirExpr::error();
                };
                HirExpr::new(
                    HirExprKind::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    ty,
                )
            }
            ExprKind::Error => HirExpr::error(),
        }
    }

    fn check_name(&mut self, ident: &ast::Ident, frame: &mut Frame) -> HirExpr {
        if let Some(local) = frame.lookup(&ident.name) {
            let slot = frame.slot(local);
            slot.used = true;
            return HirExpr::new(HirExprKind::Local(local), slot.ty);
        }
        let message = if self.function_index.contains_key(&ident.name)
            || find_builtin(&ident.name).is_some()
        {
            format!("`{}` is a function; call it with `{}(...)`", ident.name, ident.name)
        } else {
            format!("cannot find `{}` in this scope", ident.name)
        };
        self.error(codes::UNKNOWN_NAME, message, ident.span);
        HirExpr::error()
    }

    fn check_call(
        &mut self,
        callee: &ast::Expr,
        args: &[ast::Expr],
        span: Span,
        frame: &mut Frame,
    ) -> HirExpr {
        let checked: Vec<(HirExpr, Span)> = args
            .iter()
            .map(|arg| (self.check_expr(arg, frame), arg.span))
            .collect();

        match &callee.kind {
            ExprKind::Name(ident) => {
                if let Some(local) = frame.lookup(&ident.name) {
                    let ty = frame.slot(local).ty;
                    self.error(
                        codes::NOT_CALLABLE,
                        format!("`{}` is a local of type `{ty}` and cannot be called", ident.name),
                        ident.span,
                    );
                    return HirExpr::error();
                }
                if let Some(index) = self.function_index.get(&ident.name).copied() {
                    let signature = self.signatures[index as usize].clone();
                    let args = self.check_args(&signature, checked, span);
                    return HirExpr::new(
                        HirExprKind::Call {
                            callee: Callee::Local(index),
                            args,
                        },
                        signature.result,
                    );
                }
                if let Some(builtin) = find_builtin(&ident.name) {
                    return self.check_builtin(builtin.kind, builtin.name, checked, span);
                }
                self.error(
                    codes::UNKNOWN_FUNCTION,
                    format!("cannot find function `{}`", ident.name),
                    ident.span,
                );
                HirExpr::error()
            }
            ExprKind::Path { library, member } => {
                let Some((library_index, function, signature)) =
                    self.resolve_library_function(library, member)
                else {
                    return HirExpr::error();
                };
                let args = self.check_args(&signature, checked, span);
                HirExpr::new(
                    HirExprKind::Call {
                        callee: Callee::Library {
                            library: library_index,
                            function,
                        },
                        args,
                    },
                    signature.result,
                )
            }
            ExprKind::Error => HirExpr::error(),
            _ => {
                self.error(
                    codes::NOT_CALLABLE,
                    "only functions can be called",
                    callee.span,
                );
                HirExpr::error()
            }
        }
    }

    fn resolve_library_function(
        &mut self,
        library: &ast::Ident,
        member: &ast::Ident,
    ) -> Option<(usize, u32, FunctionSignature)> {
        let found = self
            .options
            .libraries
            .iter()
            .enumerate()
            .find(|(_, candidate)| candidate.name() == library.name);

        let Some((library_index, linked)) = found else {
            if self.options.libraries_pending {
                self.error(
                    codes::LIBRARY_NOT_LOADED,
                    format!("library `{}` is not loaded yet", library.name),
                    library.span,
                );
            } else {
                self.error(
                    codes::UNKNOWN_LIBRARY,
                    format!("unknown library `{}`", library.name),
                    library.span,
                );
            }
            return None;
        };

        match linked.function(&member.name) {
            Some((function, signature)) => {
                self.libraries_used.insert(library_index);
                Some((library_index, function, signature.clone()))
            }
            None => {
                self.error(
                    codes::UNKNOWN_LIBRARY_FUNCTION,
                    format!("library `{}` has no function `{}`", library.name, member.name),
                    member.span,
                );
                None
            }
        }
    }

    fn check_args(
        &mut self,
        signature: &FunctionSignature,
        args: Vec<(HirExpr, Span)>,
        span: Span,
    ) -> Vec<HirExpr> {
        if args.len() != signature.params.len() {
            self.error(
                codes::ARGUMENT_COUNT,
                format!(
                    "`{}` takes {} argument(s) but {} were supplied",
                    signature.name,
                    signature.params.len(),
                    args.len()
                ),
                span,
            );
        }
        for ((arg, arg_span), expected) in args.iter().zip(signature.param_types()) {
            if !arg.ty.accepts(expected) {
                self.mismatch(expected, arg.ty, *arg_span);
            }
        }
        args.into_iter().map(|(arg, _)| arg).collect()
    }

    fn check_builtin(
        &mut self,
        kind: BuiltinKind,
        name: &str,
        args: Vec<(HirExpr, Span)>,
        span: Span,
    ) -> HirExpr {
        let expected_count = match kind {
            BuiltinKind::Assert => 2,
            BuiltinKind::Print | BuiltinKind::Write | BuiltinKind::Panic => 1,
        };
        if args.len() != expected_count {
            self.error(
                codes::ARGUMENT_COUNT,
                format!(
                    "`{name}` takes {expected_count} argument(s) but {} were supplied",
                    args.len()
                ),
                span,
            );
            return HirExpr::error();
        }

        let mut args = args.into_iter();
        let (first, first_span) = match args.next() {
            Some(arg) => arg,
            None => return HirExpr::error(),
        };

        match kind {
            BuiltinKind::Print | BuiltinKind::Write => {
                if first.ty.is_error() {
                    return HirExpr::error();
                }
                let Some(intrinsic) = output_intrinsic(kind, first.ty) else {
                    self.error(
                        codes::TYPE_MISMATCH,
                        format!("cannot {name} a value of type `{}`", first.ty),
                        first_span,
                    );
                    return HirExpr::error();
                };
                HirExpr::new(
                    HirExprKind::Call {
                        callee: Callee::Intrinsic(intrinsic),
                        args: vec![first],
                    },
                    Type::Unit,
                )
            }
            BuiltinKind::Panic => {
                if !first.ty.accepts(Type::Str) {
                    self.mismatch(Type::Str, first.ty, first_span);
                }
                HirExpr::new(
                    HirExprKind::Call {
                        callee: Callee::Intrinsic(Intrinsic::Panic),
                        args: vec![first],
                    },
                    Type::Unit,
                )
            }
            BuiltinKind::Assert => {
                if !first.ty.accepts(Type::Bool) {
                    self.mismatch(Type::Bool, first.ty, first_span);
                }
                let Some((message, message_span)) = args.next() else {
                    return HirExpr::error();
                };
                if !message.ty.accepts(Type::Str) {
                    self.mismatch(Type::Str, message.ty, message_span);
                }
                HirExpr::new(
                    HirExprKind::Assert {
                        cond: Box::new(first),
                        message: Box::new(message),
                    },
                    Type::Unit,
                )
            }
        }
    }
}

/// Result type of `lhs op rhs`, or `None` when the operands do not fit.
fn binary_result(op: BinaryOp, lhs: Type, rhs: Type) -> Option<Type> {
    let (operand, result) = match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            (Type::Int, Type::Int)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => (Type::Int, Type::Bool),
        BinaryOp::And | BinaryOp::Or => (Type::Bool, Type::Bool),
        BinaryOp::Eq | BinaryOp::Ne => {
            let ty = if lhs.is_error() { rhs } else { lhs };
            match ty {
                Type::Int | Type::Bool | Type::Error if rhs.accepts(ty) => {}
                _ => return None,
            }
            return Some(Type::Bool);
        }
    };
    if lhs.accepts(operand) && rhs.accepts(operand) {
        Some(result)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Severity;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn check_with(source: &str, options: &CheckOptions<'_>) -> CheckResult {
        let lexed = lex(source);
        let parsed = parse(source, &lexed);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        check_unit(&parsed.unit.expect("unit"), options)
    }

    fn check(source: &str) -> CheckResult {
        check_with(source, &CheckOptions::default())
    }

    fn codes_of(result: &CheckResult) -> Vec<&'static str> {
        result.diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn accepts_well_typed_program() {
        let result = check(
            "fn fib(n: int) -> int { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); }\n\
             let total = 0;\n\
             let i = 0;\n\
             while i < 10 { total = total + fib(i); i = i + 1; }\n\
             print(total);\n\
             assert(total > 0, \"positive\");",
        );
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert_eq!(result.signatures[0].name, "fib");
        assert_eq!(result.module.functions.len(), 1);
        assert!(result.module.main.is_some());
    }

    #[test]
    fn reports_unknown_names_and_functions() {
        let result = check("print(missing); nope(1);");
        assert_eq!(codes_of(&result), vec![codes::UNKNOWN_NAME, codes::UNKNOWN_FUNCTION]);
    }

    #[test]
    fn top_level_locals_are_not_visible_in_functions() {
        let result = check("let x = 1; print(x); fn f() -> int { return x; }");
        assert_eq!(codes_of(&result), vec![codes::UNKNOWN_NAME]);
    }

    #[test]
    fn reports_type_mismatches() {
        let result = check("let x: int = \"a\"; print(x + true); if 1 { }");
        assert_eq!(
            codes_of(&result),
            vec![codes::TYPE_MISMATCH, codes::INVALID_OPERANDS, codes::TYPE_MISMATCH]
        );
    }

    #[test]
    fn errors_do_not_cascade() {
        let result = check("let x = missing + 1; print(x * 2);");
        assert_eq!(codes_of(&result), vec![codes::UNKNOWN_NAME]);
    }

    #[test]
    fn reports_missing_return() {
        let result = check("fn f(a: int) -> int { if a > 0 { return 1; } }");
        assert_eq!(codes_of(&result), vec![codes::MISSING_RETURN]);

        let ok = check("fn f(a: int) -> int { if a > 0 { return 1; } else { return 2; } }");
        assert!(ok.diagnostics.is_empty(), "{:?}", ok.diagnostics);
    }

    #[test]
    fn reports_argument_count() {
        let result = check("fn f(a: int) {} f(1, 2); print();");
        assert_eq!(codes_of(&result), vec![codes::ARGUMENT_COUNT, codes::ARGUMENT_COUNT]);
    }

    #[test]
    fn reports_duplicates() {
        let result = check("fn f() {} fn f() {} fn print() {}");
        assert_eq!(
            codes_of(&result),
            vec![codes::DUPLICATE_DEFINITION, codes::DUPLICATE_DEFINITION]
        );
    }

    #[test]
    fn lints_have_lower_severities() {
        let result = check("fn f() { let unused = 1; return; print(1); }\n;\n1 + 2;");
        let found: Vec<_> = result
            .diagnostics
            .iter()
            .map(|d| (d.code, d.severity))
            .collect();
        assert!(found.contains(&(codes::UNUSED_LOCAL, Severity::Warning)));
        assert!(found.contains(&(codes::UNREACHABLE_CODE, Severity::Warning)));
        assert!(found.contains(&(codes::EMPTY_STATEMENT, Severity::Hidden)));
        assert!(found.contains(&(codes::DISCARDED_VALUE, Severity::Info)));
        assert!(result.diagnostics.iter().all(|d| !d.is_error()));
    }

    #[test]
    fn underscore_locals_are_not_reported_unused() {
        let result = check("let _ignored = 1;");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn resolves_library_calls() {
        let math = Arc::new(
            Library::from_source("math", "fn double(x: int) -> int { return x * 2; }")
                .expect("library"),
        );
        let libraries = [math];
        let options = CheckOptions {
            libraries: &libraries,
            ..CheckOptions::default()
        };
        let result = check_with("print(math.double(2)); math.triple(1); text.len(\"a\");", &options);
        assert_eq!(
            codes_of(&result),
            vec![codes::UNKNOWN_LIBRARY_FUNCTION, codes::UNKNOWN_LIBRARY]
        );
        assert!(result.module.libraries_used.contains(&0));
    }

    #[test]
    fn pending_libraries_are_reported_as_not_loaded() {
        let options = CheckOptions {
            libraries_pending: true,
            ..CheckOptions::default()
        };
        let result = check_with("print(math.gcd(4, 6));", &options);
        assert_eq!(codes_of(&result), vec![codes::LIBRARY_NOT_LOADED]);
        assert!(result.diagnostics[0].is_error());
    }

    #[test]
    fn records_binding_types() {
        let result = check("fn f(flag: bool) { let label = \"x\"; print(label); print(flag); }");
        let types: Vec<Type> = result.bindings.values().copied().collect();
        assert_eq!(types, vec![Type::Bool, Type::Str]);
    }

    #[test]
    fn rejects_invalid_returns() {
        let result = check("fn f() { return 1; } fn g() -> int { return; } return 2;");
        assert_eq!(
            codes_of(&result),
            vec![codes::INVALID_RETURN, codes::INVALID_RETURN, codes::INVALID_RETURN]
        );
    }
}
