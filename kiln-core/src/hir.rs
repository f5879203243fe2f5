//! Typed intermediate representation consumed by the wasm backend.
//!
//! All names are resolved: locals are indices into the owning
//! function's local table and calls carry their target.

use std::collections::BTreeSet;

use crate::ast::{BinaryOp, UnaryOp};
use crate::builtins::Intrinsic;
use crate::types::Type;

/// Index into [`HirFunction::locals`]. Parameters come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HirModule {
    /// Declared functions in source order.
    pub functions: Vec<HirFunction>,
    /// Top-level statements, absent for libraries.
    pub main: Option<HirFunction>,
    /// Indices of linked libraries this module calls into.
    pub libraries_used: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirFunction {
    pub name: String,
    pub param_count: u32,
    pub locals: Vec<Type>,
    pub result: Type,
    pub body: Vec<HirStmt>,
}

impl HirFunction {
    pub fn params(&self) -> &[Type] {
        &self.locals[..self.param_count as usize]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirStmt {
    Set {
        local: LocalId,
        value: HirExpr,
    },
    If {
        cond: HirExpr,
        then_body: Vec<HirStmt>,
        else_body: Vec<HirStmt>,
    },
    While {
        cond: HirExpr,
        body: Vec<HirStmt>,
    },
    Return(Option<HirExpr>),
    Expr(HirExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirExpr {
    pub kind: HirExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirExprKind {
    Int(i32),
    Bool(bool),
    Str(String),
    Local(LocalId),
    Call {
        callee: Callee,
        args: Vec<HirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<HirExpr>,
        rhs: Box<HirExpr>,
    },
    /// Panics with `message` unless `cond` holds.
    Assert {
        cond: Box<HirExpr>,
        message: Box<HirExpr>,
    },
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    /// Function of the same module, by index into `functions`.
    Local(u32),
    /// Function of a linked library.
    Library { library: usize, function: u32 },
    Intrinsic(Intrinsic),
}

impl HirExpr {
    pub fn new(kind: HirExprKind, ty: Type) -> Self {
        HirExpr { kind, ty }
    }

    pub fn error() -> Self {
        HirExpr::new(HirExprKind::Error, Type::Error)
    }
}
