//! Value types and function signatures of the Kiln language.

use core::fmt;

/// Types of values and expressions.
///
/// Every non-unit type is represented as a single wasm `i32`:
/// `int` directly, `bool` as 0/1 and `str` as a pointer to a
/// length-prefixed byte string in linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
    Str,
    Unit,
    /// Type of an expression that already produced a diagnostic.
    /// Compatible with everything so errors do not cascade.
    Error,
}

/// Type names accepted in annotations, in completion order.
pub const TYPE_NAMES: &[&str] = &["bool", "int", "str", "unit"];

impl Type {
    pub fn from_name(name: &str) -> Option<Type> {
        match name {
            "int" => Some(Type::Int),
            "bool" => Some(Type::Bool),
            "str" => Some(Type::Str),
            "unit" => Some(Type::Unit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Type::Int => "int",
            Type::Bool => "bool",
            Type::Str => "str",
            Type::Unit => "unit",
            Type::Error => "{error}",
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Unit)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Whether a value of type `self` may be used where `expected` is required.
    pub fn accepts(&self, expected: Type) -> bool {
        self.is_error() || expected.is_error() || *self == expected
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Callable signature of a user or library function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub result: Type,
    pub docs: Option<String>,
}

impl FunctionSignature {
    pub fn param_types(&self) -> impl Iterator<Item = Type> + '_ {
        self.params.iter().map(|(_, ty)| *ty)
    }
}

impl fmt::Display for FunctionSignature {
    /// Renders as `fn name(a: int, b: int) -> int`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (index, (name, ty)) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {ty}")?;
        }
        f.write_str(")")?;
        if !self.result.is_unit() {
            write!(f, " -> {}", self.result)?;
        }
        Ok(())
    }
}
