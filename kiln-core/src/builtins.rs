//! Host intrinsics and the built-in functions that lower to them.
//!
//! Every emitted module imports all intrinsics from the `env` module
//! in the order of [`INTRINSICS`], so an intrinsic's import index is
//! its position in that table. Built-ins are the names visible in
//! source; `print` and `write` dispatch on their argument type.

use crate::types::Type;

pub const HOST_MODULE: &str = "env";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    PrintInt,
    PrintBool,
    PrintStr,
    WriteInt,
    WriteBool,
    WriteStr,
    Panic,
}

pub const INTRINSICS: &[Intrinsic] = &[
    Intrinsic::PrintInt,
    Intrinsic::PrintBool,
    Intrinsic::PrintStr,
    Intrinsic::WriteInt,
    Intrinsic::WriteBool,
    Intrinsic::WriteStr,
    Intrinsic::Panic,
];

impl Intrinsic {
    /// Import field name under [`HOST_MODULE`].
    pub fn import_name(&self) -> &'static str {
        match self {
            Intrinsic::PrintInt => "print_int",
            Intrinsic::PrintBool => "print_bool",
            Intrinsic::PrintStr => "print_str",
            Intrinsic::WriteInt => "write_int",
            Intrinsic::WriteBool => "write_bool",
            Intrinsic::WriteStr => "write_str",
            Intrinsic::Panic => "panic",
        }
    }

    pub fn import_index(&self) -> u32 {
        INTRINSICS
            .iter()
            .position(|candidate| candidate == self)
            .unwrap_or_default() as u32
    }

    pub fn param(&self) -> Type {
        match self {
            Intrinsic::PrintInt | Intrinsic::WriteInt => Type::Int,
            Intrinsic::PrintBool | Intrinsic::WriteBool => Type::Bool,
            Intrinsic::PrintStr | Intrinsic::WriteStr | Intrinsic::Panic => Type::Str,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// Writes the value followed by a newline.
    Print,
    /// Writes the value without a trailing newline.
    Write,
    /// Aborts the program with a message.
    Panic,
    /// Panics with the message when the condition is false.
    Assert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    pub name: &'static str,
    /// Signature shown by completion.
    pub signature: &'static str,
    pub kind: BuiltinKind,
}

pub const BUILTINS: &[BuiltinDescriptor] = &[
    BuiltinDescriptor {
        name: "assert",
        signature: "fn assert(condition: bool, message: str)",
        kind: BuiltinKind::Assert,
    },
    BuiltinDescriptor {
        name: "panic",
        signature: "fn panic(message: str)",
        kind: BuiltinKind::Panic,
    },
    BuiltinDescriptor {
        name: "print",
        signature: "fn print(value: int | bool | str)",
        kind: BuiltinKind::Print,
    },
    BuiltinDescriptor {
        name: "write",
        signature: "fn write(value: int | bool | str)",
        kind: BuiltinKind::Write,
    },
];

pub fn find_builtin(name: &str) -> Option<&'static BuiltinDescriptor> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// Picks the intrinsic a `print`/`write` call lowers to for `ty`.
pub fn output_intrinsic(kind: BuiltinKind, ty: Type) -> Option<Intrinsic> {
    let intrinsic = match (kind, ty) {
        (BuiltinKind::Print, Type::Int) => Intrinsic::PrintInt,
        (BuiltinKind::Print, Type::Bool) => Intrinsic::PrintBool,
        (BuiltinKind::Print, Type::Str) => Intrinsic::PrintStr,
        (BuiltinKind::Write, Type::Int) => Intrinsic::WriteInt,
        (BuiltinKind::Write, Type::Bool) => Intrinsic::WriteBool,
        (BuiltinKind::Write, Type::Str) => Intrinsic::WriteStr,
        _ => return None,
    };
    Some(intrinsic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_indices_follow_table_order() {
        for (index, intrinsic) in INTRINSICS.iter().enumerate() {
            assert_eq!(intrinsic.import_index(), index as u32);
        }
    }

    #[test]
    fn output_dispatches_on_type() {
        assert_eq!(
            output_intrinsic(BuiltinKind::Print, Type::Str),
            Some(Intrinsic::PrintStr)
        );
        assert_eq!(
            output_intrinsic(BuiltinKind::Write, Type::Bool),
            Some(Intrinsic::WriteBool)
        );
        assert_eq!(output_intrinsic(BuiltinKind::Print, Type::Unit), None);
        assert_eq!(output_intrinsic(BuiltinKind::Panic, Type::Str), None);
    }
}
