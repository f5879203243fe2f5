//! Precompiled libraries linked into user programs.
//!
//! A library is a Kiln unit containing only function declarations.
//! It is validated once when loaded; afterwards it is immutable and
//! shared between every compilation that references it.

use log::debug;

use crate::diagnostic::{Diagnostic, sort_diagnostics};
use crate::error::LibraryError;
use crate::hir::HirModule;
use crate::lexer::{KEYWORDS, is_ident_continue, is_ident_start, lex};
use crate::parser::parse;
use crate::typecheck::{CheckOptions, check_unit};
use crate::types::FunctionSignature;

#[derive(Debug)]
pub struct Library {
    name: String,
    source: String,
    signatures: Vec<FunctionSignature>,
    module: HirModule,
}

impl Library {
    /// Validates a library blob fetched from storage.
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Library, LibraryError> {
        let source = core::str::from_utf8(bytes).map_err(|_| LibraryError::NotUtf8 {
            name: name.to_string(),
        })?;
        Library::from_source(name, source)
    }

    pub fn from_source(name: &str, source: &str) -> Result<Library, LibraryError> {
        if !is_valid_name(name) {
            return Err(LibraryError::InvalidName(name.to_string()));
        }

        let lexed = lex(source);
        let parsed = parse(source, &lexed);
        let mut errors: Vec<Diagnostic> = lexed
            .diagnostics
            .iter()
            .chain(&parsed.diagnostics)
            .filter(|d| d.is_error())
            .cloned()
            .collect();

        let Some(unit) = parsed.unit else {
            sort_diagnostics(&mut errors);
            return Err(LibraryError::Invalid {
                name: name.to_string(),
                diagnostics: errors,
            });
        };

        let options = CheckOptions {
            library_mode: true,
            ..CheckOptions::default()
        };
        let checked = check_unit(&unit, &options);
        errors.extend(checked.diagnostics.into_iter().filter(Diagnostic::is_error));
        if !errors.is_empty() {
            sort_diagnostics(&mut errors);
            return Err(LibraryError::Invalid {
                name: name.to_string(),
                diagnostics: errors,
            });
        }

        debug!(
            "validated library '{}' with {} functions",
            name,
            checked.signatures.len()
        );
        Ok(Library {
            name: name.to_string(),
            source: source.to_string(),
            signatures: checked.signatures,
            module: checked.module,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn functions(&self) -> &[FunctionSignature] {
        &self.signatures
    }

    pub fn function(&self, name: &str) -> Option<(u32, &FunctionSignature)> {
        self.signatures
            .iter()
            .enumerate()
            .find(|(_, sig)| sig.name == name)
            .map(|(index, sig)| (index as u32, sig))
    }

    pub fn module(&self) -> &HirModule {
        &self.module
    }
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes.first() {
        Some(first) if is_ident_start(*first) => {}
        _ => return false,
    }
    bytes.iter().all(|b| is_ident_continue(*b)) && !KEYWORDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn loads_function_only_library() {
        let library = Library::from_source(
            "math",
            "/// Larger of two ints.\nfn max(a: int, b: int) -> int { if a > b { return a; } return b; }",
        )
        .expect("valid library");
        let (index, sig) = library.function("max").expect("max");
        assert_eq!(index, 0);
        assert_eq!(sig.result, Type::Int);
        assert_eq!(sig.docs.as_deref(), Some("Larger of two ints."));
        assert!(library.function("min").is_none());
    }

    #[test]
    fn rejects_top_level_statements() {
        let err = Library::from_source("bad", "print(1);").unwrap_err();
        assert!(matches!(err, LibraryError::Invalid { .. }));
    }

    #[test]
    fn rejects_invalid_utf8_and_names() {
        assert!(matches!(
            Library::from_bytes("bin", &[0xff, 0xfe]),
            Err(LibraryError::NotUtf8 { .. })
        ));
        assert!(matches!(
            Library::from_source("while", "fn f() {}"),
            Err(LibraryError::InvalidName(_))
        ));
        assert!(matches!(
            Library::from_source("my-lib", "fn f() {}"),
            Err(LibraryError::InvalidName(_))
        ));
    }

    #[test]
    fn rejects_type_errors() {
        let err = Library::from_source("oops", "fn f() -> int { return true; }").unwrap_err();
        let LibraryError::Invalid { diagnostics, .. } = err else {
            panic!("expected validation failure");
        };
        assert!(!diagnostics.is_empty());
    }

    #[test]
    fn bundled_libraries_validate() {
        let math = Library::from_source("math", include_str!("../../libraries/math.kiln")).unwrap();
        for name in ["gcd", "lcm", "pow", "abs", "min", "max", "factorial"] {
            assert!(math.function(name).is_some(), "math.{name} missing");
        }
        let fmt = Library::from_source("fmt", include_str!("../../libraries/fmt.kiln")).unwrap();
        assert_eq!(fmt.functions().len(), 4);
    }
}
