//! One compiled view of a source unit.
//!
//! A [`Compilation`] is built eagerly from source text and a set of
//! libraries and is immutable afterwards. Diagnostics, completion
//! and emission all read from the same snapshot.

use std::sync::Arc;

use log::{debug, trace};

use crate::ast::SourceUnit;
use crate::codegen_wasm::generate_wasm;
use crate::diagnostic::{Diagnostic, Severity, codes, has_errors, sort_diagnostics};
use crate::lexer::{LexResult, Token, lex};
use crate::library::Library;
use crate::parser::parse;
use crate::span::Span;
use crate::typecheck::{CheckOptions, CheckResult, check_unit};
use crate::types::{FunctionSignature, Type};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Library resolution is still running, so a missing library may
    /// only be missing for now.
    pub libraries_pending: bool,
    pub unit: UnitOptions,
}

/// Per-unit choices made by whoever owns the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOptions {
    /// Report the style lints (unused, unreachable, empty, discarded).
    pub lints: bool,
    /// Report warnings as errors. Such a unit does not emit.
    pub warnings_as_errors: bool,
}

impl Default for UnitOptions {
    fn default() -> Self {
        UnitOptions {
            lints: true,
            warnings_as_errors: false,
        }
    }
}

impl UnitOptions {
    fn apply(&self, diagnostics: &mut Vec<Diagnostic>) {
        if !self.lints {
            diagnostics.retain(|d| !codes::is_lint(d.code));
        }
        if self.warnings_as_errors {
            for diagnostic in diagnostics.iter_mut() {
                if diagnostic.severity == Severity::Warning {
                    diagnostic.severity = Severity::Error;
                }
            }
        }
    }
}

/// A validated wasm module ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    wasm: Vec<u8>,
}

impl Artifact {
    pub fn wasm(&self) -> &[u8] {
        &self.wasm
    }
}

#[derive(Debug)]
pub struct Compilation {
    source: Arc<str>,
    lexed: LexResult,
    unit: Option<SourceUnit>,
    checked: Option<CheckResult>,
    libraries: Vec<Arc<Library>>,
    diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    pub fn new(
        source: impl Into<Arc<str>>,
        libraries: &[Arc<Library>],
        options: CompileOptions,
    ) -> Compilation {
        let source = source.into();
        let lexed = lex(&source);
        let parsed = parse(&source, &lexed);

        let mut diagnostics = lexed.diagnostics.clone();
        diagnostics.extend(parsed.diagnostics);

        let checked = parsed.unit.as_ref().map(|unit| {
            let check_options = CheckOptions {
                libraries,
                libraries_pending: options.libraries_pending,
                library_mode: false,
            };
            check_unit(unit, &check_options)
        });
        if let Some(checked) = &checked {
            diagnostics.extend(checked.diagnostics.iter().cloned());
        }
        options.unit.apply(&mut diagnostics);
        sort_diagnostics(&mut diagnostics);

        trace!(
            "compiled {} bytes against {} libraries: {} diagnostics",
            source.len(),
            libraries.len(),
            diagnostics.len()
        );

        Compilation {
            source,
            lexed,
            unit: parsed.unit,
            checked,
            libraries: libraries.to_vec(),
            diagnostics,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every diagnostic of the unit, sorted by position.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    /// The syntax tree, or `None` when parsing was abandoned.
    pub fn syntax(&self) -> Option<&SourceUnit> {
        self.unit.as_ref()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.lexed.tokens
    }

    /// Diagnostics reported by the lexer alone, unaffected by
    /// [`UnitOptions`].
    pub fn lex_diagnostics(&self) -> &[Diagnostic] {
        &self.lexed.diagnostics
    }

    pub fn comments(&self) -> &[Span] {
        &self.lexed.comments
    }

    pub fn libraries(&self) -> &[Arc<Library>] {
        &self.libraries
    }

    pub fn library(&self, name: &str) -> Option<&Arc<Library>> {
        self.libraries.iter().find(|library| library.name() == name)
    }

    /// Signatures of the functions declared in the unit.
    pub fn functions(&self) -> &[FunctionSignature] {
        self.checked
            .as_ref()
            .map(|checked| checked.signatures.as_slice())
            .unwrap_or_default()
    }

    /// Type of the local or parameter declared at `span`.
    pub fn binding_type(&self, span: Span) -> Option<Type> {
        self.checked
            .as_ref()
            .and_then(|checked| checked.bindings.get(&span).copied())
    }

    /// Emits the unit as a wasm module. Fails with the unit's error
    /// diagnostics, or with a single emission diagnostic when the
    /// backend rejects a checked program.
    pub fn emit(&self) -> Result<Artifact, Vec<Diagnostic>> {
        let errors: Vec<Diagnostic> = self
            .diagnostics
            .iter()
            .filter(|d| d.is_error())
            .cloned()
            .collect();
        if !errors.is_empty() {
            return Err(errors);
        }

        let Some(checked) = &self.checked else {
            return Err(vec![Diagnostic::error(
                codes::EMIT_FAILURE,
                "the unit could not be parsed",
                Span::empty(0),
            )]);
        };

        match generate_wasm(&checked.module, &self.libraries) {
            Ok(wasm) => {
                debug!("emitted {} bytes of wasm", wasm.len());
                Ok(Artifact { wasm })
            }
            Err(err) => Err(vec![Diagnostic::error(
                codes::EMIT_FAILURE,
                err.to_string(),
                Span::new(0, self.source.len() as u32),
            )]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_unit_emits() {
        let compilation = Compilation::new("print(\"hi\");", &[], CompileOptions::default());
        assert!(compilation.diagnostics().is_empty());
        let artifact = compilation.emit().expect("artifact");
        assert!(artifact.wasm().starts_with(b"\0asm"));
    }

    #[test]
    fn diagnostics_are_sorted_and_emission_fails() {
        let compilation = Compilation::new(
            "let a = missing;\nprint(1 + true);",
            &[],
            CompileOptions::default(),
        );
        let starts: Vec<u32> = compilation
            .diagnostics()
            .iter()
            .map(|d| d.span.start)
            .collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);

        let errors = compilation.emit().unwrap_err();
        assert!(errors.iter().all(|d| d.severity == Severity::Error));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn aborted_parse_has_no_syntax() {
        let source = format!("print({}1{});", "(".repeat(300), ")".repeat(300));
        let compilation = Compilation::new(source, &[], CompileOptions::default());
        assert!(compilation.syntax().is_none());
        assert!(compilation.has_errors());
        assert!(compilation.emit().is_err());
    }

    #[test]
    fn warnings_do_not_block_emission() {
        let compilation = Compilation::new("let unused = 1;", &[], CompileOptions::default());
        assert_eq!(compilation.diagnostics().len(), 1);
        assert!(!compilation.has_errors());
        assert!(compilation.emit().is_ok());
    }

    #[test]
    fn lints_can_be_turned_off() {
        let options = CompileOptions {
            unit: UnitOptions {
                lints: false,
                ..UnitOptions::default()
            },
            ..CompileOptions::default()
        };
        let compilation = Compilation::new("let unused = 1;", &[], options);
        assert!(compilation.diagnostics().is_empty());

        let compilation = Compilation::new("let a = missing;", &[], options);
        assert_eq!(compilation.diagnostics().len(), 1);
        assert!(compilation.has_errors());
    }

    #[test]
    fn warnings_as_errors_block_emission() {
        let options = CompileOptions {
            unit: UnitOptions {
                warnings_as_errors: true,
                ..UnitOptions::default()
            },
            ..CompileOptions::default()
        };
        let compilation = Compilation::new("let unused = 1;", &[], options);
        assert!(compilation.has_errors());
        let errors = compilation.emit().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, codes::UNUSED_LOCAL);
    }

    #[test]
    fn exposes_declared_functions() {
        let compilation = Compilation::new(
            "fn twice(x: int) -> int { return x * 2; }",
            &[],
            CompileOptions::default(),
        );
        assert_eq!(compilation.functions().len(), 1);
        assert_eq!(compilation.functions()[0].to_string(), "fn twice(x: int) -> int");
    }
}
