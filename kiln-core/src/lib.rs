//! Compiler platform for the Kiln playground.
//!
//! The pipeline is roughly:
//!
//!   source text
//!     -> lexer      (tokens, comments)
//!     -> parser     (syntax tree, recovering per statement)
//!     -> typecheck  (names, types, lints, HIR)
//!     -> codegen_wasm (wasm-encoder)
//!
//! [`Compilation`] runs the pipeline once for a snapshot of source
//! text and serves diagnostics, completion and emission from it.
//! Hosts (the playground service, the CLI) should depend on this
//! crate rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod diagnostic;
pub mod error;
pub mod span;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod ast;
pub mod lexer;
pub mod parser;

// ---------------------------------------------------------------------
// Semantic layers: types, type checking, HIR
// ---------------------------------------------------------------------

pub mod hir;
pub mod typecheck;
pub mod types;

// ---------------------------------------------------------------------
// Built-ins and libraries
// ---------------------------------------------------------------------

pub mod builtins;
pub mod library;

// ---------------------------------------------------------------------
// Back-end, orchestration and editor services
// ---------------------------------------------------------------------

pub mod codegen_wasm;
pub mod compiler;
pub mod completion;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{Artifact, CompileOptions, Compilation, UnitOptions};
pub use completion::{CompletionItem, CompletionTag, CompletionTrigger};
pub use diagnostic::{Diagnostic, Severity};
pub use error::{CoreError, LibraryError};
pub use library::Library;
pub use span::Span;
