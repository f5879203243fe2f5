use thiserror::Error;

use crate::diagnostic::Diagnostic;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("code generation failed: {0}")]
    Codegen(String),
    #[error("string data of {0} bytes does not fit in linear memory")]
    DataTooLarge(usize),
}

/// Why a library blob was rejected during validation.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library name '{0}' is not a valid identifier")]
    InvalidName(String),
    #[error("library '{name}' is not valid UTF-8")]
    NotUtf8 { name: String },
    #[error("library '{name}' failed validation: {}", first_message(.diagnostics))]
    Invalid {
        name: String,
        diagnostics: Vec<Diagnostic>,
    },
}

fn first_message(diagnostics: &[Diagnostic]) -> String {
    match diagnostics.first() {
        Some(first) if diagnostics.len() > 1 => {
            format!("{first} (and {} more)", diagnostics.len() - 1)
        }
        Some(first) => first.to_string(),
        None => "no diagnostics".to_string(),
    }
}
