//! JSON shapes exchanged with the host.
//!
//! Field names are camelCase and offsets are byte offsets into the
//! session's current text.

use kiln_core::{CompletionItem, Diagnostic, Span, UnitOptions};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::session::RunResult;

/// Options accepted when a session is created. Missing fields keep
/// their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct WireSessionOptions {
    pub lints: bool,
    pub warnings_as_errors: bool,
}

impl Default for WireSessionOptions {
    fn default() -> Self {
        let options = UnitOptions::default();
        WireSessionOptions {
            lints: options.lints,
            warnings_as_errors: options.warnings_as_errors,
        }
    }
}

impl From<WireSessionOptions> for UnitOptions {
    fn from(options: WireSessionOptions) -> Self {
        UnitOptions {
            lints: options.lints,
            warnings_as_errors: options.warnings_as_errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSpan {
    pub start: u32,
    pub end: u32,
    pub length: u32,
    pub is_empty: bool,
}

impl From<Span> for WireSpan {
    fn from(span: Span) -> Self {
        WireSpan {
            start: span.start,
            end: span.end,
            length: span.len(),
            is_empty: span.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireDiagnostic {
    pub id: String,
    pub message: String,
    pub location: WireSpan,
    pub severity: &'static str,
}

impl From<&Diagnostic> for WireDiagnostic {
    fn from(diagnostic: &Diagnostic) -> Self {
        WireDiagnostic {
            id: diagnostic.code.to_string(),
            message: diagnostic.message.clone(),
            location: diagnostic.span.into(),
            severity: diagnostic.severity.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCompletionItem {
    pub display_text: String,
    pub filter_text: String,
    pub sort_text: String,
    pub inline_description: String,
    pub tags: Vec<&'static str>,
    pub span: WireSpan,
}

impl From<&CompletionItem> for WireCompletionItem {
    fn from(item: &CompletionItem) -> Self {
        WireCompletionItem {
            display_text: item.display_text.clone(),
            filter_text: item.filter_text.clone(),
            sort_text: item.sort_text.clone(),
            inline_description: item.inline_description.clone(),
            tags: item.tags.iter().map(|tag| tag.as_str()).collect(),
            span: item.span.into(),
        }
    }
}

pub fn diagnostics(diagnostics: &[Diagnostic]) -> Vec<WireDiagnostic> {
    diagnostics.iter().map(WireDiagnostic::from).collect()
}

pub fn completions(items: &[CompletionItem]) -> Vec<WireCompletionItem> {
    items.iter().map(WireCompletionItem::from).collect()
}

/// `{success: true, stdOut, stdErr}` or `{success: false, diagnostics}`.
impl Serialize for RunResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RunResult::Success { std_out, std_err } => {
                let mut state = serializer.serialize_struct("RunResult", 3)?;
                state.serialize_field("success", &true)?;
                state.serialize_field("stdOut", std_out)?;
                state.serialize_field("stdErr", std_err)?;
                state.end()
            }
            RunResult::Failure { diagnostics: failed } => {
                let mut state = serializer.serialize_struct("RunResult", 2)?;
                state.serialize_field("success", &false)?;
                state.serialize_field("diagnostics", &diagnostics(failed))?;
                state.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use kiln_core::CompletionTag;
    use kiln_core::diagnostic::codes;
    use serde_json::json;

    use super::*;

    #[test]
    fn diagnostic_shape() {
        let diagnostic = Diagnostic::warning(codes::UNUSED_LOCAL, "unused local 'x'", Span::new(4, 5));
        assert_eq!(
            serde_json::to_value(WireDiagnostic::from(&diagnostic)).unwrap(),
            json!({
                "id": "KL0400",
                "message": "unused local 'x'",
                "location": {"start": 4, "end": 5, "length": 1, "isEmpty": false},
                "severity": "Warning",
            })
        );
    }

    #[test]
    fn completion_shape() {
        let item = CompletionItem {
            display_text: "gcd".to_string(),
            filter_text: "gcd".to_string(),
            sort_text: "1_gcd".to_string(),
            inline_description: "fn gcd(a: int, b: int) -> int".to_string(),
            tags: vec![CompletionTag::Function],
            span: Span::empty(7),
        };
        assert_eq!(
            serde_json::to_value(WireCompletionItem::from(&item)).unwrap(),
            json!({
                "displayText": "gcd",
                "filterText": "gcd",
                "sortText": "1_gcd",
                "inlineDescription": "fn gcd(a: int, b: int) -> int",
                "tags": ["Function"],
                "span": {"start": 7, "end": 7, "length": 0, "isEmpty": true},
            })
        );
    }

    #[test]
    fn run_result_shapes() {
        let success = RunResult::Success {
            std_out: "hi\n".to_string(),
            std_err: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({"success": true, "stdOut": "hi\n", "stdErr": ""})
        );

        let failure = RunResult::Failure {
            diagnostics: vec![Diagnostic::error(codes::UNEXPECTED_TOKEN, "expected ';'", Span::new(0, 2))],
        };
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["diagnostics"][0]["severity"], json!("Error"));
        assert!(value.get("stdOut").is_none());
        assert!(value.get("stdErr").is_none());
    }
}
