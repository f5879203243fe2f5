//! The boundary exposed to the host.
//!
//! [`InteropBridge`] takes plain arguments, checks the argument
//! contract and returns results serialized to the JSON shapes in
//! [`crate::wire`]. [`Request`] is the same surface as a message, for
//! hosts that speak JSON end to end.

use std::sync::Arc;

use kiln_core::CompletionTrigger;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PlaygroundError, Result};
use crate::playground::Playground;
use crate::resolver::{Manifest, ResolutionReport};
use crate::session::RunResult;
use crate::wire::{self, WireCompletionItem, WireDiagnostic, WireSessionOptions};

/// Edit kinds accepted by `ShouldTriggerCompletions`.
pub mod edit_kind {
    pub const NONE: i32 = 0;
    pub const INSERTED: i32 = 1;
    pub const DELETED: i32 = 2;
}

/// A startup manifest given either as JSON text or inline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ManifestArg {
    Text(String),
    Inline(Manifest),
}

impl ManifestArg {
    fn into_manifest(self) -> Result<Manifest> {
        match self {
            ManifestArg::Text(json) => Manifest::from_json(&json),
            ManifestArg::Inline(manifest) => Ok(manifest),
        }
    }
}

/// `{"method": "<Operation>", "params": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", content = "params", rename_all_fields = "camelCase")]
pub enum Request {
    Init {
        base_location: String,
        manifest: ManifestArg,
    },
    CreateSession {
        source: String,
        #[serde(default)]
        options: Option<WireSessionOptions>,
    },
    Recompile {
        session_id: String,
        source: String,
    },
    GetDiagnostics {
        session_id: String,
    },
    GetCompletions {
        session_id: String,
        caret: u32,
        filter: Option<String>,
    },
    ShouldTriggerCompletions {
        session_id: String,
        caret: u32,
        #[serde(rename = "char")]
        character: Option<String>,
        edit_kind: Option<i32>,
    },
    Run {
        session_id: String,
    },
    CloseSession {
        session_id: String,
    },
}

impl Request {
    pub fn from_json(json: &str) -> Result<Request> {
        serde_json::from_str(json).map_err(|err| PlaygroundError::ArgumentContract(err.to_string()))
    }
}

#[derive(Clone)]
pub struct InteropBridge {
    playground: Arc<Playground>,
}

impl InteropBridge {
    pub fn new(playground: Arc<Playground>) -> Self {
        InteropBridge { playground }
    }

    pub fn playground(&self) -> &Arc<Playground> {
        &self.playground
    }

    pub async fn init(&self, base_location: &str, manifest_json: &str) -> Result<ResolutionReport> {
        let manifest = Manifest::from_json(manifest_json)?;
        self.playground.init(base_location, &manifest).await
    }

    pub fn create_session(&self, source: &str) -> String {
        self.playground.registry().create_session(source)
    }

    /// Like [`create_session`](Self::create_session), with options given
    /// as a JSON `SessionOptions` object.
    pub fn create_session_with_options(&self, source: &str, options_json: &str) -> Result<String> {
        let options: WireSessionOptions = serde_json::from_str(options_json)
            .map_err(|err| PlaygroundError::ArgumentContract(err.to_string()))?;
        Ok(self
            .playground
            .registry()
            .create_session_with(source, options.into()))
    }

    pub fn recompile(&self, session_id: &str, source: &str) -> Result<()> {
        self.playground.registry().recompile(session_id, source)
    }

    /// JSON `Diagnostic[]`.
    pub async fn get_diagnostics(&self, session_id: &str) -> Result<String> {
        to_json(&self.diagnostics(session_id).await?)
    }

    /// JSON `CompletionItem[]`.
    pub async fn get_completions(
        &self,
        session_id: &str,
        caret: u32,
        filter: Option<&str>,
    ) -> Result<String> {
        to_json(&self.completions(session_id, caret, filter).await?)
    }

    /// `character` and `edit_kind` come together or not at all.
    pub async fn should_trigger_completions(
        &self,
        session_id: &str,
        caret: u32,
        character: Option<&str>,
        edit_kind: Option<i32>,
    ) -> Result<bool> {
        let edit = match (character, edit_kind) {
            (Some(character), Some(kind)) => Some((single_char(character)?, kind)),
            (None, None) => None,
            _ => {
                return Err(PlaygroundError::ArgumentContract(
                    "char and edit kind must be given together".to_string(),
                ));
            }
        };
        let registry = self.playground.registry();
        let trigger = match edit {
            None => None,
            Some((_, edit_kind::NONE)) => Some(CompletionTrigger::Invoke),
            Some((ch, edit_kind::INSERTED)) => Some(CompletionTrigger::Insertion(ch)),
            Some((ch, edit_kind::DELETED)) => Some(CompletionTrigger::Deletion(ch)),
            Some((_, kind)) => {
                registry.session(session_id)?;
                warn!("unrecognized edit kind {}; triggering completions", kind);
                return Ok(true);
            }
        };
        registry
            .should_trigger_completions(session_id, caret, trigger)
            .await
    }

    /// JSON `RunResult`.
    pub async fn run(&self, session_id: &str) -> Result<String> {
        to_json(&self.run_result(session_id).await?)
    }

    pub fn close_session(&self, session_id: &str) -> Result<()> {
        self.playground.registry().close_session(session_id)
    }

    /// Handles one request. Operations without a result answer `null`.
    pub async fn dispatch(&self, request: Request) -> Result<Value> {
        match request {
            Request::Init {
                base_location,
                manifest,
            } => {
                let manifest = manifest.into_manifest()?;
                self.playground.init(&base_location, &manifest).await?;
                Ok(Value::Null)
            }
            Request::CreateSession { source, options } => {
                let options = options.unwrap_or_default().into();
                let id = self.playground.registry().create_session_with(source, options);
                Ok(Value::String(id))
            }
            Request::Recompile { session_id, source } => {
                self.recompile(&session_id, &source)?;
                Ok(Value::Null)
            }
            Request::GetDiagnostics { session_id } => to_value(&self.diagnostics(&session_id).await?),
            Request::GetCompletions {
                session_id,
                caret,
                filter,
            } => to_value(&self.completions(&session_id, caret, filter.as_deref()).await?),
            Request::ShouldTriggerCompletions {
                session_id,
                caret,
                character,
                edit_kind,
            } => {
                let trigger = self
                    .should_trigger_completions(&session_id, caret, character.as_deref(), edit_kind)
                    .await?;
                Ok(Value::Bool(trigger))
            }
            Request::Run { session_id } => to_value(&self.run_result(&session_id).await?),
            Request::CloseSession { session_id } => {
                self.close_session(&session_id)?;
                Ok(Value::Null)
            }
        }
    }

    async fn diagnostics(&self, session_id: &str) -> Result<Vec<WireDiagnostic>> {
        let diagnostics = self.playground.registry().get_diagnostics(session_id).await?;
        Ok(wire::diagnostics(&diagnostics))
    }

    async fn completions(
        &self,
        session_id: &str,
        caret: u32,
        filter: Option<&str>,
    ) -> Result<Vec<WireCompletionItem>> {
        let items = self
            .playground
            .registry()
            .get_completions(session_id, caret, filter)
            .await?;
        Ok(wire::completions(&items))
    }

    async fn run_result(&self, session_id: &str) -> Result<RunResult> {
        self.playground.registry().run(session_id).await
    }
}

fn single_char(text: &str) -> Result<char> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(ch),
        _ => Err(PlaygroundError::ArgumentContract(format!(
            "expected exactly one character, got {text:?}"
        ))),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|err| PlaygroundError::Internal(err.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| PlaygroundError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::resolver::StaticFetcher;
    use crate::sandbox::WasmiSandbox;

    fn bridge() -> InteropBridge {
        let fetcher = StaticFetcher::new().with(
            "memory://libs/math.kiln",
            "fn square(x: int) -> int { return x * x; }",
        );
        InteropBridge::new(Arc::new(Playground::new(
            Arc::new(fetcher),
            Arc::new(WasmiSandbox::default()),
        )))
    }

    fn parse(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn run_on_bad_code_reports_diagnostics_only() {
        let bridge = bridge();
        let id = bridge.create_session("this is not valid code");
        let result = parse(&bridge.run(&id).await.unwrap());
        assert_eq!(result["success"], json!(false));
        let diagnostics = result["diagnostics"].as_array().unwrap();
        assert!(diagnostics.iter().any(|d| d["severity"] == json!("Error")));
        assert!(result.get("stdOut").is_none());
        assert!(result.get("stdErr").is_none());
    }

    #[tokio::test]
    async fn run_on_good_code() {
        let bridge = bridge();
        let id = bridge.create_session("print(\"hi\");");
        assert_eq!(
            parse(&bridge.run(&id).await.unwrap()),
            json!({"success": true, "stdOut": "hi\n", "stdErr": ""})
        );
    }

    #[tokio::test]
    async fn run_keeps_partial_output() {
        let bridge = bridge();
        let id = bridge.create_session("write(\"before\"); panic(\"boom\");");
        let result = parse(&bridge.run(&id).await.unwrap());
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["stdOut"], json!("before"));
        assert_ne!(result["stdErr"], json!(""));
    }

    #[tokio::test]
    async fn completions_are_narrowed_by_the_filter() {
        let bridge = bridge();
        let id = bridge.create_session("fn Foo() {} fn Foobar() {} fn Bar() {}\n");
        let items = parse(&bridge.get_completions(&id, 39, Some("Foo")).await.unwrap());
        let names: Vec<&str> = items
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["displayText"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["Foobar"]);
    }

    #[tokio::test]
    async fn trigger_arguments_come_in_pairs() {
        let bridge = bridge();
        let id = bridge.create_session("let x = 1;");
        assert!(bridge.should_trigger_completions(&id, 0, None, None).await.unwrap());
        assert!(matches!(
            bridge.should_trigger_completions(&id, 0, Some("a"), None).await,
            Err(PlaygroundError::ArgumentContract(_))
        ));
        assert!(matches!(
            bridge.should_trigger_completions(&id, 0, None, Some(edit_kind::INSERTED)).await,
            Err(PlaygroundError::ArgumentContract(_))
        ));
        assert!(matches!(
            bridge.should_trigger_completions(&id, 0, Some("ab"), Some(edit_kind::INSERTED)).await,
            Err(PlaygroundError::ArgumentContract(_))
        ));
    }

    #[tokio::test]
    async fn trigger_edit_kinds() {
        let bridge = bridge();
        let id = bridge.create_session("let x = 1; x");
        assert!(bridge.should_trigger_completions(&id, 12, Some("x"), Some(edit_kind::INSERTED)).await.unwrap());
        assert!(!bridge.should_trigger_completions(&id, 10, Some(" "), Some(edit_kind::INSERTED)).await.unwrap());
        assert!(bridge.should_trigger_completions(&id, 10, Some(" "), Some(edit_kind::NONE)).await.unwrap());
        assert!(bridge.should_trigger_completions(&id, 10, Some(" "), Some(7)).await.unwrap());
        assert!(matches!(
            bridge.should_trigger_completions("nope", 10, Some(" "), Some(7)).await,
            Err(PlaygroundError::UnknownSessionId(_))
        ));
    }

    #[tokio::test]
    async fn dispatches_json_requests() {
        let bridge = bridge();
        let init = Request::from_json(
            r#"{"method": "Init", "params": {"baseLocation": "memory://libs/", "manifest": "{\"libraries\": [\"math.kiln\"]}"}}"#,
        )
        .unwrap();
        assert_eq!(bridge.dispatch(init).await.unwrap(), Value::Null);

        let create = Request::from_json(
            r#"{"method": "CreateSession", "params": {"source": "print(math.square(7));"}}"#,
        )
        .unwrap();
        let id = bridge.dispatch(create).await.unwrap();
        let id = id.as_str().unwrap().to_string();

        let run = bridge
            .dispatch(Request::Run {
                session_id: id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(run, json!({"success": true, "stdOut": "49\n", "stdErr": ""}));

        let trigger = Request::from_json(&format!(
            r#"{{"method": "ShouldTriggerCompletions", "params": {{"sessionId": "{id}", "caret": 0}}}}"#
        ))
        .unwrap();
        assert_eq!(bridge.dispatch(trigger).await.unwrap(), Value::Bool(true));

        bridge
            .dispatch(Request::CloseSession {
                session_id: id.clone(),
            })
            .await
            .unwrap();
        assert!(bridge.dispatch(Request::GetDiagnostics { session_id: id }).await.is_err());
    }

    #[test]
    fn accepts_inline_manifests() {
        let request = Request::from_json(
            r#"{"method": "Init", "params": {"baseLocation": "file:///libs/", "manifest": {"libraries": ["math.kiln"]}}}"#,
        )
        .unwrap();
        let Request::Init { manifest, .. } = request else {
            panic!("expected an init request");
        };
        assert!(matches!(manifest, ManifestArg::Inline(m) if m.libraries.len() == 1));
    }

    #[test]
    fn rejects_unknown_methods() {
        assert!(matches!(
            Request::from_json(r#"{"method": "Explode", "params": {}}"#),
            Err(PlaygroundError::ArgumentContract(_))
        ));
    }

    #[tokio::test]
    async fn session_options_change_severities() {
        let bridge = bridge();
        let strict = bridge
            .create_session_with_options("let unused = 1;", r#"{"warningsAsErrors": true}"#)
            .unwrap();
        let diagnostics = bridge.get_diagnostics(&strict).await.unwrap();
        let diagnostics: Value = serde_json::from_str(&diagnostics).unwrap();
        assert_eq!(diagnostics[0]["severity"], "Error");

        let quiet = bridge
            .create_session_with_options("let unused = 1;", r#"{"lints": false}"#)
            .unwrap();
        assert_eq!(bridge.get_diagnostics(&quiet).await.unwrap(), "[]");

        assert!(matches!(
            bridge.create_session_with_options("", r#"{"lint": false}"#),
            Err(PlaygroundError::ArgumentContract(_))
        ));
    }

    #[tokio::test]
    async fn create_session_requests_carry_options() {
        let bridge = bridge();
        let request = Request::from_json(
            r#"{"method": "CreateSession", "params": {"source": "let unused = 1;", "options": {"lints": false}}}"#,
        )
        .unwrap();
        let id = bridge.dispatch(request).await.unwrap();
        let id = id.as_str().unwrap().to_string();
        assert_eq!(
            bridge.dispatch(Request::GetDiagnostics { session_id: id }).await.unwrap(),
            json!([])
        );
    }
}
