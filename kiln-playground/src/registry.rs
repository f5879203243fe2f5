use std::sync::Arc;

use dashmap::DashMap;
use kiln_core::{CompletionItem, CompletionTrigger, Diagnostic, UnitOptions};
use log::debug;
use uuid::Uuid;

use crate::error::{PlaygroundError, Result};
use crate::resolver::ReferenceCache;
use crate::sandbox::ExecutionSandbox;
use crate::session::{CompilationSession, RunResult};

/// Owns every live session, keyed by an opaque id.
///
/// The map is only written by [`create_session`](Self::create_session)
/// and [`close_session`](Self::close_session). Every other operation
/// clones the session handle out of the map before awaiting, so work on
/// one session never holds up another.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<CompilationSession>>,
    references: Arc<ReferenceCache>,
    sandbox: Arc<dyn ExecutionSandbox>,
}

impl SessionRegistry {
    pub fn new(references: Arc<ReferenceCache>, sandbox: Arc<dyn ExecutionSandbox>) -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            references,
            sandbox,
        }
    }

    pub fn create_session(&self, source: impl Into<Arc<str>>) -> String {
        self.create_session_with(source, UnitOptions::default())
    }

    pub fn create_session_with(&self, source: impl Into<Arc<str>>, options: UnitOptions) -> String {
        let id = Uuid::new_v4().to_string();
        let session = CompilationSession::new(
            source,
            Arc::clone(&self.references),
            Arc::clone(&self.sandbox),
        )
        .with_options(options);
        self.sessions.insert(id.clone(), Arc::new(session));
        debug!("created session {}", id);
        id
    }

    pub fn recompile(&self, id: &str, source: impl Into<Arc<str>>) -> Result<()> {
        self.session(id)?.recompile(source);
        Ok(())
    }

    pub async fn get_diagnostics(&self, id: &str) -> Result<Vec<Diagnostic>> {
        self.session(id)?.diagnostics().await
    }

    pub async fn get_completions(
        &self,
        id: &str,
        caret: u32,
        filter: Option<&str>,
    ) -> Result<Vec<CompletionItem>> {
        self.session(id)?.completions(caret, filter).await
    }

    /// `None` is an explicit request and always triggers.
    pub async fn should_trigger_completions(
        &self,
        id: &str,
        caret: u32,
        trigger: Option<CompletionTrigger>,
    ) -> Result<bool> {
        let session = self.session(id)?;
        match trigger {
            Some(trigger) => session.should_trigger(caret, trigger).await,
            None => Ok(true),
        }
    }

    pub async fn run(&self, id: &str) -> Result<RunResult> {
        self.session(id)?.run().await
    }

    pub fn close_session(&self, id: &str) -> Result<()> {
        match self.sessions.remove(id) {
            Some(_) => {
                debug!("closed session {}", id);
                Ok(())
            }
            None => Err(PlaygroundError::UnknownSessionId(id.to_string())),
        }
    }

    pub fn session(&self, id: &str) -> Result<Arc<CompilationSession>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PlaygroundError::UnknownSessionId(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use kiln_core::Severity;
    use kiln_core::diagnostic::codes;

    use super::*;
    use crate::sandbox::WasmiSandbox;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(ReferenceCache::new()),
            Arc::new(WasmiSandbox::default()),
        )
    }

    #[tokio::test]
    async fn diagnostics_follow_the_latest_text() {
        let registry = registry();
        let id = registry.create_session("let x: int = true;");
        let first = registry.get_diagnostics(&id).await.unwrap();
        assert!(first.iter().any(|d| d.severity == Severity::Error));
        assert_eq!(registry.get_diagnostics(&id).await.unwrap(), first);

        registry.recompile(&id, "let x: int = 1; print(x);").unwrap();
        assert!(registry.get_diagnostics(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_fail() {
        let registry = registry();
        let err = registry.get_diagnostics("nope").await.unwrap_err();
        assert!(matches!(err, PlaygroundError::UnknownSessionId(id) if id == "nope"));
        assert!(registry.recompile("nope", "").is_err());
        assert!(registry.run("nope").await.is_err());
        assert!(registry.should_trigger_completions("nope", 0, None).await.is_err());
    }

    #[tokio::test]
    async fn explicit_trigger_always_fires() {
        let registry = registry();
        let id = registry.create_session("// just a comment");
        assert!(registry.should_trigger_completions(&id, 5, None).await.unwrap());
        assert!(
            !registry
                .should_trigger_completions(&id, 5, Some(CompletionTrigger::Insertion('a')))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let registry = registry();
        let good = registry.create_session("print(\"hi\");");
        let bad = registry.create_session("print(");
        assert_ne!(good, bad);
        assert_eq!(registry.len(), 2);

        assert_eq!(
            registry.run(&good).await.unwrap(),
            RunResult::Success {
                std_out: "hi\n".to_string(),
                std_err: String::new(),
            }
        );
        assert!(!registry.run(&bad).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn closed_sessions_are_gone() {
        let registry = registry();
        let id = registry.create_session("");
        registry.close_session(&id).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get_diagnostics(&id).await,
            Err(PlaygroundError::UnknownSessionId(_))
        ));
        assert!(registry.close_session(&id).is_err());
    }

    #[tokio::test]
    async fn deep_expressions_are_diagnostics() {
        let registry = registry();
        let chain = registry.create_session(format!("print(1{});", "+1".repeat(2000)));
        let mut else_ifs = String::from("if true { }");
        for _ in 0..5000 {
            else_ifs.push_str(" else if true { }");
        }
        let branches = registry.create_session(else_ifs);

        for id in [chain, branches] {
            let diagnostics = registry.get_diagnostics(&id).await.unwrap();
            assert!(diagnostics.iter().any(|d| d.code == codes::NESTING_TOO_DEEP));
            assert!(!registry.run(&id).await.unwrap().is_success());
        }
    }

    #[tokio::test]
    async fn sessions_keep_their_own_options() {
        let registry = registry();
        let quiet = registry.create_session_with(
            "let unused = 1;",
            UnitOptions {
                lints: false,
                ..UnitOptions::default()
            },
        );
        let plain = registry.create_session("let unused = 1;");
        assert!(registry.get_diagnostics(&quiet).await.unwrap().is_empty());
        assert_eq!(registry.get_diagnostics(&plain).await.unwrap().len(), 1);
        assert!(!registry.session(&quiet).unwrap().options().lints);
    }
}
