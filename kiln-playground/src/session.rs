//! One unit of source text and the compiled view derived from it.
//!
//! Text changes only mark the session dirty. The next read resyncs: it
//! compiles the current text against a snapshot of the reference cache
//! on the blocking pool and installs the result as a new view. Views
//! are immutable and shared, so a reader always holds a whole view.

use std::sync::Arc;

use kiln_core::completion::{self, filter_completions, typed_prefix};
use kiln_core::{
    CompileOptions, Compilation, CompletionItem, CompletionTrigger, Diagnostic, UnitOptions,
};
use log::trace;
use parking_lot::Mutex;

use crate::error::Result;
use crate::resolver::ReferenceCache;
use crate::sandbox::ExecutionSandbox;
use crate::trace::Tracer;

/// Outcome of running a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// The program was emitted and executed. `std_err` carries the fault
    /// text when the program stopped early, and is empty otherwise.
    Success { std_out: String, std_err: String },
    /// Emission failed; nothing ran.
    Failure { diagnostics: Vec<Diagnostic> },
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success { .. })
    }
}

/// A compilation together with what it was built from.
#[derive(Debug)]
pub struct CompiledView {
    pub compilation: Compilation,
    /// Text revision the view was compiled from.
    pub revision: u64,
    /// Reference cache generation the view was compiled against.
    pub generation: u64,
}

impl CompiledView {
    fn is_newer_than(&self, other: &CompiledView) -> bool {
        (self.revision, self.generation) > (other.revision, other.generation)
    }
}

struct SessionState {
    source: Arc<str>,
    revision: u64,
    view: Option<Arc<CompiledView>>,
}

pub struct CompilationSession {
    state: Mutex<SessionState>,
    options: UnitOptions,
    references: Arc<ReferenceCache>,
    sandbox: Arc<dyn ExecutionSandbox>,
}

impl CompilationSession {
    pub fn new(
        source: impl Into<Arc<str>>,
        references: Arc<ReferenceCache>,
        sandbox: Arc<dyn ExecutionSandbox>,
    ) -> Self {
        CompilationSession {
            state: Mutex::new(SessionState {
                source: source.into(),
                revision: 0,
                view: None,
            }),
            options: UnitOptions::default(),
            references,
            sandbox,
        }
    }

    /// Compiles every view of the session with `options`.
    pub fn with_options(mut self, options: UnitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> UnitOptions {
        self.options
    }

    pub fn source(&self) -> Arc<str> {
        Arc::clone(&self.state.lock().source)
    }

    /// Whether the next read has to resync.
    pub fn is_dirty(&self) -> bool {
        let state = self.state.lock();
        match &state.view {
            Some(view) => !self.is_current(view, state.revision),
            None => true,
        }
    }

    /// Replaces the text. Nothing is compiled until the next read.
    pub fn recompile(&self, source: impl Into<Arc<str>>) {
        let mut state = self.state.lock();
        state.source = source.into();
        state.revision += 1;
        trace!("session marked dirty at revision {}", state.revision);
    }

    pub async fn diagnostics(&self) -> Result<Vec<Diagnostic>> {
        let _tracer = Tracer::trace("get diagnostics");
        let view = self.current_view().await?;
        Ok(view.compilation.diagnostics().to_vec())
    }

    /// Completion candidates at `caret`, narrowed by `filter` when it is
    /// non-empty and by the text typed before the caret otherwise.
    pub async fn completions(&self, caret: u32, filter: Option<&str>) -> Result<Vec<CompletionItem>> {
        let _tracer = Tracer::trace("get completions");
        let view = self.current_view().await?;
        let filter = filter.filter(|prefix| !prefix.is_empty()).map(str::to_string);
        let items = tokio::task::spawn_blocking(move || {
            let compilation = &view.compilation;
            let items = completion::completions(compilation, caret);
            let prefix = match &filter {
                Some(prefix) => prefix.as_str(),
                None => typed_prefix(compilation.source(), caret),
            };
            filter_completions(items, prefix)
        })
        .await?;
        Ok(items)
    }

    pub async fn should_trigger(&self, caret: u32, trigger: CompletionTrigger) -> Result<bool> {
        if trigger == CompletionTrigger::Invoke {
            return Ok(true);
        }
        let view = self.current_view().await?;
        Ok(completion::should_trigger(&view.compilation, caret, trigger))
    }

    pub async fn run(&self) -> Result<RunResult> {
        let _tracer = Tracer::trace("run");
        let view = self.current_view().await?;
        let emitted = tokio::task::spawn_blocking(move || {
            let _tracer = Tracer::trace("emit");
            view.compilation.emit()
        })
        .await?;

        let artifact = match emitted {
            Ok(artifact) => artifact,
            Err(diagnostics) => return Ok(RunResult::Failure { diagnostics }),
        };
        let execution = self.sandbox.execute(&artifact).await;
        Ok(RunResult::Success {
            std_out: execution.std_out,
            std_err: execution.fault.unwrap_or_default(),
        })
    }

    /// The compiled view for the current text and references, resyncing
    /// first when either changed since the last one was built.
    pub async fn current_view(&self) -> Result<Arc<CompiledView>> {
        let (source, revision) = {
            let state = self.state.lock();
            if let Some(view) = &state.view {
                if self.is_current(view, state.revision) {
                    trace!("reusing view at revision {}", view.revision);
                    return Ok(Arc::clone(view));
                }
            }
            (Arc::clone(&state.source), state.revision)
        };

        let _tracer = Tracer::trace("resync");
        let snapshot = self.references.snapshot();
        trace!(
            "resyncing revision {} against generation {}{}",
            revision,
            snapshot.generation,
            if snapshot.pending { " (resolution pending)" } else { "" }
        );
        let unit = self.options;
        let built = tokio::task::spawn_blocking(move || {
            let options = CompileOptions {
                libraries_pending: snapshot.pending,
                unit,
            };
            CompiledView {
                compilation: Compilation::new(source, &snapshot.libraries, options),
                revision,
                generation: snapshot.generation,
            }
        })
        .await?;

        // A concurrent read may have installed a newer view meanwhile.
        let mut state = self.state.lock();
        if let Some(current) = &state.view {
            if !built.is_newer_than(current) {
                return Ok(Arc::clone(current));
            }
        }
        let built = Arc::new(built);
        state.view = Some(Arc::clone(&built));
        Ok(built)
    }

    fn is_current(&self, view: &CompiledView, revision: u64) -> bool {
        view.revision == revision && view.generation == self.references.generation()
    }
}

#[cfg(test)]
mod tests {
    use kiln_core::Library;
    use kiln_core::diagnostic::codes;

    use super::*;
    use crate::sandbox::WasmiSandbox;

    fn session(source: &str) -> (CompilationSession, Arc<ReferenceCache>) {
        let cache = Arc::new(ReferenceCache::new());
        let session = CompilationSession::new(
            source,
            Arc::clone(&cache),
            Arc::new(WasmiSandbox::default()),
        );
        (session, cache)
    }

    #[tokio::test]
    async fn resync_is_idempotent() {
        let (session, _) = session("let x = 1; print(x);");
        let first = session.current_view().await.unwrap();
        let second = session.current_view().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn recompile_only_marks_dirty() {
        let (session, _) = session("print(1);");
        session.current_view().await.unwrap();
        session.recompile("print(undefined);");
        assert!(session.is_dirty());
        assert_eq!(session.source().as_ref(), "print(undefined);");

        let diagnostics = session.diagnostics().await.unwrap();
        assert!(diagnostics.iter().any(|d| d.code == codes::UNKNOWN_NAME));
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn library_arrival_invalidates_the_view() {
        let (session, cache) = session("print(math.double(2));");
        let diagnostics = session.diagnostics().await.unwrap();
        assert!(diagnostics.iter().any(|d| d.code == codes::UNKNOWN_LIBRARY));

        let library = Library::from_source("math", "fn double(x: int) -> int { return x * 2; }").unwrap();
        cache.insert(library);
        assert!(session.is_dirty());
        assert!(session.diagnostics().await.unwrap().is_empty());
        assert_eq!(
            session.run().await.unwrap(),
            RunResult::Success {
                std_out: "4\n".to_string(),
                std_err: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn completions_use_the_typed_prefix() {
        let (session, _) = session("fn Foo() {} fn Foobar() {} fn Bar() {} Foo");
        let caret = session.source().len() as u32;
        let items = session.completions(caret, None).await.unwrap();
        let names: Vec<&str> = items.iter().map(|item| item.display_text.as_str()).collect();
        assert_eq!(names, ["Foobar"]);
    }

    #[tokio::test]
    async fn explicit_filter_overrides_the_typed_prefix() {
        let (session, _) = session("fn Foo() {} fn Foobar() {} fn Bar() {} ");
        let caret = session.source().len() as u32;
        let items = session.completions(caret, Some("Ba")).await.unwrap();
        let names: Vec<&str> = items.iter().map(|item| item.display_text.as_str()).collect();
        assert_eq!(names, ["Bar"]);
    }

    #[tokio::test]
    async fn run_reports_emit_failures_as_diagnostics() {
        let (session, _) = session("this is not valid code");
        match session.run().await.unwrap() {
            RunResult::Failure { diagnostics } => {
                assert!(diagnostics.iter().any(Diagnostic::is_error));
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_keeps_output_before_a_fault() {
        let (session, _) = session("write(\"before\"); panic(\"boom\");");
        match session.run().await.unwrap() {
            RunResult::Success { std_out, std_err } => {
                assert_eq!(std_out, "before");
                assert!(!std_err.is_empty());
            }
            other => panic!("expected a success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn options_apply_to_every_view() {
        let (session, _) = session("let unused = 1;");
        let session = session.with_options(UnitOptions {
            lints: true,
            warnings_as_errors: true,
        });
        let diagnostics = session.diagnostics().await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_error());
        assert!(!session.run().await.unwrap().is_success());

        session.recompile("let quiet = 1;");
        let diagnostics = session.diagnostics().await.unwrap();
        assert!(diagnostics.iter().all(Diagnostic::is_error));
        assert_eq!(diagnostics.len(), 1);
    }
}
