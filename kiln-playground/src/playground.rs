use std::sync::Arc;

use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::resolver::{FileSystemFetcher, Manifest, ReferenceCache, ReferenceFetcher, ReferenceResolver, ResolutionReport};
use crate::sandbox::{ExecutionSandbox, WasmiSandbox};

/// The service object: one reference cache shared by one session
/// registry, fed by one resolver.
pub struct Playground {
    resolver: ReferenceResolver,
    registry: SessionRegistry,
}

impl Playground {
    pub fn new(fetcher: Arc<dyn ReferenceFetcher>, sandbox: Arc<dyn ExecutionSandbox>) -> Self {
        let references = Arc::new(ReferenceCache::new());
        Playground {
            resolver: ReferenceResolver::new(fetcher, Arc::clone(&references)),
            registry: SessionRegistry::new(references, sandbox),
        }
    }

    /// Reads libraries from `file://` locations and runs programs with
    /// the default limits.
    pub fn with_defaults() -> Self {
        Playground::new(Arc::new(FileSystemFetcher), Arc::new(WasmiSandbox::default()))
    }

    /// Resolves the manifest's libraries into the shared cache.
    ///
    /// Sessions may be created and queried while this runs; they see
    /// whatever has landed so far and catch up on their next read.
    pub async fn init(&self, base_location: &str, manifest: &Manifest) -> Result<ResolutionReport> {
        self.resolver.resolve(base_location, manifest).await
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn references(&self) -> &Arc<ReferenceCache> {
        self.resolver.cache()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use kiln_core::diagnostic::codes;
    use tokio::sync::Notify;
    use url::Url;

    use super::*;
    use crate::error::FetchError;
    use crate::resolver::StaticFetcher;
    use crate::session::RunResult;

    const BASE: &str = "memory://libs/";
    const MATH: &str = "fn gcd(a: int, b: int) -> int {
        while b != 0 {
            let t = b;
            b = a % b;
            a = t;
        }
        return a;
    }";
    const TEXT: &str = "fn shout(s: str) { print(s); }";

    fn fetcher() -> StaticFetcher {
        StaticFetcher::new()
            .with("memory://libs/math.kiln", MATH)
            .with("memory://libs/text.kiln", TEXT)
    }

    /// Holds every fetch until the gate opens.
    struct GatedFetcher {
        gate: Arc<Notify>,
        inner: StaticFetcher,
    }

    #[async_trait]
    impl ReferenceFetcher for GatedFetcher {
        async fn fetch(&self, location: &Url) -> Result<Vec<u8>, FetchError> {
            self.gate.notified().await;
            self.inner.fetch(location).await
        }
    }

    #[tokio::test]
    async fn sessions_created_during_init_catch_up() {
        let gate = Arc::new(Notify::new());
        let playground = Arc::new(Playground::new(
            Arc::new(GatedFetcher {
                gate: Arc::clone(&gate),
                inner: fetcher(),
            }),
            Arc::new(WasmiSandbox::default()),
        ));
        let manifest = Manifest::from_json(r#"{"libraries": ["math.kiln"]}"#).unwrap();

        let init = tokio::spawn({
            let playground = Arc::clone(&playground);
            async move { playground.init(BASE, &manifest).await }
        });
        while !playground.references().is_pending() {
            tokio::task::yield_now().await;
        }

        let registry = playground.registry();
        let id = registry.create_session("print(math.gcd(12, 18));");
        let early = registry.get_diagnostics(&id).await.unwrap();
        assert!(early.iter().any(|d| d.code == codes::LIBRARY_NOT_LOADED));

        gate.notify_one();
        let report = init.await.unwrap().unwrap();
        assert_eq!(report.resolved, ["math"]);

        assert!(registry.get_diagnostics(&id).await.unwrap().is_empty());
        assert_eq!(
            registry.run(&id).await.unwrap(),
            RunResult::Success {
                std_out: "6\n".to_string(),
                std_err: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn a_failed_library_only_affects_its_users() {
        let playground = Playground::new(Arc::new(fetcher()), Arc::new(WasmiSandbox::default()));
        let manifest = Manifest::from_json(
            r#"{"libraries": ["math.kiln", "text.kiln", "missing.kiln"]}"#,
        )
        .unwrap();
        let report = playground.init(BASE, &manifest).await.unwrap();
        assert_eq!(report.resolved.len(), 2);
        assert_eq!(report.failed.len(), 1);

        let registry = playground.registry();
        let uses_math = registry.create_session("print(math.gcd(4, 6));");
        let uses_text = registry.create_session("text.shout(\"hey\");");
        let uses_missing = registry.create_session("missing.thing();");

        assert!(registry.get_diagnostics(&uses_math).await.unwrap().is_empty());
        assert!(registry.get_diagnostics(&uses_text).await.unwrap().is_empty());
        let missing = registry.get_diagnostics(&uses_missing).await.unwrap();
        assert!(missing.iter().any(|d| d.code == codes::UNKNOWN_LIBRARY));
    }

    #[tokio::test]
    async fn init_rejects_a_bad_base_location() {
        let playground = Playground::new(Arc::new(fetcher()), Arc::new(WasmiSandbox::default()));
        let manifest = Manifest::default();
        assert!(playground.init("libs", &manifest).await.is_err());
        assert!(!playground.references().is_pending());
    }
}
