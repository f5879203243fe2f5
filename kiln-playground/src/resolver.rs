//! Library resolution and the shared reference cache.
//!
//! [`ReferenceResolver::resolve`] fetches every library listed in a
//! [`Manifest`] concurrently, relative to a base location, validates
//! each blob and appends it to the [`ReferenceCache`]. A failed fetch
//! is logged and skipped; it never stops the others.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use kiln_core::Library;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Deserialize;
use url::Url;

use crate::error::{FetchError, PlaygroundError, Result};
use crate::trace::Tracer;

/// Libraries to resolve at startup.
///
/// ```json
/// { "libraries": ["math.kiln", { "name": "fmt", "path": "text/fmt.kiln" }] }
/// ```
///
/// A bare path names the library after its file stem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub libraries: Vec<LibraryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LibraryEntry {
    Path(String),
    Named { name: String, path: String },
}

impl LibraryEntry {
    pub fn name(&self) -> &str {
        match self {
            LibraryEntry::Path(path) => Path::new(path)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(path),
            LibraryEntry::Named { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            LibraryEntry::Path(path) => path,
            LibraryEntry::Named { path, .. } => path,
        }
    }
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Manifest> {
        serde_json::from_str(json).map_err(|err| PlaygroundError::InvalidManifest(err.to_string()))
    }
}

/// Validates a base location: an absolute URL ending in `/`.
pub fn parse_base_location(base: &str) -> Result<Url> {
    let url = Url::parse(base).map_err(|err| {
        PlaygroundError::InvalidConfiguration(format!(
            "base location '{base}' is not an absolute address: {err}"
        ))
    })?;
    if url.cannot_be_a_base() || !url.path().ends_with('/') {
        return Err(PlaygroundError::InvalidConfiguration(format!(
            "base location '{base}' must be a directory-like address ending in '/'"
        )));
    }
    Ok(url)
}

/// Consistent view of the cache at one point in time.
#[derive(Debug, Clone)]
pub struct ReferenceSnapshot {
    pub libraries: Arc<Vec<Arc<Library>>>,
    /// Changes whenever a library lands or a resolution finishes.
    pub generation: u64,
    /// A resolution is in flight.
    pub pending: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    libraries: Arc<Vec<Arc<Library>>>,
    generation: u64,
    in_flight: usize,
}

/// Process-wide, append-only set of validated libraries.
///
/// Readers take cheap snapshots; writers copy the list on insert, so a
/// snapshot never changes under its holder. The first library inserted
/// under a name wins.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    state: RwLock<CacheState>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReferenceSnapshot {
        let state = self.state.read();
        ReferenceSnapshot {
            libraries: Arc::clone(&state.libraries),
            generation: state.generation,
            pending: state.in_flight > 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn is_pending(&self) -> bool {
        self.state.read().in_flight > 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state
            .read()
            .libraries
            .iter()
            .any(|library| library.name() == name)
    }

    pub fn len(&self) -> usize {
        self.state.read().libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `library` unless one with the same name is cached.
    pub fn insert(&self, library: Library) -> bool {
        let mut state = self.state.write();
        if state.libraries.iter().any(|cached| cached.name() == library.name()) {
            return false;
        }
        let mut libraries = Vec::with_capacity(state.libraries.len() + 1);
        libraries.extend(state.libraries.iter().cloned());
        libraries.push(Arc::new(library));
        state.libraries = Arc::new(libraries);
        state.generation += 1;
        true
    }

    fn begin_resolution(self: &Arc<Self>) -> PendingResolution {
        let mut state = self.state.write();
        state.in_flight += 1;
        state.generation += 1;
        PendingResolution {
            cache: Arc::clone(self),
        }
    }
}

/// Marks a resolution as in flight until dropped.
struct PendingResolution {
    cache: Arc<ReferenceCache>,
}

impl Drop for PendingResolution {
    fn drop(&mut self) {
        let mut state = self.cache.state.write();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.generation += 1;
    }
}

/// Retrieves library blobs by location.
#[async_trait]
pub trait ReferenceFetcher: Send + Sync {
    async fn fetch(&self, location: &Url) -> Result<Vec<u8>, FetchError>;
}

/// Reads `file://` locations from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemFetcher;

#[async_trait]
impl ReferenceFetcher for FileSystemFetcher {
    async fn fetch(&self, location: &Url) -> Result<Vec<u8>, FetchError> {
        if location.scheme() != "file" {
            return Err(FetchError::UnsupportedScheme(location.scheme().to_string()));
        }
        let path = location.to_file_path().map_err(|_| FetchError::InvalidLocation {
            path: location.to_string(),
            reason: "not a local file path".to_string(),
        })?;
        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound(location.to_string())
            } else {
                FetchError::Io {
                    location: location.to_string(),
                    source,
                }
            }
        })
    }
}

/// Serves blobs registered up front, keyed by their full location.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    blobs: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(location, bytes);
        self
    }

    pub fn insert(&mut self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.insert(location.into(), bytes.into());
    }
}

#[async_trait]
impl ReferenceFetcher for StaticFetcher {
    async fn fetch(&self, location: &Url) -> Result<Vec<u8>, FetchError> {
        self.blobs
            .get(location.as_str())
            .cloned()
            .ok_or_else(|| FetchError::NotFound(location.to_string()))
    }
}

/// Outcome of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolved: Vec<String>,
    /// Already cached before this pass, or lost a race to a same-named entry.
    pub skipped: Vec<String>,
    /// Library name and the reason it failed.
    pub failed: Vec<(String, String)>,
}

enum Outcome {
    Resolved(String),
    Skipped(String),
    Failed(String, FetchError),
}

pub struct ReferenceResolver {
    fetcher: Arc<dyn ReferenceFetcher>,
    cache: Arc<ReferenceCache>,
}

impl ReferenceResolver {
    pub fn new(fetcher: Arc<dyn ReferenceFetcher>, cache: Arc<ReferenceCache>) -> Self {
        ReferenceResolver { fetcher, cache }
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    /// Resolves every library of `manifest` not yet cached.
    ///
    /// Fails only for a malformed base location, before anything is
    /// fetched. Individual fetch failures land in the report.
    pub async fn resolve(&self, base_location: &str, manifest: &Manifest) -> Result<ResolutionReport> {
        let base = parse_base_location(base_location)?;
        let _tracer = Tracer::trace("resolve references");
        let _pending = self.cache.begin_resolution();
        info!(
            "resolving {} libraries from {}",
            manifest.libraries.len(),
            base
        );

        let fetches = manifest
            .libraries
            .iter()
            .map(|entry| self.resolve_entry(&base, entry));
        let outcomes = join_all(fetches).await;

        let mut report = ResolutionReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Resolved(name) => report.resolved.push(name),
                Outcome::Skipped(name) => report.skipped.push(name),
                Outcome::Failed(name, err) => {
                    warn!("failed to resolve library '{}': {}", name, err);
                    report.failed.push((name, err.to_string()));
                }
            }
        }
        info!(
            "resolved {} libraries ({} skipped, {} failed)",
            report.resolved.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn resolve_entry(&self, base: &Url, entry: &LibraryEntry) -> Outcome {
        let name = entry.name().to_string();
        if self.cache.contains(&name) {
            debug!("library '{}' already cached", name);
            return Outcome::Skipped(name);
        }
        match self.fetch_library(base, entry).await {
            Ok(library) => {
                if self.cache.insert(library) {
                    debug!("library '{}' resolved", name);
                    Outcome::Resolved(name)
                } else {
                    Outcome::Skipped(name)
                }
            }
            Err(err) => Outcome::Failed(name, err),
        }
    }

    async fn fetch_library(&self, base: &Url, entry: &LibraryEntry) -> Result<Library, FetchError> {
        let location = base.join(entry.path()).map_err(|err| FetchError::InvalidLocation {
            path: entry.path().to_string(),
            reason: err.to_string(),
        })?;
        let bytes = self.fetcher.fetch(&location).await?;
        Ok(Library::from_bytes(entry.name(), &bytes)?)
    }
}
