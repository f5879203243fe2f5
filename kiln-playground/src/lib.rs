//! Session-based compilation and execution service for the Kiln
//! playground.
//!
//! A [`Playground`] owns a shared [`ReferenceCache`] fed by a
//! [`ReferenceResolver`], a [`SessionRegistry`] of live
//! [`CompilationSession`]s and the [`ExecutionSandbox`] that runs
//! emitted programs. Hosts talk to it through an [`InteropBridge`].

pub mod bridge;
pub mod error;
pub mod playground;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod session;
pub mod wire;

mod trace;

pub use bridge::{InteropBridge, Request};
pub use error::{FetchError, PlaygroundError, Result};
pub use playground::Playground;
pub use registry::SessionRegistry;
pub use resolver::{
    FileSystemFetcher, LibraryEntry, Manifest, ReferenceCache, ReferenceFetcher, ReferenceResolver,
    ResolutionReport, StaticFetcher,
};
pub use sandbox::{Execution, ExecutionSandbox, SandboxLimits, WasmiSandbox};
pub use session::{CompilationSession, RunResult};
