use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::Verbosity;
use kiln_core::{Diagnostic, Severity, UnitOptions};
use kiln_playground::{
    FileSystemFetcher, InteropBridge, LibraryEntry, Manifest, Playground, Request, RunResult,
    SandboxLimits, WasmiSandbox,
};
use log::{info, warn};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use url::Url;
use walkdir::WalkDir;

const MANIFEST_FILE: &str = "manifest.json";
const LIBRARY_EXTENSION: &str = "kiln";

/// Compile, check and run Kiln programs, or serve the playground over
/// JSON lines.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    libraries: LibraryArgs,

    #[command(flatten)]
    limits: LimitArgs,

    #[command(flatten)]
    unit: UnitArgs,

    #[command(flatten)]
    verbose: Verbosity,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the diagnostics of a program; fails if it has errors.
    Check {
        /// Source file; standard input when omitted.
        file: Option<PathBuf>,
    },
    /// Compile and run a program.
    Run {
        /// Source file; standard input when omitted.
        file: Option<PathBuf>,
    },
    /// Answer `{"method", "params"}` requests read line by line from
    /// standard input.
    Serve,
}

#[derive(Args, Debug)]
struct LibraryArgs {
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory to resolve libraries from (defaults to the bundled libraries)"
    )]
    libraries: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Library manifest; its directory becomes the library directory"
    )]
    manifest: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LimitArgs {
    #[arg(
        long,
        global = true,
        value_name = "UNITS",
        default_value_t = SandboxLimits::DEFAULT_FUEL,
        help = "Instruction budget for a single run"
    )]
    fuel: u64,

    #[arg(long, global = true, conflicts_with = "fuel", help = "Run without an instruction budget")]
    unlimited: bool,

    #[arg(
        long,
        global = true,
        value_name = "BYTES",
        default_value_t = SandboxLimits::DEFAULT_MAX_OUTPUT_BYTES,
        help = "Maximum output of a single run"
    )]
    max_output: usize,
}

#[derive(Args, Debug)]
struct UnitArgs {
    #[arg(long, global = true, help = "Treat warnings as errors")]
    deny_warnings: bool,

    #[arg(long, global = true, help = "Skip the style lints")]
    no_lints: bool,
}

impl UnitArgs {
    fn unit_options(&self) -> UnitOptions {
        UnitOptions {
            lints: !self.no_lints,
            warnings_as_errors: self.deny_warnings,
        }
    }
}

impl LimitArgs {
    fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            fuel: (!self.unlimited).then_some(self.fuel),
            max_output_bytes: self.max_output,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .parse_default_env()
        .init();
    execute(cli).await
}

async fn execute(cli: Cli) -> Result<()> {
    let (base, manifest) = library_source(&cli.libraries)?;
    let playground = Arc::new(Playground::new(
        Arc::new(FileSystemFetcher),
        Arc::new(WasmiSandbox::new(cli.limits.sandbox_limits())),
    ));
    let report = playground
        .init(base.as_str(), &manifest)
        .await
        .with_context(|| format!("failed to resolve libraries from {base}"))?;
    info!("{} libraries available", report.resolved.len());

    let options = cli.unit.unit_options();
    match cli.command {
        Command::Check { file } => check(&playground, file.as_deref(), options).await,
        Command::Run { file } => run(&playground, file.as_deref(), options).await,
        Command::Serve => serve(InteropBridge::new(playground)).await,
    }
}

async fn check(playground: &Playground, file: Option<&Path>, options: UnitOptions) -> Result<()> {
    let (name, source) = read_source(file)?;
    let registry = playground.registry();
    let id = registry.create_session_with(source.as_str(), options);
    let diagnostics = registry.get_diagnostics(&id).await?;
    for diagnostic in diagnostics.iter().filter(|d| d.severity != Severity::Hidden) {
        println!("{}", render(&name, &source, diagnostic));
    }
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    if errors > 0 {
        bail!("{name}: found {errors} error(s)");
    }
    Ok(())
}

async fn run(playground: &Playground, file: Option<&Path>, options: UnitOptions) -> Result<()> {
    let (name, source) = read_source(file)?;
    let registry = playground.registry();
    let id = registry.create_session_with(source.as_str(), options);
    match registry.run(&id).await? {
        RunResult::Success { std_out, std_err } => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(std_out.as_bytes())?;
            stdout.flush()?;
            if !std_err.is_empty() {
                bail!("{name}: {std_err}");
            }
            Ok(())
        }
        RunResult::Failure { diagnostics } => {
            for diagnostic in &diagnostics {
                eprintln!("{}", render(&name, &source, diagnostic));
            }
            bail!("{name}: compilation failed");
        }
    }
}

async fn serve(bridge: InteropBridge) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await.context("failed to read a request")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match Request::from_json(&line) {
            Ok(request) => match bridge.dispatch(request).await {
                Ok(value) => json!({ "ok": value }),
                Err(err) => json!({ "error": err.to_string() }),
            },
            Err(err) => json!({ "error": err.to_string() }),
        };
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn read_source(file: Option<&Path>) -> Result<(String, String)> {
    match file {
        Some(path) => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("failed to read input file {}", path.display()))?;
            Ok((path.display().to_string(), source))
        }
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read standard input")?;
            Ok(("<stdin>".to_string(), buffer))
        }
    }
}

/// `file:line:column: Severity CODE: message`, with 1-based positions.
fn render(name: &str, source: &str, diagnostic: &Diagnostic) -> String {
    let (line, column) = line_col(source, diagnostic.span.start as usize);
    format!(
        "{name}:{line}:{column}: {} {}: {}",
        diagnostic.severity, diagnostic.code, diagnostic.message
    )
}

fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut offset = offset.min(source.len());
    while !source.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |index| index + 1);
    (line, before[line_start..].chars().count() + 1)
}

fn default_library_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../libraries")
}

/// Base location and manifest for the libraries selected on the
/// command line.
fn library_source(args: &LibraryArgs) -> Result<(Url, Manifest)> {
    if let Some(path) = &args.manifest {
        let path = path
            .canonicalize()
            .with_context(|| format!("manifest {} does not exist", path.display()))?;
        let manifest = read_manifest(&path)?;
        let root = path
            .parent()
            .ok_or_else(|| anyhow!("manifest {} has no parent directory", path.display()))?;
        return Ok((directory_url(root)?, manifest));
    }

    let root = args.libraries.clone().unwrap_or_else(default_library_root);
    let root = root
        .canonicalize()
        .with_context(|| format!("library directory {} does not exist", root.display()))?;
    let manifest = discover_manifest(&root)?;
    Ok((directory_url(&root)?, manifest))
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    Manifest::from_json(&text).with_context(|| format!("failed to parse manifest {}", path.display()))
}

/// Uses `manifest.json` at the root when present, and otherwise every
/// `.kiln` file below the root.
fn discover_manifest(root: &Path) -> Result<Manifest> {
    let declared = root.join(MANIFEST_FILE);
    if declared.is_file() {
        return read_manifest(&declared);
    }

    let mut libraries = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable library entry: {}", err);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() || !path.extension().is_some_and(|ext| ext == LIBRARY_EXTENSION) {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        let segments: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        libraries.push(LibraryEntry::Path(segments.join("/")));
    }
    Ok(Manifest { libraries })
}

fn directory_url(path: &Path) -> Result<Url> {
    Url::from_directory_path(path)
        .map_err(|()| anyhow!("cannot express {} as a file URL", path.display()))
}
