//! Isolated execution of emitted programs.
//!
//! [`ExecutionSandbox`] is the single seam between sessions and the
//! machinery that runs code. [`WasmiSandbox`] interprets the module
//! with `wasmi` in a fresh engine and store per run, so nothing
//! outlives the call. Output goes to a buffer owned by that store.

use async_trait::async_trait;
use kiln_core::Artifact;
use kiln_core::builtins::{HOST_MODULE, Intrinsic};
use kiln_core::codegen_wasm::{ENTRY_EXPORT, MEMORY_EXPORT};
use log::debug;
use wasmi::{Caller, Config, Engine, Extern, Linker, Module, Store, TrapCode};

use crate::trace::Tracer;

/// Captured result of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    /// Everything the program wrote, up to the fault if there was one.
    pub std_out: String,
    /// Description of the fault that stopped the program.
    pub fault: Option<String>,
}

#[async_trait]
pub trait ExecutionSandbox: Send + Sync {
    /// Runs the artifact's entry point. Faults are captured in the
    /// returned [`Execution`], never raised.
    async fn execute(&self, artifact: &Artifact) -> Execution;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Instruction budget in wasmi fuel units. `None` runs unbounded.
    pub fuel: Option<u64>,
    /// Output beyond this many bytes stops the program.
    pub max_output_bytes: usize,
}

impl SandboxLimits {
    pub const DEFAULT_FUEL: u64 = 100_000_000;
    pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            fuel: Some(Self::DEFAULT_FUEL),
            max_output_bytes: Self::DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WasmiSandbox {
    limits: SandboxLimits,
}

impl WasmiSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        WasmiSandbox { limits }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Runs `wasm` on the calling thread.
    pub fn run_blocking(&self, wasm: &[u8]) -> Execution {
        run_module(wasm, self.limits)
    }
}

#[async_trait]
impl ExecutionSandbox for WasmiSandbox {
    async fn execute(&self, artifact: &Artifact) -> Execution {
        let _tracer = Tracer::trace("execute");
        let wasm = artifact.wasm().to_vec();
        let limits = self.limits;
        match tokio::task::spawn_blocking(move || run_module(&wasm, limits)).await {
            Ok(execution) => execution,
            Err(err) => Execution {
                std_out: String::new(),
                fault: Some(format!("execution aborted: {err}")),
            },
        }
    }
}

struct HostState {
    output: String,
    fault: Option<String>,
    max_output_bytes: usize,
}

impl HostState {
    fn emit(&mut self, text: &str) -> Result<(), wasmi::Error> {
        if self.output.len() + text.len() > self.max_output_bytes {
            let message = format!(
                "output exceeded the limit of {} bytes",
                self.max_output_bytes
            );
            self.fault = Some(message.clone());
            return Err(wasmi::Error::new(message));
        }
        self.output.push_str(text);
        Ok(())
    }
}

fn run_module(wasm: &[u8], limits: SandboxLimits) -> Execution {
    let mut config = Config::default();
    if limits.fuel.is_some() {
        config.consume_fuel(true);
    }
    let engine = Engine::new(&config);
    let mut store = Store::new(
        &engine,
        HostState {
            output: String::new(),
            fault: None,
            max_output_bytes: limits.max_output_bytes,
        },
    );

    let outcome = invoke_entry(&engine, &mut store, wasm, limits.fuel);
    let state = store.into_data();

    let fault = match outcome {
        Ok(()) => None,
        Err(_) if state.fault.is_some() => state.fault,
        Err(err) if err.as_trap_code() == Some(TrapCode::OutOfFuel) => Some(format!(
            "execution exceeded the instruction budget of {} units",
            limits.fuel.unwrap_or_default()
        )),
        Err(err) => Some(format!("runtime fault: {err}")),
    };
    if let Some(fault) = &fault {
        debug!("program faulted: {}", fault);
    }
    Execution {
        std_out: state.output,
        fault,
    }
}

fn invoke_entry(
    engine: &Engine,
    store: &mut Store<HostState>,
    wasm: &[u8],
    fuel: Option<u64>,
) -> Result<(), wasmi::Error> {
    if let Some(fuel) = fuel {
        store.set_fuel(fuel)?;
    }
    let module = Module::new(engine, wasm)?;
    let mut linker = Linker::<HostState>::new(engine);
    define_intrinsics(&mut linker)?;
    let instance = linker.instantiate_and_start(&mut *store, &module)?;
    let entry = instance.get_typed_func::<(), ()>(&*store, ENTRY_EXPORT)?;
    entry.call(&mut *store, ())
}

fn define_intrinsics(linker: &mut Linker<HostState>) -> Result<(), wasmi::Error> {
    linker.func_wrap(
        HOST_MODULE,
        Intrinsic::PrintInt.import_name(),
        |mut caller: Caller<'_, HostState>, value: i32| caller.data_mut().emit(&format!("{value}\n")),
    )?;
    linker.func_wrap(
        HOST_MODULE,
        Intrinsic::PrintBool.import_name(),
        |mut caller: Caller<'_, HostState>, value: i32| {
            caller.data_mut().emit(if value != 0 { "true\n" } else { "false\n" })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        Intrinsic::PrintStr.import_name(),
        |mut caller: Caller<'_, HostState>, ptr: i32| {
            let text = read_str(&caller, ptr)?;
            caller.data_mut().emit(&format!("{text}\n"))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        Intrinsic::WriteInt.import_name(),
        |mut caller: Caller<'_, HostState>, value: i32| caller.data_mut().emit(&value.to_string()),
    )?;
    linker.func_wrap(
        HOST_MODULE,
        Intrinsic::WriteBool.import_name(),
        |mut caller: Caller<'_, HostState>, value: i32| {
            caller.data_mut().emit(if value != 0 { "true" } else { "false" })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        Intrinsic::WriteStr.import_name(),
        |mut caller: Caller<'_, HostState>, ptr: i32| {
            let text = read_str(&caller, ptr)?;
            caller.data_mut().emit(&text)
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        Intrinsic::Panic.import_name(),
        |mut caller: Caller<'_, HostState>, ptr: i32| -> Result<(), wasmi::Error> {
            let message = format!("panic: {}", read_str(&caller, ptr)?);
            caller.data_mut().fault = Some(message.clone());
            Err(wasmi::Error::new(message))
        },
    )?;
    Ok(())
}

/// Reads a length-prefixed string from the module's exported memory.
fn read_str(caller: &Caller<'_, HostState>, ptr: i32) -> Result<String, wasmi::Error> {
    let memory = caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmi::Error::new("module does not export its memory"))?;
    let data = memory.data(caller);

    let invalid = || wasmi::Error::new(format!("invalid string pointer {ptr}"));
    let start = usize::try_from(ptr).map_err(|_| invalid())?;
    let header: [u8; 4] = data
        .get(start..start + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(invalid)?;
    let len = u32::from_le_bytes(header) as usize;
    let bytes = data
        .get(start + 4..start + 4 + len)
        .ok_or_else(invalid)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use kiln_core::{CompileOptions, Compilation};

    use super::*;

    fn artifact(source: &str) -> Artifact {
        Compilation::new(source, &[], CompileOptions::default())
            .emit()
            .expect("program compiles")
    }

    fn run(source: &str, limits: SandboxLimits) -> Execution {
        WasmiSandbox::new(limits).run_blocking(artifact(source).wasm())
    }

    #[test]
    fn captures_output_of_every_intrinsic() {
        let execution = run(
            "print(\"hi\"); print(42); print(true); write(\"a\"); write(-7); write(false);",
            SandboxLimits::default(),
        );
        assert_eq!(execution.std_out, "hi\n42\ntrue\na-7false");
        assert_eq!(execution.fault, None);
    }

    #[test]
    fn panic_keeps_partial_output() {
        let execution = run("write(\"before\"); panic(\"boom\"); print(\"after\");", SandboxLimits::default());
        assert_eq!(execution.std_out, "before");
        assert_eq!(execution.fault.as_deref(), Some("panic: boom"));
    }

    #[test]
    fn failed_assert_is_a_fault() {
        let execution = run("assert(1 > 2, \"math is broken\");", SandboxLimits::default());
        assert_eq!(execution.fault.as_deref(), Some("panic: math is broken"));
    }

    #[test]
    fn traps_are_faults() {
        let execution = run("let zero = 0; print(1 / zero);", SandboxLimits::default());
        let fault = execution.fault.expect("division by zero faults");
        assert!(fault.starts_with("runtime fault"), "{fault}");
    }

    #[test]
    fn division_overflow_faults() {
        let execution = run(
            "let min = -2147483647 - 1; let neg = -1; print(min % neg); print(min / neg);",
            SandboxLimits::default(),
        );
        assert_eq!(execution.std_out, "0\n");
        let fault = execution.fault.expect("overflowing division faults");
        assert!(fault.starts_with("runtime fault"), "{fault}");
    }

    #[test]
    fn fuel_bounds_infinite_loops() {
        let limits = SandboxLimits {
            fuel: Some(10_000),
            ..SandboxLimits::default()
        };
        let execution = run("print(1); while true { }", limits);
        assert_eq!(execution.std_out, "1\n");
        assert_eq!(
            execution.fault.as_deref(),
            Some("execution exceeded the instruction budget of 10000 units")
        );
    }

    #[test]
    fn output_limit_is_enforced() {
        let limits = SandboxLimits {
            max_output_bytes: 8,
            ..SandboxLimits::default()
        };
        let execution = run("let i = 0; while i < 100 { write(\"ab\"); i = i + 1; }", limits);
        assert_eq!(execution.std_out, "abababab");
        assert_eq!(
            execution.fault.as_deref(),
            Some("output exceeded the limit of 8 bytes")
        );
    }

    #[test]
    fn unlimited_fuel_runs_to_completion() {
        let limits = SandboxLimits {
            fuel: None,
            ..SandboxLimits::default()
        };
        let execution = run(
            "let i = 0; while i < 1000 { i = i + 1; } print(i);",
            limits,
        );
        assert_eq!(execution.std_out, "1000\n");
    }

    #[test]
    fn garbage_bytes_fault_instead_of_panicking() {
        let execution = WasmiSandbox::default().run_blocking(b"not wasm");
        assert!(execution.fault.is_some());
        assert!(execution.std_out.is_empty());
    }

    #[tokio::test]
    async fn executes_through_the_trait() {
        let sandbox: Box<dyn ExecutionSandbox> = Box::new(WasmiSandbox::default());
        let execution = sandbox.execute(&artifact("print(\"hi\");")).await;
        assert_eq!(execution.std_out, "hi\n");
    }
}
