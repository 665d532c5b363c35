//! # kestrel-core
//!
//! OS process control for the Kestrel debugger.
//!
//! This crate launches or attaches to a native process, waits for it to trap,
//! and drives its threads: halt, resume, single-step, registers and memory.
//! Breakpoints are planted by the caller; this crate recognizes when one was
//! hit and steps off it on resume.
//!
//! ## Structure
//!
//! - [`process::Process`]: the caller-facing handle, forwarding every operation
//!   to a single [`worker::DebugWorker`] thread
//! - [`backend::Backend`]: the seam between the supervisor and an OS
//! - [`pump::push`]: the Windows-style event pump (events arrive, are dispatched,
//!   and must be continued)
//! - [`pump::pull`]: the ptrace-style pump (the debugger reaps thread statuses)
//! - [`coordinator`]: breakpoint detection and resume-from-breakpoint
//! - [`symbols`]: locating the runtime symbol and line tables of an image
//!
//! ## Platform Support
//!
//! - **Linux**: `ptrace` (x86-64 and arm64), launch and attach
//! - **Windows**: the Win32 debug API (x86-64), launch only
//!
//! ## Why unsafe code is needed
//!
//! Both backends call into the kernel directly (ptrace through `libc`, the
//! debug API through `windows-sys`). The unsafe calls are wrapped in safe
//! functions in [`platform`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use kestrel_core::{launch, DebugConfig};
//!
//! let process = launch(&["/bin/true"], &DebugConfig::default())?;
//! let thread = process.current_thread()?;
//! println!("stopped at {}", thread.pc()?);
//! match process.continue_to_trap() {
//!     Err(err) if err.is_process_exited() => println!("exited with {:?}", err.exit_status()),
//!     other => println!("{other:?}"),
//! }
//! # Ok::<(), kestrel_core::DebuggerError>(())
//! ```

#![allow(unsafe_code)] // ptrace and kernel32

pub mod backend;
pub mod cmdline;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod launch;
pub mod platform;
pub mod process;
pub mod pump;
pub mod symbols;
pub mod thread;
pub mod types;
pub mod worker;

pub use backend::{Backend, Inferior, ManualStop, StopHandle};
pub use config::DebugConfig;
pub use coordinator::{breakpoint_hit, BreakpointLookup};
pub use error::{DebuggerError, Result};
pub use event::WaitOutcome;
pub use process::Process;
pub use symbols::{locate_tables, SymbolTables};
pub use thread::{Thread, ThreadTable};
pub use types::{Address, Architecture, ProcessId, Registers, ThreadId};

/// The backend for the host OS
#[cfg(target_os = "linux")]
pub use platform::linux::NativeBackend;
/// The backend for the host OS
#[cfg(windows)]
pub use platform::windows::NativeBackend;

/// Launch `argv[0]` with `argv` under the debugger and stop at its first trap
///
/// The program is resolved (see [`launch::resolve_program`]) before anything is
/// spawned. The spawn itself happens on the debug worker.
///
/// ## Errors
///
/// - `PathResolution` if the program cannot be found
/// - `SpawnFailure` / `HandleDuplication` if the OS refuses to start it
/// - `ProcessExited` if it exits before its first trap
#[cfg(any(target_os = "linux", windows))]
pub fn launch<S: AsRef<str>>(argv: &[S], config: &DebugConfig) -> Result<Process<NativeBackend>>
{
    let path = launch::resolve_program(argv)?;
    let argv: Vec<String> = argv.iter().map(|arg| arg.as_ref().to_string()).collect();
    tracing::debug!(program = %path.display(), args = argv.len(), "Launching");

    #[cfg(target_os = "linux")]
    let spawn = move || platform::linux::launch::spawn(&path, &argv);
    #[cfg(windows)]
    let spawn = move || platform::windows::launch::spawn(&path, &argv);

    Process::launch_with(config, Architecture::current(), spawn)
}

/// Attach to the running process `pid`, stopping all of its threads
///
/// ## Errors
///
/// - `ProcessNotFound` if there is no such process
/// - `Native` if the OS refuses to trace it
/// - `NotImplemented` on Windows
#[cfg(any(target_os = "linux", windows))]
pub fn attach(pid: ProcessId, config: &DebugConfig) -> Result<Process<NativeBackend>>
{
    #[cfg(target_os = "linux")]
    {
        Process::attach_with(config, Architecture::current(), move || platform::linux::launch::attach(pid))
    }

    #[cfg(windows)]
    {
        let _ = (pid, config);
        Err(DebuggerError::NotImplemented("attach"))
    }
}
